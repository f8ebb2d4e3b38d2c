use super::error::RedisError;
use super::{Resp, Result};
use super::{CR, LF};

/// RESP reader over a byte buffer.
///
/// [`parse`](RedisProtocolParser::parse) yields one complete value plus the
/// unconsumed rest of the buffer, or an error whose
/// [`is_incomplete`](RedisError::is_incomplete) flag tells socket readers
/// whether more bytes could still complete the value. Length lines are
/// decoded with the same strict checked arithmetic as the log-entry codec;
/// `-1` lengths produce [`Resp::Nil`] for both bulk strings and arrays.
pub struct RedisProtocolParser;

impl RedisProtocolParser {
    pub fn parse(input: &[u8]) -> Result {
        let mut reader = Reader { input };
        let resp = reader.value()?;
        Ok((resp, reader.input))
    }
}

/// A cursor that consumes `input` as it decodes.
struct Reader<'a> {
    input: &'a [u8],
}

impl<'a> Reader<'a> {
    fn value(&mut self) -> std::result::Result<Resp<'a>, RedisError> {
        match self.symbol()? {
            b'+' => Ok(Resp::String(self.line()?)),
            b'-' => Ok(Resp::Error(self.line()?)),
            b':' => Ok(Resp::Integer(self.line()?)),
            b'$' => self.bulk_string(),
            b'*' => self.array(),
            _ => Err(RedisError::unknown_symbol()),
        }
    }

    fn symbol(&mut self) -> std::result::Result<u8, RedisError> {
        match self.input.split_first() {
            Some((symbol, rest)) => {
                self.input = rest;
                Ok(*symbol)
            }
            None => Err(RedisError::incomplete()),
        }
    }

    /// Everything up to the next CRLF, consuming the terminator. A CR not
    /// followed by LF is malformed; a CR at the end of the buffer may still
    /// be completed.
    fn line(&mut self) -> std::result::Result<&'a [u8], RedisError> {
        let mut index = 0;
        while index < self.input.len() {
            if self.input[index] == CR {
                return match self.input.get(index + 1) {
                    Some(&LF) => {
                        let line = &self.input[..index];
                        self.input = &self.input[index + 2..];
                        Ok(line)
                    }
                    Some(_) => Err(RedisError::expected_crlf()),
                    None => Err(RedisError::incomplete()),
                };
            }
            index += 1;
        }
        Err(RedisError::incomplete())
    }

    /// A length line: `-1` marks a nil value, anything else must be a
    /// non-negative decimal with at least one digit.
    fn length_line(&mut self) -> std::result::Result<Option<usize>, RedisError> {
        let line = self.line()?;
        if line == b"-1" {
            return Ok(None);
        }
        if line.is_empty() {
            return Err(RedisError::bad_integer());
        }
        let mut value: usize = 0;
        for byte in line {
            match byte {
                b'0'..=b'9' => {
                    value = value
                        .checked_mul(10)
                        .and_then(|value| value.checked_add((byte - b'0') as usize))
                        .ok_or_else(RedisError::bad_integer)?;
                }
                _ => return Err(RedisError::bad_integer()),
            }
        }
        Ok(Some(value))
    }

    fn bulk_string(&mut self) -> std::result::Result<Resp<'a>, RedisError> {
        let len = match self.length_line()? {
            Some(len) => len,
            None => return Ok(Resp::Nil),
        };
        if self.input.len() < len.saturating_add(2) {
            return Err(RedisError::incomplete());
        }
        if self.input[len] != CR || self.input[len + 1] != LF {
            return Err(RedisError::expected_crlf());
        }
        let data = &self.input[..len];
        self.input = &self.input[len + 2..];
        Ok(Resp::BulkString(data))
    }

    fn array(&mut self) -> std::result::Result<Resp<'a>, RedisError> {
        let len = match self.length_line()? {
            Some(len) => len,
            None => return Ok(Resp::Nil),
        };
        // the declared count is not trusted for preallocation
        let mut items = Vec::with_capacity(len.min(64));
        for _ in 0..len {
            items.push(self.value()?);
        }
        Ok(Resp::Array(items))
    }
}
