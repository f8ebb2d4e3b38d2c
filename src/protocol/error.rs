#[derive(Debug)]
pub struct RedisError {
    pub err_type: RedisErrorType,
}

/// Why a buffer failed to parse as a RESP value.
///
/// `Incomplete` is the load-bearing variant: the socket readers accumulate
/// bytes while the parser reports it and bail out on anything else.
#[derive(Debug, Eq, PartialEq)]
pub enum RedisErrorType {
    // More bytes on the connection may still complete the value
    Incomplete,
    // Unknown type symbol at the start of a value
    UnknownSymbol,
    // A length line held non-digits or overflowed
    BadInteger,
    // Payload not terminated by CRLF where one was required
    ExpectedCrlf,
}

impl RedisError {
    pub fn incomplete() -> Self {
        Self {
            err_type: RedisErrorType::Incomplete,
        }
    }

    pub fn unknown_symbol() -> Self {
        Self {
            err_type: RedisErrorType::UnknownSymbol,
        }
    }

    pub fn bad_integer() -> Self {
        Self {
            err_type: RedisErrorType::BadInteger,
        }
    }

    pub fn expected_crlf() -> Self {
        Self {
            err_type: RedisErrorType::ExpectedCrlf,
        }
    }

    /// Whether more bytes could still turn this buffer into a valid value.
    pub fn is_incomplete(&self) -> bool {
        self.err_type == RedisErrorType::Incomplete
    }
}

impl std::fmt::Display for RedisError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.err_type {
            RedisErrorType::Incomplete => write!(f, "incomplete value"),
            RedisErrorType::UnknownSymbol => write!(f, "unknown protocol symbol"),
            RedisErrorType::BadInteger => write!(f, "bad length line"),
            RedisErrorType::ExpectedCrlf => write!(f, "missing line terminator"),
        }
    }
}

impl std::error::Error for RedisError {}
