//! The entry payload codec.
//!
//! Every Normal log entry carries a serialized list of commands in a
//! multibulk-compatible encoding using `\n` rather than `\r\n` termination,
//! for example:
//!
//! ```text
//! *1\n*3\n$3\nSET\n$3\nkey\n$5\nvalue\n
//! ```
//!
//! DeleteUnlockKeys entries carry the second format in this module: a key
//! count followed by NUL-terminated key names, deduplicated and in
//! lexicographic order.

use std::collections::BTreeSet;
use std::fmt;

use crate::storage::RedisString;

/// A decode failure. No partial structure ever escapes to the caller.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CodecError {
    /// The expected `*` or `$` prefix was missing.
    BadPrefix,
    /// A length was empty, non-decimal, or overflowed.
    BadInteger,
    /// A zero command count or zero argument count.
    ZeroCount,
    /// A field was not terminated by `\n`.
    MissingTerminator,
    /// The buffer ended before the structure did.
    Truncated,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::BadPrefix => write!(f, "bad serialization prefix"),
            CodecError::BadInteger => write!(f, "bad serialized integer"),
            CodecError::ZeroCount => write!(f, "zero-length serialized structure"),
            CodecError::MissingTerminator => write!(f, "missing field terminator"),
            CodecError::Truncated => write!(f, "truncated serialization"),
        }
    }
}

impl std::error::Error for CodecError {}

fn encode_integer(out: &mut Vec<u8>, prefix: u8, value: usize) {
    out.push(prefix);
    out.extend_from_slice(value.to_string().as_bytes());
    out.push(b'\n');
}

/// Decodes `<prefix><digits>\n`, returning the value and the remaining
/// buffer. The smallest valid encoding is three bytes (`*0\n`).
fn decode_integer(input: &[u8], prefix: u8) -> Result<(usize, &[u8]), CodecError> {
    if input.len() < 3 {
        return Err(CodecError::Truncated);
    }
    if input[0] != prefix {
        return Err(CodecError::BadPrefix);
    }
    let mut value: usize = 0;
    let mut consumed = 1;
    for byte in &input[1..] {
        match byte {
            b'\n' => {
                if consumed == 1 {
                    return Err(CodecError::BadInteger);
                }
                return Ok((value, &input[consumed + 1..]));
            }
            b'0'..=b'9' => {
                value = value
                    .checked_mul(10)
                    .and_then(|value| value.checked_add((byte - b'0') as usize))
                    .ok_or(CodecError::BadInteger)?;
                consumed += 1;
            }
            _ => return Err(CodecError::BadInteger),
        }
    }
    Err(CodecError::Truncated)
}

/// Serializes a list of commands, each an argv list of binary strings.
pub fn serialize(commands: &[Vec<RedisString>]) -> Vec<u8> {
    let mut out = Vec::new();
    encode_integer(&mut out, b'*', commands.len());
    for command in commands {
        encode_integer(&mut out, b'*', command.len());
        for field in command {
            encode_integer(&mut out, b'$', field.len());
            out.extend_from_slice(field);
            out.push(b'\n');
        }
    }
    out
}

/// Decodes a serialized command list.
///
/// A zero command count and a zero argc command are both rejected; trailing
/// bytes after the final field are ignored.
pub fn deserialize(buf: &[u8]) -> Result<Vec<Vec<RedisString>>, CodecError> {
    let (count, mut rest) = decode_integer(buf, b'*')?;
    if count == 0 {
        return Err(CodecError::ZeroCount);
    }

    let mut commands = Vec::with_capacity(count);
    for _ in 0..count {
        let (argc, mut fields) = decode_integer(rest, b'*')?;
        if argc == 0 {
            return Err(CodecError::ZeroCount);
        }
        let mut argv = Vec::with_capacity(argc);
        for _ in 0..argc {
            let (len, data) = decode_integer(fields, b'$')?;
            if data.len() <= len {
                return Err(CodecError::Truncated);
            }
            if data[len] != b'\n' {
                return Err(CodecError::MissingTerminator);
            }
            argv.push(data[..len].to_vec());
            fields = &data[len + 1..];
        }
        commands.push(argv);
        rest = fields;
    }
    Ok(commands)
}

/// Serializes key names for a DeleteUnlockKeys entry.
///
/// Duplicates are removed and the surviving keys are emitted NUL-terminated
/// in lexicographic order.
pub fn serialize_locked_keys(keys: &[RedisString]) -> Vec<u8> {
    let unique: BTreeSet<&[u8]> = keys.iter().map(|key| &key[..]).collect();

    let mut out = Vec::new();
    encode_integer(&mut out, b'*', unique.len());
    for key in unique {
        out.extend_from_slice(key);
        out.push(b'\0');
    }
    out
}

/// Decodes a DeleteUnlockKeys payload back into its key list.
pub fn deserialize_locked_keys(buf: &[u8]) -> Result<Vec<RedisString>, CodecError> {
    let (count, mut rest) = decode_integer(buf, b'*')?;
    if count == 0 {
        return Err(CodecError::ZeroCount);
    }

    let mut keys = Vec::with_capacity(count);
    for _ in 0..count {
        let nul = rest
            .iter()
            .position(|byte| *byte == b'\0')
            .ok_or(CodecError::Truncated)?;
        keys.push(rest[..nul].to_vec());
        rest = &rest[nul + 1..];
    }
    Ok(keys)
}
