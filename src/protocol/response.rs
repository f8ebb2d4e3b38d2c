use super::{NIL, OK, PONG};
use crate::command::command_error::RedisCommandError;
use crate::storage::RedisString;

/// A single RESP value in an owned reply.
#[derive(Debug)]
pub enum RedisResponseType {
    SimpleString(RedisString),
    BulkString(RedisString),
    Integer(i64),
    Nil,
}

/// An owned reply, buildable off the storage lock and shippable across
/// threads back to the connection that is waiting for it.
#[derive(Debug)]
pub struct RedisResponse {
    response: RedisResponseInner,
}

#[derive(Debug)]
enum RedisResponseInner {
    Single(RedisResponseType),
    Array(Vec<RedisResponseType>),
    Error(String),
    Okay,
    Pong,
    Quit,
}

impl RedisResponseType {
    /// Bytes analogous to `format!("{}{}{}", symbol, data, CRLF)`.
    fn into_formatted(self) -> Vec<u8> {
        use RedisResponseType::*;

        match self {
            Nil => NIL.to_vec(),
            SimpleString(data) => {
                let mut reply = Vec::with_capacity(data.len() + 3);
                reply.push(b'+');
                reply.extend_from_slice(&data);
                reply.extend_from_slice(b"\r\n");
                reply
            }
            BulkString(data) => {
                let header = data.len().to_string();
                let mut reply = Vec::with_capacity(data.len() + header.len() + 5);
                reply.push(b'$');
                reply.extend_from_slice(header.as_bytes());
                reply.extend_from_slice(b"\r\n");
                reply.extend_from_slice(&data);
                reply.extend_from_slice(b"\r\n");
                reply
            }
            Integer(num) => format!(":{}\r\n", num).into_bytes(),
        }
    }
}

impl RedisResponse {
    pub fn okay() -> Self {
        Self {
            response: RedisResponseInner::Okay,
        }
    }

    pub fn pong() -> Self {
        Self {
            response: RedisResponseInner::Pong,
        }
    }

    pub fn quit() -> Self {
        Self {
            response: RedisResponseInner::Quit,
        }
    }

    pub fn is_quit(&self) -> bool {
        matches!(self.response, RedisResponseInner::Quit)
    }

    pub fn single(response: RedisResponseType) -> Self {
        Self {
            response: RedisResponseInner::Single(response),
        }
    }

    pub fn array(responses: Vec<RedisResponseType>) -> Self {
        Self {
            response: RedisResponseInner::Array(responses),
        }
    }

    /// An array of integers, the reply shape of the Raft RPC commands.
    pub fn integers(values: Vec<i64>) -> Self {
        Self::array(values.into_iter().map(RedisResponseType::Integer).collect())
    }

    pub fn error(error: RedisCommandError) -> Self {
        Self::error_string(error.to_string())
    }

    /// An error reply with a caller-provided first word, e.g. `NOLEADER` or
    /// `LEADERIS host:port`.
    pub fn error_string<S: Into<String>>(error: S) -> Self {
        Self {
            response: RedisResponseInner::Error(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.response, RedisResponseInner::Error(_))
    }

    pub fn reply(self) -> Vec<u8> {
        use RedisResponseInner::*;
        match self.response {
            Okay | Quit => OK.to_vec(),
            Pong => PONG.to_vec(),
            Error(text) => format!("-{}\r\n", text).into_bytes(),
            Single(single) => single.into_formatted(),
            Array(responses) => {
                let mut reply = Vec::with_capacity(512);
                reply.push(b'*');
                reply.extend_from_slice(responses.len().to_string().as_bytes());
                reply.extend_from_slice(b"\r\n");
                for response in responses {
                    reply.extend_from_slice(&response.into_formatted());
                }
                reply
            }
        }
    }
}
