use std::{
    fmt::{Display, Formatter},
    num::ParseIntError,
    str::Utf8Error,
};

use crate::protocol::error::RedisError;

#[derive(Debug)]
pub enum RedisCommandError {
    // Wrong number of arguments for the command
    ArgNumber,
    // Could not convert bytes to UTF8
    BadString(Utf8Error),
    // Could not parse a string as an integer
    IntParse(ParseIntError),
    // Command is not supported by raftis
    NotSupported(String),
    ProtocolParse(RedisError),
    InvalidCommand,
    CommandNotFound,
    // Node id is not a strictly positive integer
    InvalidNodeId,
    // Node address is not host:port
    InvalidNodeAddress,
    // Colon-delimited Raft RPC header failed the strict scan
    InvalidMessage,
    // Entry head <term:id:type> failed the strict scan
    InvalidEntry,
    // n_entries is not an integer or does not match the argument count
    InvalidEntriesCount,
    // Value is not an integer (INCR on non-numeric data)
    NotAnInteger,
    // RESTORE payload failed validation
    BadRestorePayload,
}

impl RedisCommandError {
    pub fn to_vec(self) -> Vec<u8> {
        format!("-{}\r\n", self).as_bytes().to_vec()
    }
}

impl Display for RedisCommandError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ArgNumber => {
                write!(f, "wrong number of arguments for command")
            }
            Self::BadString(e) => write!(f, "{}", e),
            Self::IntParse(e) => write!(f, "{}", e),
            Self::NotSupported(cmd) => {
                write!(f, "command {} not supported by raftis", cmd)
            }
            Self::ProtocolParse(err) => write!(f, "{}", err),
            Self::InvalidCommand => write!(f, "invalid command"),
            Self::CommandNotFound => write!(f, "command not found"),
            Self::InvalidNodeId => write!(f, "invalid node id"),
            Self::InvalidNodeAddress => write!(f, "invalid node address"),
            Self::InvalidMessage => write!(f, "invalid message"),
            Self::InvalidEntry => write!(f, "invalid entry"),
            Self::InvalidEntriesCount => write!(f, "invalid n_entries value"),
            Self::NotAnInteger => write!(f, "value is not an integer or out of range"),
            Self::BadRestorePayload => write!(f, "DUMP payload version or checksum are wrong"),
        }
    }
}

impl From<Utf8Error> for RedisCommandError {
    fn from(err: Utf8Error) -> Self {
        Self::BadString(err)
    }
}

impl From<ParseIntError> for RedisCommandError {
    fn from(err: ParseIntError) -> Self {
        Self::IntParse(err)
    }
}

impl From<RedisError> for RedisCommandError {
    fn from(err: RedisError) -> Self {
        Self::ProtocolParse(err)
    }
}
