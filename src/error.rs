/*!
Errors that can end a session.

Persistence errors never make it this far; the stores log and swallow
their own.
*/
use std::{
    fmt::{Display, Formatter},
    io::ErrorKind,
};

#[derive(Debug)]
pub enum Error {
    /// The peer closed its end of the connection.
    Eof,
    IOError(std::io::Error),
    /// The hub told this session to close.
    Shutdown,
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == ErrorKind::UnexpectedEof {
            Error::Eof
        } else {
            Error::IOError(e)
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Eof => write!(f, "connection closed by peer"),
            Error::IOError(e) => write!(f, "I/O error: {}", e),
            Error::Shutdown => write!(f, "server shutting down"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IOError(e) => Some(e),
            _ => None,
        }
    }
}
