use std::fmt;

#[derive(Debug)]
pub enum Error {
    Http(reqwest::Error),
    Io(std::io::Error),
    Status { status: u16, body: String },
    EmptyResponse,
    PageError(String),
    SearchError(String),
    NotAuthorized(String),
    AccessDenied(String),
    IllegalArgument(String),
    IllegalState(String),
    Protocol(String),
}

/// Coarse category used when reporting a failure to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Connection,
    State,
    Argument,
    Other,
}

impl Error {
    /// Transport failures and empty bodies may succeed on a later attempt.
    /// Everything the far end said on purpose is final.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(_) | Error::Io(_) | Error::EmptyResponse => true,
            Error::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Http(_) | Error::Io(_) | Error::Status { .. } | Error::EmptyResponse => {
                ErrorKind::Connection
            }
            Error::IllegalState(_) | Error::NotAuthorized(_) => ErrorKind::State,
            Error::IllegalArgument(_) => ErrorKind::Argument,
            _ => ErrorKind::Other,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Http(e) => write!(f, "HTTP error: {e}"),
            Error::Io(e) => write!(f, "IO error: {e}"),
            Error::Status { status, .. } => write!(f, "unexpected HTTP status {status}"),
            Error::EmptyResponse => write!(f, "empty response from thermostat"),
            Error::PageError(msg) => write!(f, "{msg}"),
            Error::SearchError(msg) => write!(f, "{msg}"),
            Error::NotAuthorized(msg) => write!(f, "{msg}"),
            Error::AccessDenied(msg) => write!(f, "{msg}"),
            Error::IllegalArgument(msg) => write!(f, "{msg}"),
            Error::IllegalState(msg) => write!(f, "{msg}"),
            Error::Protocol(msg) => write!(f, "protocol error: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Http(e) => Some(e),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Http(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
