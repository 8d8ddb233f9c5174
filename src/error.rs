use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone)]
pub struct Error {
    pub kind: ErrorKind,
    pub message: Option<String>,
}

/// Error taxonomy for the transfer core. Network transients (EAGAIN/EINTR)
/// never reach this type: they're retried inside the socket loop. Everything
/// else bubbles up tagged with one of these kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connection reset, EOF mid-message, read/write deadline exceeded.
    Network,
    /// Bad header, wrong query id, non-NOERROR rcode, mismatched question,
    /// missing/duplicate SOA, truncated response.
    Protocol,
    /// TSIG missing where required, MAC mismatch, too many untagged
    /// intermediate packets.
    Tsig,
    /// Arena out of space, or an invariant violation caught in a debug build.
    Trie,
    Io,
    SerdeYaml,
    Name,
    Config,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error {
            kind,
            message: Some(message.into()),
        }
    }
}

#[macro_export]
macro_rules! error {
    ($kind:expr => $($arg:tt)*) => {
        $crate::error::Error::new($kind, format!($($arg)*))
    };
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {}", self.kind, message),
            None => self.kind.fmt(f),
        }
    }
}

impl std::error::Error for Error {}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ErrorKind::*;

        match self {
            Network => write!(f, "network error"),
            Protocol => write!(f, "protocol violation"),
            Tsig => write!(f, "tsig authentication failure"),
            Trie => write!(f, "radix trie error"),
            Io => write!(f, "io error"),
            SerdeYaml => write!(f, "config parse error"),
            Name => write!(f, "invalid domain name"),
            Config => write!(f, "configuration error"),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self {
            kind: ErrorKind::Io,
            message: Some(value.to_string()),
        }
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(value: serde_yaml::Error) -> Self {
        Self {
            kind: ErrorKind::SerdeYaml,
            message: Some(value.to_string()),
        }
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(value: std::str::Utf8Error) -> Self {
        Self {
            kind: ErrorKind::Name,
            message: Some(value.to_string()),
        }
    }
}

impl From<base64::DecodeError> for Error {
    fn from(value: base64::DecodeError) -> Self {
        Self {
            kind: ErrorKind::Config,
            message: Some(value.to_string()),
        }
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self {
            kind: ErrorKind::Network,
            message: Some("timeout".into()),
        }
    }
}
