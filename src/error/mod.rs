// error.rs
use std::{error::Error, fmt, io};

const ERR_MSG_ALLOCATION: &str = "failed to allocate reactor-bound resource";
const ERR_MSG_TLS: &str = "failed to construct TLS session";
const ERR_MSG_DNS_NAME: &str = "invalid DNS server name";

/// Errors surfaced by executor factory operations.
///
/// Allocation failures have already triggered one automatic restart of the
/// executor by the time the caller sees them; the caller's next attempt runs
/// against a fresh loop.
#[derive(Debug)]
pub enum ExecError {
    /// The reactor refused to bind a new resource (e.g. handle-table
    /// exhaustion). Carries the kind of resource and the underlying error.
    Allocation {
        what: &'static str,
        source: io::Error,
    },
    /// TLS session construction failed.
    Tls(rustls::Error),
    /// The server name passed to the TLS wrap is not a valid DNS name.
    InvalidDnsName(String),
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecError::Allocation { what, source } => {
                write!(f, "{ERR_MSG_ALLOCATION} ({what}): {source}")
            }
            ExecError::Tls(err) => write!(f, "{ERR_MSG_TLS}: {err}"),
            ExecError::InvalidDnsName(name) => write!(f, "{ERR_MSG_DNS_NAME}: {name:?}"),
        }
    }
}

impl Error for ExecError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ExecError::Allocation { source, .. } => Some(source),
            ExecError::Tls(err) => Some(err),
            ExecError::InvalidDnsName(_) => None,
        }
    }
}

impl From<rustls::Error> for ExecError {
    fn from(err: rustls::Error) -> Self {
        ExecError::Tls(err)
    }
}
