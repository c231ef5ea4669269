use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SmtpError {
    #[error("server replied {code}: {message}")]
    Rejected { code: u16, message: String },
    #[error("smtp i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no reply within {0:?}")]
    Timeout(Duration),
    #[error("unexpected greeting {code}: {line}")]
    Greeting { code: u16, line: String },
    #[error("malformed reply: {0:?}")]
    Malformed(String),
    #[error("tls error: {0}")]
    Tls(#[from] native_tls::Error),
    #[error("couldn't resolve {0}")]
    Resolve(String),
    #[error("session already failed")]
    SessionFailed,
}

impl SmtpError {
    /// Transport trouble, as opposed to the server saying no.
    pub fn is_io(&self) -> bool {
        matches!(self, SmtpError::Io(_) | SmtpError::Timeout(_))
    }

    pub fn reply_code(&self) -> Option<u16> {
        match self {
            SmtpError::Rejected { code, .. } | SmtpError::Greeting { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// `Ok(())` is the explicit success marker.
pub type SmtpResult<T = ()> = Result<T, SmtpError>;
