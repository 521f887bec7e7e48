//! Error kinds raised while talking to the router

use thiserror::Error;

/// Failure classes for device interaction.
///
/// Call sites that only care about "did it work" collapse these to a boolean,
/// but the kind is kept so narration and tests can tell them apart.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeviceError {
    /// No response: timeout, refused connection, DNS failure
    #[error("device unreachable: {0}")]
    Connectivity(String),

    /// The device answered but did not issue a session cookie
    #[error("login rejected: no session cookie issued")]
    Auth,

    /// Empty or malformed payload where structured data was expected
    #[error("unexpected payload from {path}: {detail}")]
    Protocol { path: String, detail: String },

    /// Diagnostic output reached its final shape but could not be decoded
    #[error("malformed diagnostic output: {0}")]
    Malformed(String),

    /// A polling ceiling was reached without the target condition
    #[error("{what} not reached after {attempts} attempts")]
    TimeoutExceeded { what: &'static str, attempts: u32 },
}

impl DeviceError {
    pub fn protocol(path: &str, detail: impl Into<String>) -> Self {
        Self::Protocol {
            path: path.to_string(),
            detail: detail.into(),
        }
    }
}

impl From<reqwest::Error> for DeviceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            let path = err
                .url()
                .map(|u| u.path().to_string())
                .unwrap_or_default();
            return Self::Protocol {
                path,
                detail: err.to_string(),
            };
        }
        Self::Connectivity(err.to_string())
    }
}

pub type DeviceResult<T> = Result<T, DeviceError>;
