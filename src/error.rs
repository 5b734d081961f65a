use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Rejected before any network call.
    Configuration,
    Network,
    Timeout,
    /// The backend answered with `success: false` or a malformed body.
    Application,
    /// A stage result could not be persisted.
    Storage,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration error",
            ErrorKind::Network => "network error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Application => "backend error",
            ErrorKind::Storage => "storage error",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Uniform failure surfaced to the presentation layer.
#[derive(Debug, Clone, Serialize, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct InvokeError {
    pub kind: ErrorKind,
    pub message: String,
}

impl InvokeError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    pub fn application(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Application, message)
    }

    pub fn storage(err: &anyhow::Error) -> Self {
        Self::new(ErrorKind::Storage, format!("{err:#}"))
    }

    /// Actionable hint for the user, when there is one.
    pub fn guidance(&self) -> Option<&'static str> {
        match self.kind {
            ErrorKind::Timeout => {
                Some("the backend is slow to answer; the operation may still be running, try again")
            }
            ErrorKind::Network => Some("check that the backend is running and reachable"),
            _ => None,
        }
    }

    pub(crate) fn from_reqwest(err: reqwest::Error, what: &str) -> Self {
        if err.is_timeout() {
            return Self::new(ErrorKind::Timeout, format!("{what} timed out"));
        }
        if err.is_decode() {
            return Self::application(format!("{what}: malformed response: {err}"));
        }
        Self::new(ErrorKind::Network, format!("{what}: {err}"))
    }
}
