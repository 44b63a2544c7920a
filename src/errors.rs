use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Metadata or direct-URL lookup failed
    #[error("Resolution error: {0}")]
    Resolution(String),

    /// The active backend refused or could not accept a job
    #[error("Dispatch error: {0}")]
    Dispatch(String),

    /// The transfer itself failed after it was dispatched
    #[error("Transfer error: {0}")]
    Transfer(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Plugin error: {0}")]
    Plugin(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Timed out after {0}s")]
    Timeout(u64),

    #[error("Download cancelled")]
    Cancelled,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Concurrent download limit reached ({0})")]
    LimitReached(usize),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Update error: {0}")]
    Update(String),
}

impl AppError {
    pub fn is_cancellation(&self) -> bool {
        matches!(self, AppError::Cancelled)
    }

    /// Maps a failed spawn to `ToolNotFound` when the executable is missing.
    pub fn from_spawn(program: &str, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            AppError::ToolNotFound(program.to_string())
        } else {
            AppError::Io(err)
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_executable_maps_to_tool_not_found() {
        let err = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let mapped = AppError::from_spawn("aria2c", err);
        assert!(matches!(mapped, AppError::ToolNotFound(ref p) if p == "aria2c"));

        let err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert!(matches!(AppError::from_spawn("aria2c", err), AppError::Io(_)));
    }

    #[test]
    fn only_cancelled_is_cancellation() {
        assert!(AppError::Cancelled.is_cancellation());
        assert!(!AppError::Timeout(30).is_cancellation());
        assert_eq!(AppError::Timeout(30).to_string(), "Timed out after 30s");
    }
}
