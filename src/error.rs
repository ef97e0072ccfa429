use thiserror::Error;

/// Errors raised by the sync and prediction pipeline.
///
/// The AI provider never surfaces here: a failed model call degrades to a
/// fallback prediction instead.
#[derive(Debug, Error)]
pub enum AppError {
    /// A third-party API call failed (network, non-2xx, malformed payload).
    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Relabel the error with the operation that failed, keeping its kind.
    pub fn context(self, label: impl std::fmt::Display) -> Self {
        match self {
            AppError::Upstream(msg) => AppError::Upstream(format!("{}: {}", label, msg)),
            AppError::NotFound(msg) => AppError::NotFound(format!("{}: {}", label, msg)),
            AppError::Persistence(msg) => AppError::Persistence(format!("{}: {}", label, msg)),
            AppError::InvalidInput(msg) => AppError::InvalidInput(format!("{}: {}", label, msg)),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::NotFound(_))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Upstream(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Upstream(format!("malformed payload: {}", err))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AppError::NotFound("row not found".to_string()),
            other => AppError::Persistence(other.to_string()),
        }
    }
}

impl From<chrono::ParseError> for AppError {
    fn from(err: chrono::ParseError) -> Self {
        AppError::Persistence(format!("bad stored timestamp: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_keeps_kind() {
        let err = AppError::NotFound("match 42".to_string()).context("failed to create prediction");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "not found: failed to create prediction: match 42");

        let err = AppError::Upstream("HTTP 500".to_string()).context("failed to sync upcoming matches");
        assert!(matches!(err, AppError::Upstream(_)));
    }
}
