use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("VALIDATION_ERROR: {0}")]
    Validation(String),
    #[error("NOT_FOUND: {0}")]
    NotFound(String),
    #[error("IO_FAILURE: {0}")]
    Io(String),
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Io(_) => "IO_FAILURE",
            Self::Internal(_) => "INTERNAL",
        }
    }

    pub fn status(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::NotFound(_) => 404,
            Self::Io(_) | Self::Internal(_) => 500,
        }
    }

    /// The same message for absent, foreign and wrong-state notes.
    pub fn note_not_found() -> Self {
        Self::NotFound("note not found".to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::AppError;

    #[test]
    fn errors_render_with_stable_codes() {
        let error = AppError::Validation("title is required".to_string());
        assert_eq!(error.to_string(), "VALIDATION_ERROR: title is required");
        assert_eq!(error.code(), "VALIDATION_ERROR");
        assert_eq!(error.status(), 400);

        let missing = AppError::note_not_found();
        assert_eq!(missing.code(), "NOT_FOUND");
        assert_eq!(missing.status(), 404);
    }

    #[test]
    fn sqlite_failures_are_internal() {
        let error: AppError = rusqlite::Error::InvalidQuery.into();
        assert_eq!(error.code(), "INTERNAL");
        assert_eq!(error.status(), 500);
    }
}
