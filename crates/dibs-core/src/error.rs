use thiserror::Error;

/// Top-level error type for the DIBS system.
///
/// The backup engine has its own error types; this one covers configuration
/// and access to the store.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DibsError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Metrics unavailable: {0}")]
    MetricsUnavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<toml::de::Error> for DibsError {
    fn from(err: toml::de::Error) -> Self {
        DibsError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for DibsError {
    fn from(err: toml::ser::Error) -> Self {
        DibsError::Config(err.to_string())
    }
}

/// A specialized `Result` type for DIBS operations.
pub type Result<T> = std::result::Result<T, DibsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let cases: Vec<(DibsError, &str)> = vec![
            (
                DibsError::Config("min above max".to_string()),
                "Configuration error: min above max",
            ),
            (
                DibsError::Storage("database is locked".to_string()),
                "Storage error: database is locked",
            ),
            (
                DibsError::MetricsUnavailable("no such table: sessions".to_string()),
                "Metrics unavailable: no such table: sessions",
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.to_string(), expected);
        }
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: DibsError = io_err.into();
        match &err {
            DibsError::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::NotFound),
            _ => panic!("Expected Io variant"),
        }
        assert!(err.to_string().starts_with("I/O error:"));
    }

    #[test]
    fn test_error_from_toml_de() {
        let err: std::result::Result<toml::Value, _> = toml::from_str("invalid = [[[");
        let dibs_err: DibsError = err.unwrap_err().into();
        assert!(matches!(dibs_err, DibsError::Config(_)));
    }

    #[test]
    fn test_result_type_with_question_mark() {
        fn inner() -> Result<String> {
            let io_result: std::result::Result<i32, std::io::Error> = Ok(42);
            let value = io_result?;
            Ok(value.to_string())
        }

        assert_eq!(inner().unwrap(), "42");
    }
}
