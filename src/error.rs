//! Error types.
//!
//! - `ScanError` is the typed library error used by the scan core, the
//!   settings loaders and the reference collaborators.
//! - `AppError` is what the binary sees: a message plus a process exit code.

use std::path::PathBuf;

use thiserror::Error;

/// Library result type.
pub type Result<T> = std::result::Result<T, ScanError>;

/// Coarse classification of a [`ScanError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or inconsistent settings; detected before scanning starts.
    Configuration,
    /// The objective evaluator (or the forward model behind it) failed.
    Evaluator,
    /// Settings could not be read or output could not be written.
    Io,
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("invalid range: min={min} > max={max}")]
    InvalidRange { min: f64, max: f64 },

    #[error("invalid step count {count} (must be between 1 and {})", crate::scan::MAX_STEPS)]
    InvalidStepCount { count: usize },

    #[error("invalid explicit step values: {0}")]
    InvalidStepValues(String),

    #[error("empty scan: {0}")]
    EmptyScan(String),

    #[error("parameter '{name}': {source}")]
    Param {
        name: String,
        #[source]
        source: Box<ScanError>,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("evaluator failure: {0}")]
    Evaluator(String),

    #[error("{message} ({})", path.display())]
    Io { path: PathBuf, message: String },
}

impl ScanError {
    /// Attach a parameter name to an error raised while handling that parameter.
    pub fn for_param(self, name: impl Into<String>) -> Self {
        ScanError::Param {
            name: name.into(),
            source: Box::new(self),
        }
    }

    pub fn io(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        ScanError::Io {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ScanError::InvalidRange { .. }
            | ScanError::InvalidStepCount { .. }
            | ScanError::InvalidStepValues(_)
            | ScanError::EmptyScan(_)
            | ScanError::Config(_) => ErrorKind::Configuration,
            ScanError::Param { source, .. } => source.kind(),
            ScanError::Evaluator(_) => ErrorKind::Evaluator,
            ScanError::Io { .. } => ErrorKind::Io,
        }
    }
}

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl From<ScanError> for AppError {
    fn from(err: ScanError) -> Self {
        let exit_code = match err.kind() {
            ErrorKind::Configuration => 2,
            ErrorKind::Io => 3,
            ErrorKind::Evaluator => 4,
        };
        AppError::new(exit_code, err.to_string())
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_wrapper_keeps_inner_kind() {
        let err = ScanError::InvalidStepCount { count: 0 }.for_param("theta23");
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("theta23"));
    }

    #[test]
    fn exit_codes_follow_error_kind() {
        let cfg: AppError = ScanError::Config("bad".into()).into();
        let io: AppError = ScanError::io("out.json", "Failed to write").into();
        let eval: AppError = ScanError::Evaluator("nan".into()).into();
        assert_eq!(cfg.exit_code(), 2);
        assert_eq!(io.exit_code(), 3);
        assert_eq!(eval.exit_code(), 4);
        assert!(io.to_string().contains("out.json"));
    }
}
