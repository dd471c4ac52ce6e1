pub mod error;

pub use error::{
    ErrorCategory, ErrorClassifier, LlmError, ReportError, Result, ResultExt, ValidationError,
    ValidationErrorKind,
};
