use thiserror::Error;

#[derive(Error, Debug)]
pub enum SquallError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("None isn't acceptable as a value{}", column.as_ref().map(|c| format!(" for {c}")).unwrap_or_default())]
    NullNotAllowed { column: Option<String> },
    #[error("Don't know how to compile type {type_name} of {repr}")]
    Compile { type_name: String, repr: String },
    #[error("Class info error: {0}")]
    ClassInfo(String),
    #[error("Type error: {0}")]
    Type(String),
    #[error("Value error: {0}")]
    Value(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Internal invariant violated: {0}")]
    Invariant(String),
}

pub type Result<T> = std::result::Result<T, SquallError>;

// Helper conversions
impl From<config::ConfigError> for SquallError {
    fn from(e: config::ConfigError) -> Self { Self::Config(e.to_string()) }
}
