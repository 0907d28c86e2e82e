use thiserror::Error;

/// Errors produced while normalizing a raw node URI or Clash entry.
///
/// Format errors are not transient, so there is no retry variant; callers
/// drop the offending input and move on.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("unknown scheme: {0:?}")]
    UnknownScheme(String),

    #[error("malformed base64 payload")]
    MalformedBase64,

    #[error("malformed uri: {0}")]
    MalformedUri(String),

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("port out of range: {0}")]
    InvalidPort(u32),
}
