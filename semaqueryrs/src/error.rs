use thiserror::Error;

pub type Result<T> = std::result::Result<T, SemaqueryError>;

#[derive(Debug, Error)]
pub enum SemaqueryError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("yaml parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("query item syntax error: {0}")]
    QueryItemSyntax(String),
    #[error("invalid query syntax: {0}")]
    InvalidQuerySyntax(String),
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    #[error("internal error: {0}")]
    Internal(String),
    #[error("structural error: {0}")]
    Structural(String),
    #[error("config error: {0}")]
    Config(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Recoverable failure while parsing a single item reference.
///
/// Kept separate from [`SemaqueryError`] so parse results can be memoized and
/// recorded as non-parsable filter resolutions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ItemParseError {
    #[error("query item syntax error: {0}")]
    QueryItemSyntax(String),
    #[error("invalid query syntax: {0}")]
    InvalidQuerySyntax(String),
}

impl From<ItemParseError> for SemaqueryError {
    fn from(err: ItemParseError) -> Self {
        match err {
            ItemParseError::QueryItemSyntax(msg) => SemaqueryError::QueryItemSyntax(msg),
            ItemParseError::InvalidQuerySyntax(msg) => SemaqueryError::InvalidQuerySyntax(msg),
        }
    }
}
