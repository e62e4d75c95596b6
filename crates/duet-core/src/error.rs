/// Errors that can occur during chat operations.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("storage error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed document {collection}/{id}: {source}")]
    MalformedDocument {
        collection: String,
        id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("document {collection}/{id} has unexpected shape")]
    UnexpectedShape { collection: String, id: String },

    #[error("document {collection}/{id} not found")]
    DocumentNotFound { collection: String, id: String },

    #[error("user not found")]
    UserNotFound,

    #[error("conversation {0} is not in the index")]
    UnknownConversation(String),

    #[error("composition disabled by a block")]
    CompositionBlocked,

    #[error("email already registered")]
    EmailTaken,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("no active session")]
    NoSession,
}

pub type Result<T, E = CoreError> = std::result::Result<T, E>;
