use occtrack_core::error::CoreError;

/// Failure of the storage medium behind a collection.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on collection '{collection}': {source}")]
    Io {
        collection: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Collection '{collection}' is corrupt: {source}")]
    Corrupt {
        collection: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode collection '{collection}': {source}")]
    Encode {
        collection: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid collection name '{0}'")]
    InvalidCollection(String),
}

impl StoreError {
    pub(crate) fn io(collection: &str, source: std::io::Error) -> Self {
        Self::Io {
            collection: collection.to_string(),
            source,
        }
    }
}

/// Error type for repository operations.
///
/// Domain rule violations arrive as [`CoreError`]; storage failures as
/// [`StoreError`].
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DbError {
    /// The domain error, if this is one.
    pub fn as_core(&self) -> Option<&CoreError> {
        match self {
            Self::Core(e) => Some(e),
            Self::Store(_) => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Core(CoreError::NotFound { .. }))
    }
}

pub type DbResult<T> = Result<T, DbError>;
