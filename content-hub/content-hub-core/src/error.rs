//! Error taxonomy shared by resolution, permission filtering and search.
//!
//! Everything in this crate returns `anyhow::Result`; these variants travel
//! inside the `anyhow::Error` so callers can `downcast_ref::<Error>()` when
//! they need to tell the cases apart.

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to fetch parents from the collection store: {message}")]
    SourceFetch { message: String },
    #[error("Corrupt cached ancestors under {key}: {message}")]
    CacheDeserialization { key: String, message: String },
    #[error("Unsupported filter: {message}")]
    UnsupportedFilter { message: String },
    #[error("Invalid hierarchy: {message}")]
    InvalidHierarchy { message: String },
    #[error("Invalid config: {message}")]
    InvalidConfig { message: String },
}

impl Error {
    pub fn unsupported_filter(message: impl Into<String>) -> anyhow::Error {
        Self::UnsupportedFilter { message: message.into() }.into()
    }

    pub fn invalid_hierarchy(message: impl Into<String>) -> anyhow::Error {
        Self::InvalidHierarchy { message: message.into() }.into()
    }
}
