use thiserror::Error;

pub type MetadataResult<T> = Result<T, MetadataError>;

/// Failure taxonomy for metadata decode/encode.
///
/// Invalid operations (adding a user to a non-top-level folder, an empty
/// certificate, ...) are not errors: they return `false` with no state
/// change. Everything here leaves the document unusable
/// (`is_metadata_setup() == false`), never half-populated.
#[derive(Debug, Error)]
pub enum MetadataError {
    /// Unparsable JSON or a required wire field is missing.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// AEAD tag mismatch, key unwrap failure, or an empty decrypt result.
    #[error("crypto failure: {0}")]
    CryptoFailure(String),

    /// The resolved metadata key's digest is absent from a non-empty
    /// checksum set.
    #[error("metadata key checksum mismatch")]
    ChecksumMismatch,

    /// Transport-level failure. During ancestor resolution this is folded
    /// into "treat as empty ancestor metadata" rather than surfaced.
    #[error("transport error: {0}")]
    Transport(String),

    /// Resolution was cancelled before completing.
    #[error("metadata resolution cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
