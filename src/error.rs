//! Structured error types for the qsc library.
//!
//! Every public library function returns [`Result<T>`] which carries a
//! domain-specific [`QscError`].  Key-agreement failures are wrapped in
//! [`QscError::Stage`] so callers always learn which pipeline stage failed;
//! [`QscError::root`] and [`QscError::kind`] look through that wrapper.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Primary error enum
// ---------------------------------------------------------------------------

/// Domain-specific error type for the qsc library.
#[derive(Error, Debug)]
pub enum QscError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// An operation was invoked out of state order.
    #[error("{op} is not allowed in state {state}")]
    Sequence { op: &'static str, state: String },

    #[error("no positions with matching bases; sifted key is empty")]
    BasisMismatchExhausted,

    #[error("eavesdropping suspected: estimated QBER {qber:.4} exceeds threshold {threshold:.4}")]
    EavesdroppingSuspected { qber: f64, threshold: f64 },

    #[error("reconciliation failed: {0}")]
    ReconciliationFailure(String),

    #[error("key too short: {available} bits available, {requested} requested")]
    KeyTooShort { available: usize, requested: usize },

    #[error("final key not ready (state {0})")]
    NotReady(String),

    #[error("invalid symmetric key length: {0} bytes (expected 16, 24 or 32)")]
    KeyLength(usize),

    #[error("malformed ciphertext: {0}")]
    CipherFormat(String),

    /// Renders identically to [`QscError::Decryption`].
    #[error("decryption failed")]
    Padding,

    #[error("message too large: {len} bytes exceeds capacity of {max}")]
    MessageTooLarge { len: usize, max: usize },

    #[error("decryption failed")]
    Decryption,

    #[error("validation: {0}")]
    Validation(String),

    #[error("config: {0}")]
    Config(String),

    #[error("key: {0}")]
    Key(String),

    #[error("signing: {0}")]
    Signing(String),

    /// A key-agreement stage failed; the session has been aborted unless the
    /// source is a sequencing error.
    #[error("{stage}: {source}")]
    Stage {
        stage: &'static str,
        #[source]
        source: Box<QscError>,
    },
}

/// Convenience alias used throughout the library.
pub type Result<T> = std::result::Result<T, QscError>;

// ---------------------------------------------------------------------------
// Kinds
// ---------------------------------------------------------------------------

/// Fieldless discriminant of [`QscError`], for matching in callers and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidConfiguration,
    SequenceError,
    BasisMismatchExhausted,
    EavesdroppingSuspected,
    ReconciliationFailure,
    KeyTooShortError,
    NotReadyError,
    KeyLengthError,
    CipherFormatError,
    PaddingError,
    MessageTooLargeError,
    DecryptionError,
    ValidationError,
    Config,
    Key,
    Signing,
}

impl QscError {
    /// Wrap `self` with the name of the pipeline stage that produced it.
    pub fn at_stage(self, stage: &'static str) -> Self {
        match self {
            already @ Self::Stage { .. } => already,
            other => Self::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, skipping stage context.
    pub fn root(&self) -> &QscError {
        match self {
            Self::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    /// The stage name, if this error came out of the key-agreement pipeline.
    pub fn stage(&self) -> Option<&'static str> {
        match self {
            Self::Stage { stage, .. } => Some(stage),
            _ => None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self.root() {
            Self::InvalidConfiguration(_) => ErrorKind::InvalidConfiguration,
            Self::Sequence { .. } => ErrorKind::SequenceError,
            Self::BasisMismatchExhausted => ErrorKind::BasisMismatchExhausted,
            Self::EavesdroppingSuspected { .. } => ErrorKind::EavesdroppingSuspected,
            Self::ReconciliationFailure(_) => ErrorKind::ReconciliationFailure,
            Self::KeyTooShort { .. } => ErrorKind::KeyTooShortError,
            Self::NotReady(_) => ErrorKind::NotReadyError,
            Self::KeyLength(_) => ErrorKind::KeyLengthError,
            Self::CipherFormat(_) => ErrorKind::CipherFormatError,
            Self::Padding => ErrorKind::PaddingError,
            Self::MessageTooLarge { .. } => ErrorKind::MessageTooLargeError,
            Self::Decryption => ErrorKind::DecryptionError,
            Self::Validation(_) => ErrorKind::ValidationError,
            Self::Config(_) => ErrorKind::Config,
            Self::Key(_) => ErrorKind::Key,
            Self::Signing(_) => ErrorKind::Signing,
            // root() never returns a Stage.
            Self::Stage { source, .. } => source.kind(),
        }
    }
}

// ---------------------------------------------------------------------------
// Context extension trait
// ---------------------------------------------------------------------------

/// Extension trait that adds domain-specific context to any `Result<T, E>`.
///
/// Usage mirrors `anyhow::Context` but tags the error with the originating
/// subsystem.
///
/// ```ignore
/// toml::from_str(&text).ctx_config("parse config TOML")?;
/// ```
pub trait ResultExt<T> {
    fn ctx_config(self, msg: &str) -> Result<T>;
    fn ctx_key(self, msg: &str) -> Result<T>;
    fn ctx_signing(self, msg: &str) -> Result<T>;
    fn ctx_validation(self, msg: &str) -> Result<T>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for std::result::Result<T, E> {
    fn ctx_config(self, msg: &str) -> Result<T> {
        self.map_err(|e| QscError::Config(format!("{msg}: {e}")))
    }
    fn ctx_key(self, msg: &str) -> Result<T> {
        self.map_err(|e| QscError::Key(format!("{msg}: {e}")))
    }
    fn ctx_signing(self, msg: &str) -> Result<T> {
        self.map_err(|e| QscError::Signing(format!("{msg}: {e}")))
    }
    fn ctx_validation(self, msg: &str) -> Result<T> {
        self.map_err(|e| QscError::Validation(format!("{msg}: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
