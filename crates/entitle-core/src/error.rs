//! Error types for Entitle.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Key errors
    #[error("Invalid license key format: {0}")]
    InvalidKeyFormat(String),

    // License record errors
    #[error("Invalid license data: {0}")]
    InvalidLicenseData(String),

    #[error("License already exists: {0}")]
    LicenseAlreadyExists(String),

    #[error("License not found: {0}")]
    LicenseNotFound(String),

    #[error("License integrity check failed: {0}")]
    IntegrityViolation(String),

    #[error("License expired {days_expired} day(s) ago")]
    LicenseExpired { days_expired: i64 },

    // Activation errors
    #[error("License is already activated on another device (since {activated_at})")]
    ActivationConflict {
        activated_at: chrono::DateTime<chrono::Utc>,
    },

    // Infrastructure errors
    #[error("Database error: {0}")]
    Database(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Coarse failure classes used to apply the recovery policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Format,
    Integrity,
    Expiry,
    Network,
    ActivationConflict,
    Storage,
    Internal,
}

impl Error {
    pub fn class(&self) -> FailureClass {
        match self {
            Error::InvalidKeyFormat(_) => FailureClass::Format,
            Error::InvalidLicenseData(_)
            | Error::LicenseAlreadyExists(_)
            | Error::LicenseNotFound(_)
            | Error::IntegrityViolation(_) => FailureClass::Integrity,
            Error::LicenseExpired { .. } => FailureClass::Expiry,
            Error::Network(_) => FailureClass::Network,
            Error::ActivationConflict { .. } => FailureClass::ActivationConflict,
            Error::Database(_) => FailureClass::Storage,
            Error::Config(_)
            | Error::Io(_)
            | Error::Serialization(_)
            | Error::Internal(_) => FailureClass::Internal,
        }
    }

    /// Whether a validation may still succeed after this failure.
    ///
    /// Network and storage failures recover through another source; whether
    /// one resolved the key is decided by the caller. Strict mode recovers
    /// from nothing.
    pub fn is_recoverable(&self, strict: bool) -> bool {
        match self.class() {
            FailureClass::Format | FailureClass::ActivationConflict | FailureClass::Internal => false,
            FailureClass::Integrity
            | FailureClass::Expiry
            | FailureClass::Network
            | FailureClass::Storage => !strict,
        }
    }
}
