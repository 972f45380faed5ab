//! Errors raised by the maintenance and lifecycle machinery

use std::{io, path::PathBuf};

use thiserror::Error;
use warden_jose::{
    error::{JwtSigningError, SigningError},
    jwk::KeyId,
    jws,
};

use crate::store::Dn;

/// An error raised by the directory store
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached
    #[error("directory store unavailable: {reason}")]
    Unavailable {
        /// What went wrong
        reason: String,
    },

    /// No entry exists at the given DN
    #[error("no entry at '{0}'")]
    NotFound(Dn),

    /// An entry already exists at the given DN
    #[error("an entry already exists at '{0}'")]
    AlreadyExists(Dn),

    /// A conditional write found a different value than expected
    #[error("conditional write on '{dn}' rejected; '{attribute}' has changed")]
    Conflict {
        /// The entry being written
        dn: Dn,
        /// The attribute that was checked
        attribute: String,
    },

    /// An entry could not be mapped to or from its stored attributes
    #[error("unable to map entry attributes")]
    Mapping(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether the store could not be reached
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// An error raised by a crypto provider
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The provider does not manage keys for this algorithm
    #[error("provider cannot manage keys for '{0}'")]
    UnsupportedAlgorithm(jws::Algorithm),

    /// The provider holds no key with this ID
    #[error("no private key with ID '{0}'")]
    UnknownKey(KeyId),

    /// Key generation failed
    #[error("key generation failed")]
    Generation(#[from] warden_jose::error::Unexpected),

    /// Signing with a held key failed
    #[error("signing with held key failed")]
    Signing(#[source] SigningError),

    /// The provider refused the operation
    #[error("crypto provider failure: {0}")]
    Provider(String),
}

impl From<CryptoError> for SigningError {
    fn from(err: CryptoError) -> Self {
        SigningError::Provider(Box::new(err))
    }
}

/// A configuration error
///
/// Errors of this kind abort the operation that raised them.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The algorithm cannot be used for rotated signing keys
    #[error("'{0}' cannot be used for rotated signing keys")]
    UnsupportedAlgorithm(jws::Algorithm),

    /// A mandatory bootstrap setting is absent
    #[error("bootstrap setting '{0}' is missing")]
    MissingBootstrapValue(&'static str),

    /// The bootstrap settings file could not be read
    #[error("unable to read bootstrap settings from '{}'", path.display())]
    Bootstrap {
        /// The file that was read
        path: PathBuf,
        /// The underlying failure
        #[source]
        source: dotenvy::Error,
    },

    /// A configuration file could not be read
    #[error("unable to read configuration file '{}'", path.display())]
    File {
        /// The file that was read
        path: PathBuf,
        /// The underlying failure
        #[source]
        source: io::Error,
    },

    /// A configuration document could not be parsed
    #[error("unable to parse {payload} configuration")]
    Parse {
        /// Which payload failed
        payload: &'static str,
        /// The underlying failure
        #[source]
        source: serde_json::Error,
    },

    /// Configuration could be loaded neither from the store nor from files
    #[error("configuration could not be loaded from the store or the file system")]
    Unavailable,

    /// The store failed
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// An error raised by a key rotation pass
#[derive(Debug, Error)]
pub enum RotationError {
    /// Another writer changed the configuration record first
    #[error("configuration revision {expected} was superseded by another writer")]
    Conflict {
        /// The revision the pass was based on
        expected: u64,
    },

    /// The configuration record does not exist
    #[error("no configuration record at '{0}'")]
    MissingConfiguration(Dn),

    /// The stored key set could not be parsed
    #[error("stored key set is malformed")]
    MalformedKeySet(#[source] serde_json::Error),

    /// The updated key set could not be serialized
    #[error("unable to serialize key set")]
    Serialization(#[source] serde_json::Error),

    /// The configuration forbids the pass
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The store failed
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// An error raised by the RPT manager
#[derive(Debug, Error)]
pub enum RptError {
    /// The authorization value is not a bearer token
    #[error("authorization is not a bearer token")]
    InvalidAuthorization,

    /// No grant owns the presented access token
    #[error("no grant owns the presented access token")]
    UnknownGrant,

    /// The store failed
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// An error raised while issuing a token
#[derive(Debug, Error)]
pub enum IssueError {
    /// No live published key exists for the algorithm
    #[error("no live signing key for '{0}'")]
    NoSigningKey(jws::Algorithm),

    /// The token could not be signed
    #[error(transparent)]
    Signing(#[from] JwtSigningError),
}
