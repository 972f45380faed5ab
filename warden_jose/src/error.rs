//! Errors raised while handling keys and tokens

#![allow(missing_copy_implementations)]

use std::error::Error as StdError;

use thiserror::Error;

use crate::jws;

/// The key cannot be used with the requested algorithm
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Error)]
#[error("key incompatible with algorithm '{alg}'")]
pub struct IncompatibleAlgorithm {
    alg: jws::Algorithm,
}

impl IncompatibleAlgorithm {
    /// The algorithm that was requested
    #[must_use]
    pub fn algorithm(&self) -> jws::Algorithm {
        self.alg
    }
}

#[inline]
pub(crate) fn incompatible_algorithm(alg: impl Into<jws::Algorithm>) -> IncompatibleAlgorithm {
    IncompatibleAlgorithm { alg: alg.into() }
}

/// The provided name could not be matched with supported algorithms
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("'{alg}' does not match supported algorithms")]
pub struct UnknownAlgorithm {
    alg: String,
}

impl UnknownAlgorithm {
    /// The name that failed to match
    #[must_use]
    pub fn name(&self) -> &str {
        &self.alg
    }
}

#[inline]
pub(crate) fn unknown_algorithm(alg: String) -> UnknownAlgorithm {
    UnknownAlgorithm { alg }
}

/// A boxed error from a lower layer
type Source = Box<dyn StdError + Send + Sync + 'static>;

/// Declares an error that carries no detail beyond its kind
macro_rules! marker_error {
    ($(#[$doc:meta])* $name:ident, $ctor:ident, $msg:tt) => {
        $(#[$doc])*
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Error)]
        #[error($msg)]
        pub struct $name {
            _p: (),
        }

        pub(crate) const fn $ctor() -> $name {
            $name { _p: () }
        }
    };
}

/// Declares an error that wraps the failure that caused it
macro_rules! wrapping_error {
    ($(#[$doc:meta])* $name:ident, $ctor:ident, $msg:tt) => {
        $(#[$doc])*
        #[derive(Debug, Error)]
        #[error($msg)]
        pub struct $name {
            #[from]
            source: Source,
        }

        pub(crate) fn $ctor(source: impl Into<Source>) -> $name {
            $name {
                source: source.into(),
            }
        }
    };
}

marker_error! {
    /// The key's declared use forbids this operation
    JwkUsageMismatch, jwk_usage_mismatch, "JWK cannot be used in this way"
}

marker_error! {
    /// The token does not split into a header, a payload and a signature
    MalformedJwt, malformed_jwt, "malformed JWT"
}

marker_error! {
    /// The signature does not match the signed data
    SignatureMismatch, signature_mismatch, "signature mismatch"
}

marker_error! {
    /// Signing needs the private half of the key, which is absent
    MissingPrivateKey, missing_private_key, "cannot sign without a private key"
}

wrapping_error! {
    /// The token header cannot be decoded or encoded
    MalformedJwtHeader, malformed_jwt_header, "malformed JWT header"
}

wrapping_error! {
    /// The token payload cannot be decoded or encoded
    MalformedJwtPayload, malformed_jwt_payload, "malformed JWT payload"
}

wrapping_error! {
    /// The token signature is not valid base64url
    MalformedJwtSignature, malformed_jwt_signature, "malformed JWT signature"
}

wrapping_error! {
    /// The key material was refused by the crypto backend
    KeyRejected, key_rejected, "key rejected"
}

wrapping_error! {
    /// The crypto backend failed in a way the caller cannot act on
    Unexpected, unexpected, "unexpected error"
}

/// An error occurring while creating a signature
#[derive(Debug, Error)]
pub enum SigningError {
    /// The key cannot be used for signing operations
    #[error(transparent)]
    MissingPrivateKey(#[from] MissingPrivateKey),

    /// JWK cannot be used for signature creation
    #[error(transparent)]
    JwkUsageMismatch(#[from] JwkUsageMismatch),

    /// Key cannot be used with this algorithm
    #[error(transparent)]
    IncompatibleAlgorithm(#[from] IncompatibleAlgorithm),

    /// An unexpected error
    #[error(transparent)]
    Unexpected(#[from] Unexpected),

    /// The private key is held elsewhere, and the holder failed to sign
    #[error("key provider failed to sign")]
    Provider(#[source] Source),
}

impl From<std::convert::Infallible> for SigningError {
    fn from(x: std::convert::Infallible) -> Self {
        match x {}
    }
}

/// An error occurring while verifying a signature with a JWK
#[derive(Debug, Error)]
pub enum JwkVerifyError {
    /// Key cannot be used with this algorithm
    #[error(transparent)]
    IncompatibleAlgorithm(#[from] IncompatibleAlgorithm),

    /// JWK cannot be used for signature verification
    #[error(transparent)]
    JwkUsageMismatch(#[from] JwkUsageMismatch),

    /// Signature is invalid
    #[error(transparent)]
    SignatureMismatch(#[from] SignatureMismatch),

    /// An unexpected error
    #[error(transparent)]
    Unexpected(#[from] Unexpected),
}

impl JwkVerifyError {
    /// Whether the error is due to an incompatible algorithm
    #[must_use]
    pub fn is_incompatible_alg(&self) -> bool {
        matches!(self, Self::IncompatibleAlgorithm(_))
    }

    /// Whether the error is due to a usage mismatch
    #[must_use]
    pub fn is_usage_mismatch(&self) -> bool {
        matches!(self, Self::JwkUsageMismatch(_))
    }

    /// Whether the error is due to a signature mismatch
    #[must_use]
    pub fn is_signature_mismatch(&self) -> bool {
        matches!(self, Self::SignatureMismatch(_))
    }
}

/// An error occurring while verifying a JWT
#[derive(Debug, Error)]
pub enum JwtVerifyError {
    /// The JWT was rejected by the key
    #[error("token rejected by key")]
    JwkVerifyError(#[from] JwkVerifyError),

    /// The JWT header names a different algorithm than the one expected
    #[error(transparent)]
    IncompatibleAlgorithm(#[from] IncompatibleAlgorithm),

    /// The JWT is malformed, without a discernible header, payload, and signature
    #[error(transparent)]
    MalformedToken(#[from] MalformedJwt),

    /// The JWT header is malformed
    #[error(transparent)]
    MalformedTokenHeader(#[from] MalformedJwtHeader),

    /// The JWT payload is malformed
    #[error(transparent)]
    MalformedTokenPayload(#[from] MalformedJwtPayload),

    /// The JWT signature is malformed
    #[error(transparent)]
    MalformedTokenSignature(#[from] MalformedJwtSignature),
}

impl From<SignatureMismatch> for JwtVerifyError {
    fn from(err: SignatureMismatch) -> Self {
        Self::JwkVerifyError(err.into())
    }
}

/// An error occurring while signing a JWT
#[derive(Debug, Error)]
pub enum JwtSigningError {
    /// The key refused to produce a signature
    #[error(transparent)]
    SigningError(#[from] SigningError),

    /// The JWT header was malformed and could not be serialized
    #[error(transparent)]
    MalformedJwtHeader(#[from] MalformedJwtHeader),

    /// The JWT payload was malformed and could not be serialized
    #[error(transparent)]
    MalformedJwtPayload(#[from] MalformedJwtPayload),
}
