//! ECC JSON Web Algorithm implementations
//!
//! `ES256` and `ES384` are backed by `ring`. `ring` has no P-521 support, so
//! `ES512` signatures are produced and checked through OpenSSL instead.
//! All signatures use the fixed-width `r || s` encoding from RFC 7518.

use std::{convert::TryFrom, fmt};

use openssl::{
    ec::{EcGroup, EcGroupRef},
    error::ErrorStack,
    nid::Nid,
};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{error, jws};

mod private;
mod public;

pub use private::PrivateKey;
pub use public::PublicKey;

/// A named ECC curve
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Curve {
    /// The P-256 curve (prime256v1/secp256r1)
    #[serde(rename = "P-256")]
    P256,

    /// The P-384 curve (secp384r1)
    #[serde(rename = "P-384")]
    P384,

    /// The P-521 curve (secp521r1)
    #[serde(rename = "P-521")]
    P521,
}

impl Curve {
    fn nid(self) -> Nid {
        match self {
            Curve::P256 => Nid::X9_62_PRIME256V1,
            Curve::P384 => Nid::SECP384R1,
            Curve::P521 => Nid::SECP521R1,
        }
    }

    fn to_group(self) -> Result<EcGroup, ErrorStack> {
        EcGroup::from_curve_name(self.nid())
    }

    fn from_group(group: &EcGroupRef) -> Option<Self> {
        let nid = group.curve_name()?;
        [Curve::P256, Curve::P384, Curve::P521]
            .into_iter()
            .find(|c| c.nid() == nid)
    }

    /// The size in bytes of one coordinate, and of each half of a signature
    #[must_use]
    pub const fn coordinate_size(self) -> usize {
        match self {
            Curve::P256 => 32,
            Curve::P384 => 48,
            Curve::P521 => 66,
        }
    }

    /// The registered name of the curve
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Curve::P256 => "P-256",
            Curve::P384 => "P-384",
            Curve::P521 => "P-521",
        }
    }
}

/// Elliptic curve cryptography key
///
/// Serialization only ever emits the public point.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct EllipticCurve {
    key: MaybePrivate,
}

#[derive(Debug, Clone, Eq, PartialEq)]
enum MaybePrivate {
    PublicAndPrivate(PrivateKey),
    PublicOnly(PublicKey),
}

impl EllipticCurve {
    /// Generates a newly minted key pair using the specified curve
    ///
    /// # Errors
    ///
    /// Unable to generate a private key.
    pub fn generate(curve: Curve) -> Result<Self, error::Unexpected> {
        let private_key = PrivateKey::generate(curve)?;

        Ok(Self::from(private_key))
    }

    /// Constructs a key pair from a PKCS#8 PEM file
    ///
    /// # Errors
    ///
    /// The provided PEM file is not a valid ECC private key on a supported curve.
    pub fn private_key_from_pem(pem: &str) -> Result<Self, error::KeyRejected> {
        let private_key = PrivateKey::from_pem(pem)?;

        Ok(Self::from(private_key))
    }

    pub(crate) fn private_key(&self) -> Option<&PrivateKey> {
        match &self.key {
            MaybePrivate::PublicAndPrivate(p) => Some(p),
            MaybePrivate::PublicOnly(_) => None,
        }
    }

    /// The public half of the key
    pub fn public_key(&self) -> &PublicKey {
        match &self.key {
            MaybePrivate::PublicAndPrivate(p) => p.public_key(),
            MaybePrivate::PublicOnly(p) => p,
        }
    }

    /// Whether the private half of the key is present
    #[must_use]
    pub fn has_private_key(&self) -> bool {
        self.private_key().is_some()
    }

    /// Removes the private key components
    pub fn public_only(self) -> Self {
        match self.key {
            MaybePrivate::PublicAndPrivate(p) => Self::from(p.into_public_key()),
            MaybePrivate::PublicOnly(_) => self,
        }
    }
}

/// Elliptic curve cryptography signing algorithms
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
#[allow(clippy::upper_case_acronyms)]
pub enum SigningAlgorithm {
    /// ECDSA using the P-256 curve and SHA-256
    ES256,
    /// ECDSA using the P-384 curve and SHA-384
    ES384,
    /// ECDSA using the P-521 curve and SHA-512
    ES512,
}

impl From<SigningAlgorithm> for jws::Algorithm {
    fn from(alg: SigningAlgorithm) -> Self {
        Self::EllipticCurve(alg)
    }
}

impl TryFrom<jws::Algorithm> for SigningAlgorithm {
    type Error = error::IncompatibleAlgorithm;

    fn try_from(alg: jws::Algorithm) -> Result<Self, Self::Error> {
        match alg {
            jws::Algorithm::EllipticCurve(alg) => Ok(alg),
            _ => Err(error::incompatible_algorithm(alg)),
        }
    }
}

impl SigningAlgorithm {
    fn ring_verification_algorithm(
        self,
    ) -> Option<&'static ring::signature::EcdsaVerificationAlgorithm> {
        match self {
            Self::ES256 => Some(&ring::signature::ECDSA_P256_SHA256_FIXED),
            Self::ES384 => Some(&ring::signature::ECDSA_P384_SHA384_FIXED),
            Self::ES512 => None,
        }
    }

    fn ring_signing_algorithm(self) -> Option<&'static ring::signature::EcdsaSigningAlgorithm> {
        match self {
            Self::ES256 => Some(&ring::signature::ECDSA_P256_SHA256_FIXED_SIGNING),
            Self::ES384 => Some(&ring::signature::ECDSA_P384_SHA384_FIXED_SIGNING),
            Self::ES512 => None,
        }
    }

    /// Size in bytes of an ECDSA signature
    #[must_use]
    pub const fn signature_size(self) -> usize {
        match self {
            Self::ES256 => 64,
            Self::ES384 => 96,
            Self::ES512 => 132,
        }
    }

    /// The registered name of the algorithm
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ES256 => "ES256",
            Self::ES384 => "ES384",
            Self::ES512 => "ES512",
        }
    }
}

impl From<SigningAlgorithm> for Curve {
    fn from(alg: SigningAlgorithm) -> Self {
        match alg {
            SigningAlgorithm::ES256 => Self::P256,
            SigningAlgorithm::ES384 => Self::P384,
            SigningAlgorithm::ES512 => Self::P521,
        }
    }
}

impl From<Curve> for SigningAlgorithm {
    fn from(crv: Curve) -> Self {
        match crv {
            Curve::P256 => Self::ES256,
            Curve::P384 => Self::ES384,
            Curve::P521 => Self::ES512,
        }
    }
}

impl jws::Verifier for EllipticCurve {
    type Algorithm = SigningAlgorithm;
    type Error = error::SignatureMismatch;

    fn can_verify(&self, alg: Self::Algorithm) -> bool {
        self.public_key().can_verify(alg)
    }

    fn verify(
        &self,
        alg: Self::Algorithm,
        data: &[u8],
        signature: &[u8],
    ) -> Result<(), Self::Error> {
        self.public_key().verify(alg, data, signature)
    }
}

impl jws::Signer for EllipticCurve {
    type Algorithm = SigningAlgorithm;
    type Error = error::SigningError;

    fn can_sign(&self, alg: Self::Algorithm) -> bool {
        if let Some(p) = self.private_key() {
            p.can_sign(alg)
        } else {
            false
        }
    }

    fn sign(&self, alg: Self::Algorithm, data: &[u8]) -> Result<Vec<u8>, Self::Error> {
        if let Some(p) = self.private_key() {
            p.sign(alg, data)
        } else {
            Err(error::missing_private_key().into())
        }
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Curve {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<PublicKey> for EllipticCurve {
    fn from(key: PublicKey) -> Self {
        Self {
            key: MaybePrivate::PublicOnly(key),
        }
    }
}

impl From<PrivateKey> for EllipticCurve {
    fn from(key: PrivateKey) -> Self {
        Self {
            key: MaybePrivate::PublicAndPrivate(key),
        }
    }
}

impl Serialize for EllipticCurve {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.public_key().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for EllipticCurve {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        PublicKey::deserialize(deserializer).map(Self::from)
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;

    use super::*;
    use crate::jws::{Signer, Verifier};

    #[test]
    fn each_curve_signs_with_fixed_width_signatures() -> Result<()> {
        for alg in [
            SigningAlgorithm::ES256,
            SigningAlgorithm::ES384,
            SigningAlgorithm::ES512,
        ] {
            let key = EllipticCurve::generate(Curve::from(alg))?;
            let sig = key.sign(alg, b"warden")?;

            assert_eq!(sig.len(), alg.signature_size(), "{}", alg);
            assert!(key.verify(alg, b"warden", &sig).is_ok(), "{}", alg);
            assert!(key.verify(alg, b"warden!", &sig).is_err(), "{}", alg);
        }

        Ok(())
    }

    #[test]
    fn p521_signature_verifies_with_public_half_only() -> Result<()> {
        let key = EllipticCurve::generate(Curve::P521)?;
        let sig = key.sign(SigningAlgorithm::ES512, b"payload")?;

        let public = key.public_only();
        assert!(!public.has_private_key());
        assert!(public
            .verify(SigningAlgorithm::ES512, b"payload", &sig)
            .is_ok());
        Ok(())
    }

    #[test]
    fn curve_mismatch_is_refused() -> Result<()> {
        let key = EllipticCurve::generate(Curve::P256)?;
        assert!(!key.can_sign(SigningAlgorithm::ES384));
        assert!(!key.can_verify(SigningAlgorithm::ES512));
        assert!(key.sign(SigningAlgorithm::ES384, b"data").is_err());
        Ok(())
    }

    #[test]
    fn truncated_p521_signature_is_a_mismatch() -> Result<()> {
        let key = EllipticCurve::generate(Curve::P521)?;
        let sig = key.sign(SigningAlgorithm::ES512, b"payload")?;
        assert!(key
            .verify(SigningAlgorithm::ES512, b"payload", &sig[..131])
            .is_err());
        Ok(())
    }
}
