//! Implementations of the JSON Web Keys (JWK) standard
//!
//! The specifications for JSON Web Keys can be found in [RFC7517][].
//!
//! Besides the registered members, keys managed by the server carry an
//! `exp` member holding their expiration as epoch milliseconds. Keys that
//! come with an `x5c` chain get the first certificate parsed and attached.
//!
//! [RFC7517]: https://tools.ietf.org/html/rfc7517

use std::{
    convert::{TryFrom, TryInto},
    fmt,
};

use aliri_base64::{Base64, Base64Url};
use aliri_braid::braid;
use aliri_clock::UnixTime;
use openssl::x509::{X509Ref, X509};
use serde::{Deserialize, Serialize, Serializer};

use crate::{
    error, jwa,
    jws::{self, Signer, Verifier},
};

/// An identifier for a JWK
#[braid(serde, ref_doc = "A borrowed reference to JWK identifier ([`KeyId`])")]
pub struct KeyId;

/// A parsed X.509 certificate attached to a key
#[derive(Clone)]
pub struct Certificate {
    der: Base64,
    x509: X509,
}

impl Certificate {
    /// Parses a DER certificate encoded in standard base64, as found in `x5c`
    ///
    /// # Errors
    ///
    /// The value is not base64, or not a DER-encoded certificate.
    pub fn from_base64(encoded: &str) -> Result<Self, error::KeyRejected> {
        let der = Base64::from_encoded(encoded).map_err(error::key_rejected)?;
        let x509 = X509::from_der(der.as_slice()).map_err(error::key_rejected)?;
        Ok(Self { der, x509 })
    }

    /// The DER encoding of the certificate
    #[must_use]
    pub fn der(&self) -> &[u8] {
        self.der.as_slice()
    }

    /// The parsed certificate
    #[must_use]
    pub fn x509(&self) -> &X509Ref {
        &self.x509
    }
}

impl PartialEq for Certificate {
    fn eq(&self, other: &Self) -> bool {
        self.der == other.der
    }
}

impl Eq for Certificate {}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let subject: Vec<String> = self
            .x509
            .subject_name()
            .entries()
            .filter_map(|e| e.data().as_utf8().ok().map(|s| s.to_string()))
            .collect();
        f.debug_struct("Certificate")
            .field("subject", &subject)
            .finish()
    }
}

/// An identified JSON Web Key
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(try_from = "JwkDto")]
#[must_use]
pub struct Jwk {
    key_id: Option<KeyId>,
    usage: Option<jwa::Usage>,
    algorithm: Option<jws::Algorithm>,
    expires_at: Option<u64>,
    x5c: Vec<String>,
    certificate: Option<Certificate>,
    key: Key,
}

impl Jwk {
    /// The key ID
    #[must_use]
    pub fn key_id(&self) -> Option<&KeyIdRef> {
        self.key_id.as_deref()
    }

    /// The intended usage of the key
    #[must_use]
    pub fn usage(&self) -> Option<jwa::Usage> {
        self.usage
    }

    /// The algorithm to be used with this JWK
    #[must_use]
    pub fn algorithm(&self) -> Option<jws::Algorithm> {
        self.algorithm
    }

    /// The expiration of the key in epoch milliseconds, if any
    #[must_use]
    pub fn expires_at(&self) -> Option<u64> {
        self.expires_at
    }

    /// Whether the key has expired as of `now`
    ///
    /// A key expires at the instant named by `exp`. Keys without an
    /// expiration never expire.
    #[must_use]
    pub fn is_expired_at(&self, now: UnixTime) -> bool {
        match self.expires_at {
            Some(exp) => exp <= now.0.saturating_mul(1000),
            None => false,
        }
    }

    /// The raw certificate chain, as carried in `x5c`
    #[must_use]
    pub fn certificate_chain(&self) -> &[String] {
        &self.x5c
    }

    /// The first certificate of the chain, when it could be parsed
    #[must_use]
    pub fn certificate(&self) -> Option<&Certificate> {
        self.certificate.as_ref()
    }

    /// Whether the key is compatible with the given algorithm
    #[must_use]
    pub fn is_compatible(&self, alg: jws::Algorithm) -> bool {
        self.key.can_verify(alg)
    }

    /// Whether the key holds private material
    #[must_use]
    pub fn has_private_key(&self) -> bool {
        self.key.has_private_key()
    }

    /// Sets the key ID
    pub fn with_key_id(self, kid: KeyId) -> Self {
        Self {
            key_id: Some(kid),
            ..self
        }
    }

    /// Sets the key's usage
    pub fn with_usage(self, usage: jwa::Usage) -> Self {
        Self {
            usage: Some(usage),
            ..self
        }
    }

    /// Sets the algorithm and usage consistent with that algorithm
    pub fn with_algorithm(self, alg: jws::Algorithm) -> Self {
        Self {
            algorithm: Some(alg),
            usage: Some(alg.to_usage()),
            ..self
        }
    }

    /// Sets the expiration, in epoch milliseconds
    pub fn with_expiration(self, expires_at: u64) -> Self {
        Self {
            expires_at: Some(expires_at),
            ..self
        }
    }

    /// Attaches a certificate chain, parsing the first certificate
    ///
    /// A chain whose first certificate cannot be parsed is kept as-is, but
    /// no certificate is attached.
    pub fn with_certificate_chain(self, x5c: Vec<String>) -> Self {
        let certificate = parse_first_certificate(self.key_id.as_deref(), &x5c);
        Self {
            x5c,
            certificate,
            ..self
        }
    }

    /// Strips any private key components
    pub fn public_only(self) -> Self {
        Self {
            key: self.key.public_only(),
            ..self
        }
    }

    /// Computes the RFC 7638 thumbprint of the key
    ///
    /// The thumbprint is the SHA-256 digest over the required public members
    /// of the key in lexicographic order, base64url-encoded.
    pub fn thumbprint(&self) -> KeyId {
        let canonical = match &self.key {
            Key::Rsa(k) => format!(
                r#"{{"e":"{}","kty":"RSA","n":"{}"}}"#,
                k.public_key().exponent(),
                k.public_key().modulus()
            ),
            Key::EllipticCurve(k) => format!(
                r#"{{"crv":"{}","kty":"EC","x":"{}","y":"{}"}}"#,
                k.public_key().curve(),
                k.public_key().x(),
                k.public_key().y()
            ),
            Key::Hmac(k) => format!(r#"{{"k":"{}","kty":"oct"}}"#, k.secret()),
        };

        let digest = ring::digest::digest(&ring::digest::SHA256, canonical.as_bytes());
        KeyId::new(Base64Url::from_raw(digest.as_ref().to_vec()).to_string())
    }
}

fn parse_first_certificate(kid: Option<&KeyIdRef>, x5c: &[String]) -> Option<Certificate> {
    let first = x5c.first()?;
    match Certificate::from_base64(first) {
        Ok(cert) => Some(cert),
        Err(err) => {
            let error: &dyn std::error::Error = &err;
            tracing::warn!(jwk.kid = ?kid, error, "unable to parse x5c certificate");
            None
        }
    }
}

impl From<jwa::Hmac> for Jwk {
    fn from(key: jwa::Hmac) -> Self {
        Self::from_key(key.into())
    }
}

impl From<jwa::Rsa> for Jwk {
    fn from(key: jwa::Rsa) -> Self {
        Self::from_key(key.into())
    }
}

impl From<jwa::rsa::PublicKey> for Jwk {
    fn from(key: jwa::rsa::PublicKey) -> Self {
        Self::from_key(jwa::Rsa::from(key).into())
    }
}

impl From<jwa::rsa::PrivateKey> for Jwk {
    fn from(key: jwa::rsa::PrivateKey) -> Self {
        Self::from_key(jwa::Rsa::from(key).into())
    }
}

impl From<jwa::EllipticCurve> for Jwk {
    fn from(key: jwa::EllipticCurve) -> Self {
        Self::from_key(key.into())
    }
}

impl From<jwa::ec::PublicKey> for Jwk {
    fn from(key: jwa::ec::PublicKey) -> Self {
        Self::from_key(jwa::EllipticCurve::from(key).into())
    }
}

impl From<jwa::ec::PrivateKey> for Jwk {
    fn from(key: jwa::ec::PrivateKey) -> Self {
        Self::from_key(jwa::EllipticCurve::from(key).into())
    }
}

impl Jwk {
    fn from_key(key: Key) -> Self {
        Self {
            key_id: None,
            usage: None,
            algorithm: None,
            expires_at: None,
            x5c: Vec::new(),
            certificate: None,
            key,
        }
    }
}

impl Verifier for Jwk {
    type Algorithm = jws::Algorithm;
    type Error = error::JwkVerifyError;

    fn can_verify(&self, alg: Self::Algorithm) -> bool {
        self.key.can_verify(alg)
    }

    fn verify(
        &self,
        alg: Self::Algorithm,
        data: &[u8],
        signature: &[u8],
    ) -> Result<(), Self::Error> {
        if let Some(u) = self.usage {
            if u != jwa::Usage::Signing {
                return Err(error::jwk_usage_mismatch().into());
            }
        }

        match self.algorithm {
            Some(key_alg) if key_alg == alg => {}
            Some(_) => {
                return Err(error::incompatible_algorithm(alg).into());
            }
            None => {}
        }

        self.key.verify(alg, data, signature)
    }
}

impl Signer for Jwk {
    type Algorithm = jws::Algorithm;
    type Error = error::SigningError;

    fn can_sign(&self, alg: Self::Algorithm) -> bool {
        self.key.can_sign(alg)
    }

    fn sign(&self, alg: Self::Algorithm, data: &[u8]) -> Result<Vec<u8>, Self::Error> {
        if let Some(u) = self.usage {
            if u != jwa::Usage::Signing {
                return Err(error::jwk_usage_mismatch().into());
            }
        }

        match self.algorithm {
            Some(key_alg) if key_alg == alg => {}
            Some(_) => {
                return Err(error::incompatible_algorithm(alg).into());
            }
            None => {}
        }

        self.key.sign(alg, data)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct JwkDto {
    #[serde(rename = "kid", default)]
    key_id: Option<KeyId>,

    #[serde(rename = "use", default)]
    usage: Option<jwa::Usage>,

    #[serde(rename = "alg", default)]
    algorithm: Option<jws::Algorithm>,

    #[serde(rename = "exp", default)]
    expires_at: Option<u64>,

    #[serde(default)]
    x5c: Vec<String>,

    #[serde(flatten)]
    key: Key,
}

impl TryFrom<JwkDto> for Jwk {
    type Error = error::IncompatibleAlgorithm;

    fn try_from(dto: JwkDto) -> Result<Self, Self::Error> {
        if let Some(alg) = dto.algorithm {
            if !dto.key.can_verify(alg) {
                return Err(error::incompatible_algorithm(alg));
            }
        }

        let certificate = parse_first_certificate(dto.key_id.as_deref(), &dto.x5c);

        Ok(Self {
            key_id: dto.key_id,
            usage: dto.usage,
            algorithm: dto.algorithm,
            expires_at: dto.expires_at,
            x5c: dto.x5c,
            certificate,
            key: dto.key,
        })
    }
}

#[derive(Serialize)]
struct JwkDtoRef<'a> {
    #[serde(rename = "kid", skip_serializing_if = "Option::is_none")]
    key_id: Option<&'a KeyIdRef>,

    #[serde(rename = "use", skip_serializing_if = "Option::is_none")]
    usage: Option<jwa::Usage>,

    #[serde(rename = "alg", skip_serializing_if = "Option::is_none")]
    algorithm: Option<jws::Algorithm>,

    #[serde(rename = "exp", skip_serializing_if = "Option::is_none")]
    expires_at: Option<u64>,

    #[serde(skip_serializing_if = "no_certificates")]
    x5c: &'a [String],

    #[serde(flatten)]
    key: &'a Key,
}

fn no_certificates(x5c: &&[String]) -> bool {
    x5c.is_empty()
}

impl Serialize for Jwk {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let dto = JwkDtoRef {
            key_id: self.key_id(),
            usage: self.usage(),
            algorithm: self.algorithm(),
            expires_at: self.expires_at,
            x5c: &self.x5c,
            key: &self.key,
        };
        dto.serialize(serializer)
    }
}

/// The key material of a JSON Web Key
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kty")]
enum Key {
    /// RSA
    #[serde(rename = "RSA")]
    Rsa(jwa::Rsa),

    /// Elliptic curve cryptography
    #[serde(rename = "EC")]
    EllipticCurve(jwa::EllipticCurve),

    /// HMAC symmetric
    #[serde(rename = "oct")]
    Hmac(jwa::Hmac),
}

impl Key {
    fn public_only(self) -> Self {
        match self {
            Self::Rsa(k) => Self::Rsa(k.public_only()),
            Self::EllipticCurve(k) => Self::EllipticCurve(k.public_only()),
            Self::Hmac(_) => self,
        }
    }

    fn has_private_key(&self) -> bool {
        match self {
            Self::Rsa(k) => k.has_private_key(),
            Self::EllipticCurve(k) => k.has_private_key(),
            Self::Hmac(_) => true,
        }
    }
}

impl From<jwa::Hmac> for Key {
    fn from(key: jwa::Hmac) -> Self {
        Self::Hmac(key)
    }
}

impl From<jwa::Rsa> for Key {
    fn from(key: jwa::Rsa) -> Self {
        Self::Rsa(key)
    }
}

impl From<jwa::EllipticCurve> for Key {
    fn from(key: jwa::EllipticCurve) -> Self {
        Self::EllipticCurve(key)
    }
}

impl Verifier for Key {
    type Algorithm = jws::Algorithm;
    type Error = error::JwkVerifyError;

    fn can_verify(&self, alg: Self::Algorithm) -> bool {
        match self {
            Self::Rsa(p) => alg.try_into().map_or(false, |alg| p.can_verify(alg)),
            Self::Hmac(p) => alg.try_into().map_or(false, |alg| p.can_verify(alg)),
            Self::EllipticCurve(p) => alg.try_into().map_or(false, |alg| p.can_verify(alg)),
        }
    }

    fn verify(
        &self,
        alg: Self::Algorithm,
        data: &[u8],
        signature: &[u8],
    ) -> Result<(), Self::Error> {
        match self {
            Self::Hmac(p) => p.verify(alg.try_into()?, data, signature)?,
            Self::Rsa(p) => p.verify(alg.try_into()?, data, signature)?,
            Self::EllipticCurve(p) => {
                let alg = alg.try_into()?;
                if !p.can_verify(alg) {
                    return Err(error::incompatible_algorithm(alg).into());
                }
                p.verify(alg, data, signature)?
            }
        }

        Ok(())
    }
}

impl Signer for Key {
    type Algorithm = jws::Algorithm;
    type Error = error::SigningError;

    fn can_sign(&self, alg: Self::Algorithm) -> bool {
        match self {
            Self::Rsa(p) => alg.try_into().map_or(false, |alg| p.can_sign(alg)),
            Self::Hmac(p) => alg.try_into().map_or(false, |alg| p.can_sign(alg)),
            Self::EllipticCurve(p) => alg.try_into().map_or(false, |alg| p.can_sign(alg)),
        }
    }

    fn sign(&self, alg: Self::Algorithm, data: &[u8]) -> Result<Vec<u8>, Self::Error> {
        match self {
            Self::Hmac(p) => Ok(p.sign(alg.try_into()?, data)?),
            Self::Rsa(p) => p.sign(alg.try_into()?, data),
            Self::EllipticCurve(p) => p.sign(alg.try_into()?, data),
        }
    }
}
