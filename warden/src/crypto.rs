//! Custody of private signing keys
//!
//! Private key material never enters the published key set. A
//! [`CryptoProvider`] generates key pairs, keeps the private halves, and
//! signs on request by key ID.

use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::Arc,
};

use parking_lot::Mutex;
use warden_jose::{
    jwa::{self, ec::Curve},
    jwk::{KeyId, KeyIdRef},
    jws::{self, Signer},
    Jwk,
};

use crate::error::CryptoError;

/// Holds private keys on behalf of the server
pub trait CryptoProvider: fmt::Debug + Send + Sync {
    /// Generates a key pair for the algorithm, keeping the private half
    ///
    /// Returns the public key, with its ID set to its thumbprint and its
    /// expiration set to `expires_at` epoch milliseconds.
    fn generate_key(&self, alg: jws::Algorithm, expires_at: u64) -> Result<Jwk, CryptoError>;

    /// Signs `data` with the private key held under `kid`
    fn sign(&self, kid: &KeyIdRef, alg: jws::Algorithm, data: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Destroys the private key held under `kid`
    fn delete_key(&self, kid: &KeyIdRef) -> Result<(), CryptoError>;

    /// Whether a private key is held under `kid`
    fn contains_key(&self, kid: &KeyIdRef) -> bool;
}

/// A crypto provider that keeps keys in process memory
///
/// Deletions are recorded so they can be audited, and generation or
/// deletion can be made to fail for individual algorithms or keys.
#[derive(Default)]
pub struct InMemoryCryptoProvider {
    keys: Mutex<HashMap<KeyId, Jwk>>,
    deleted: Mutex<Vec<KeyId>>,
    failing_algorithms: Mutex<HashSet<jws::Algorithm>>,
    failing_deletions: Mutex<HashSet<KeyId>>,
}

impl InMemoryCryptoProvider {
    /// Constructs an empty provider
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The IDs of every key deleted so far, in order
    #[must_use]
    pub fn deleted(&self) -> Vec<KeyId> {
        self.deleted.lock().clone()
    }

    /// The number of keys held
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.lock().len()
    }

    /// Whether no keys are held
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Takes custody of an existing private key
    ///
    /// Returns the public half, with its ID set to the thumbprint when it
    /// did not already have one.
    pub fn import(&self, key: Jwk) -> Jwk {
        let kid = match key.key_id() {
            Some(kid) => kid.to_owned(),
            None => key.thumbprint(),
        };
        let key = key.with_key_id(kid.clone());
        let public = key.clone().public_only();
        self.keys.lock().insert(kid, key);
        public
    }

    /// Makes generation fail for the algorithm
    pub fn fail_generation_for(&self, alg: jws::Algorithm) {
        self.failing_algorithms.lock().insert(alg);
    }

    /// Makes deletion fail for the key
    pub fn fail_deletion_of(&self, kid: KeyId) {
        self.failing_deletions.lock().insert(kid);
    }
}

impl fmt::Debug for InMemoryCryptoProvider {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("InMemoryCryptoProvider")
            .field("keys", &self.len())
            .finish()
    }
}

impl CryptoProvider for InMemoryCryptoProvider {
    fn generate_key(&self, alg: jws::Algorithm, expires_at: u64) -> Result<Jwk, CryptoError> {
        let failing = self.failing_algorithms.lock().contains(&alg);
        if failing {
            return Err(CryptoError::Provider(format!(
                "generation for '{}' refused",
                alg
            )));
        }

        let key = match alg {
            jws::Algorithm::Rsa(_) => Jwk::from(jwa::Rsa::generate()?),
            jws::Algorithm::EllipticCurve(ec) => {
                Jwk::from(jwa::EllipticCurve::generate(Curve::from(ec))?)
            }
            jws::Algorithm::Hmac(_) | jws::Algorithm::Unsecured => {
                return Err(CryptoError::UnsupportedAlgorithm(alg))
            }
        };

        let kid = key.thumbprint();
        let key = key
            .with_key_id(kid.clone())
            .with_algorithm(alg)
            .with_expiration(expires_at);
        let public = key.clone().public_only();

        self.keys.lock().insert(kid, key);

        Ok(public)
    }

    fn sign(&self, kid: &KeyIdRef, alg: jws::Algorithm, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let keys = self.keys.lock();
        let key = keys
            .get(kid)
            .ok_or_else(|| CryptoError::UnknownKey(kid.to_owned()))?;
        key.sign(alg, data).map_err(CryptoError::Signing)
    }

    fn delete_key(&self, kid: &KeyIdRef) -> Result<(), CryptoError> {
        let failing = self.failing_deletions.lock().contains(kid);
        if failing {
            return Err(CryptoError::Provider(format!(
                "deletion of '{}' refused",
                kid
            )));
        }

        self.keys.lock().remove(kid);
        self.deleted.lock().push(kid.to_owned());
        Ok(())
    }

    fn contains_key(&self, kid: &KeyIdRef) -> bool {
        self.keys.lock().contains_key(kid)
    }
}

/// Signs with a key held by a crypto provider, addressed by its ID
#[derive(Clone, Debug)]
pub struct ProviderSigner {
    provider: Arc<dyn CryptoProvider>,
    kid: KeyId,
}

impl ProviderSigner {
    /// A signer for the key held under `kid`
    pub fn new(provider: Arc<dyn CryptoProvider>, kid: KeyId) -> Self {
        Self { provider, kid }
    }

    /// The ID of the signing key
    pub fn key_id(&self) -> &KeyIdRef {
        &self.kid
    }
}

impl Signer for ProviderSigner {
    type Algorithm = jws::Algorithm;
    type Error = CryptoError;

    fn can_sign(&self, _alg: Self::Algorithm) -> bool {
        self.provider.contains_key(&self.kid)
    }

    fn sign(&self, alg: Self::Algorithm, data: &[u8]) -> Result<Vec<u8>, Self::Error> {
        self.provider.sign(&self.kid, alg, data)
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;
    use warden_jose::jwt;

    use super::*;

    #[test]
    fn generated_keys_are_public_and_thumbprinted() -> Result<()> {
        let provider = InMemoryCryptoProvider::new();
        let key = provider.generate_key(jws::Algorithm::ES256, 42_000)?;

        assert!(!key.has_private_key());
        assert_eq!(key.key_id(), Some(&*key.thumbprint()));
        assert_eq!(key.algorithm(), Some(jws::Algorithm::ES256));
        assert_eq!(key.expires_at(), Some(42_000));
        assert!(provider.contains_key(&key.thumbprint()));
        Ok(())
    }

    #[test]
    fn generated_keys_are_published_for_signing() -> Result<()> {
        let provider = InMemoryCryptoProvider::new();

        for alg in [jws::Algorithm::RS256, jws::Algorithm::ES384] {
            let key = provider.generate_key(alg, 0)?;
            assert_eq!(key.usage(), Some(jwa::Usage::Signing));

            let published = serde_json::to_value(&key)?;
            assert_eq!(published["use"], "sig");
            assert_eq!(published["alg"], alg.as_str());
        }
        Ok(())
    }

    #[test]
    fn symmetric_algorithms_are_not_generated() {
        let provider = InMemoryCryptoProvider::new();
        let result = provider.generate_key(jws::Algorithm::HS256, 0);
        assert!(matches!(
            result,
            Err(CryptoError::UnsupportedAlgorithm(jws::Algorithm::HS256))
        ));
    }

    #[test]
    fn deletion_is_recorded_and_removes_the_key() -> Result<()> {
        let provider = InMemoryCryptoProvider::new();
        let key = provider.generate_key(jws::Algorithm::ES384, 0)?;
        let kid = key.thumbprint();

        provider.delete_key(&kid)?;
        assert!(!provider.contains_key(&kid));
        assert_eq!(provider.deleted(), vec![kid]);
        Ok(())
    }

    #[test]
    fn provider_signer_produces_verifiable_tokens() -> Result<()> {
        let provider = Arc::new(InMemoryCryptoProvider::new());
        let public = provider.generate_key(jws::Algorithm::ES512, 0)?;
        let kid = public.thumbprint();

        let signer = ProviderSigner::new(provider.clone(), kid.clone());
        let headers = jwt::Headers::new(jws::Algorithm::ES512).with_key_id(kid);
        let token = jwt::encode(&headers, &serde_json::json!({ "sub": "warden" }), &signer)?;

        assert!(jwt::verify(&token, jws::Algorithm::ES512, &public));
        Ok(())
    }

    #[test]
    fn signing_with_unknown_key_fails() {
        let provider = Arc::new(InMemoryCryptoProvider::new());
        let signer = ProviderSigner::new(provider, KeyId::from_static("missing"));
        let headers = jwt::Headers::new(jws::Algorithm::ES256);

        let result = jwt::encode(&headers, &serde_json::json!({}), &signer);
        assert!(result.is_err());
    }
}
