//! Key resolution for verification, and key selection for issuing
//!
//! Verification looks keys up in the local key set first. Keys it does not
//! hold may be fetched from a remote key set, which is cached until a later
//! miss forces another fetch.

use std::sync::Arc;

use aliri_clock::{Clock, System};
use arc_swap::{ArcSwap, ArcSwapOption};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tokio::task::JoinHandle;
use warden_jose::{
    jwa,
    jwk::KeyIdRef,
    jws,
    jwt::{self, Headers},
    Jwk, Jwks, Jwt, JwtRef,
};

use crate::{
    config::{ConfigSnapshot, ConfigWatch},
    crypto::{CryptoProvider, ProviderSigner},
    error::IssueError,
};

#[derive(Debug)]
struct RemoteOptions {
    jwks_uri: String,
    client: Client,
}

#[derive(Debug)]
struct Inner {
    local: ArcSwap<Jwks>,
    remote: ArcSwapOption<Jwks>,
    remote_opts: Option<RemoteOptions>,
}

/// Resolves the keys that verify tokens
///
/// Clones share the same key sets.
#[derive(Clone, Debug)]
pub struct KeyResolver {
    inner: Arc<Inner>,
}

impl KeyResolver {
    /// A resolver over a local key set only
    pub fn new(jwks: Jwks) -> Self {
        Self {
            inner: Arc::new(Inner {
                local: ArcSwap::from_pointee(jwks),
                remote: ArcSwapOption::empty(),
                remote_opts: None,
            }),
        }
    }

    /// A resolver that falls back to the key set published at `jwks_uri`
    ///
    /// # Errors
    ///
    /// The HTTP client could not be constructed.
    pub fn with_remote(jwks: Jwks, jwks_uri: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(concat!("warden/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            inner: Arc::new(Inner {
                local: ArcSwap::from_pointee(jwks),
                remote: ArcSwapOption::empty(),
                remote_opts: Some(RemoteOptions {
                    jwks_uri: jwks_uri.into(),
                    client,
                }),
            }),
        })
    }

    /// A resolver over the snapshot's key set
    ///
    /// Falls back to the key set at the configured `jwksUri` when one is
    /// set.
    ///
    /// # Errors
    ///
    /// The HTTP client could not be constructed.
    pub fn from_snapshot(snapshot: &ConfigSnapshot) -> Result<Self, reqwest::Error> {
        match &snapshot.app.jwks_uri {
            Some(jwks_uri) => Self::with_remote(snapshot.jwks.clone(), jwks_uri.as_str()),
            None => Ok(Self::new(snapshot.jwks.clone())),
        }
    }

    /// Replaces the local key set
    pub fn set_local(&self, jwks: Jwks) {
        self.inner.local.store(Arc::new(jwks));
    }

    /// The local key set
    #[must_use]
    pub fn local_keys(&self) -> Arc<Jwks> {
        self.inner.local.load_full()
    }

    /// Finds the key to verify with for the key ID hint and algorithm
    ///
    /// The local key set is searched, then the cached remote key set. If
    /// neither holds the key, the remote key set is fetched again and
    /// searched once more.
    pub async fn resolve(&self, kid: Option<&KeyIdRef>, alg: jws::Algorithm) -> Option<Jwk> {
        if let Some(key) = self.inner.local.load().get_key_by_opt(kid, alg) {
            return Some(key.clone());
        }

        self.inner.remote_opts.as_ref()?;

        if let Some(remote) = self.inner.remote.load_full() {
            if let Some(key) = remote.get_key_by_opt(kid, alg) {
                return Some(key.clone());
            }
        }

        tracing::debug!(jwk.kid = ?kid, %alg, "key not found locally; fetching remote key set");
        let remote = self.fetch_remote().await?;
        let key = remote.get_key_by_opt(kid, alg).cloned();
        if key.is_none() {
            tracing::debug!(jwk.kid = ?kid, %alg, "key not found in remote key set");
        }
        key
    }

    /// Fetches the remote key set and caches it
    ///
    /// Only a `200 OK` with a key set body counts. Anything else is logged
    /// and leaves the cache untouched.
    #[tracing::instrument(skip(self), fields(jwks.url = tracing::field::Empty))]
    pub async fn fetch_remote(&self) -> Option<Arc<Jwks>> {
        let remote = self.inner.remote_opts.as_ref()?;
        let span = tracing::Span::current();
        span.record("jwks.url", remote.jwks_uri.as_str());

        let response = match remote.client.get(&remote.jwks_uri).send().await {
            Ok(response) => response,
            Err(err) => {
                let error: &dyn std::error::Error = &err;
                tracing::warn!(error, "remote key set fetch failed");
                return None;
            }
        };

        if response.status() != StatusCode::OK {
            tracing::warn!(
                http.status_code = response.status().as_u16(),
                "remote key set fetch failed; unexpected response status",
            );
            return None;
        }

        match response.json::<Jwks>().await {
            Ok(jwks) => {
                let jwks = Arc::new(jwks);
                self.inner.remote.store(Some(jwks.clone()));
                tracing::info!(jwks.len = jwks.len(), "remote key set refreshed");
                Some(jwks)
            }
            Err(err) => {
                let error: &dyn std::error::Error = &err;
                tracing::warn!(error, "remote key set fetch failed; unparsable body");
                None
            }
        }
    }

    /// Verifies a token's signature with the key its header names
    ///
    /// Returns `false` when the token is malformed, the key cannot be
    /// resolved, or the signature does not verify.
    pub async fn verify_token(&self, token: &JwtRef, alg: jws::Algorithm) -> bool {
        let decomposed = match token.decompose() {
            Ok(decomposed) => decomposed,
            Err(err) => {
                let error: &dyn std::error::Error = &err;
                tracing::debug!(error, "token rejected; malformed");
                return false;
            }
        };

        if alg == jws::Algorithm::NONE {
            return decomposed.verify(alg, &jwa::Unsecured).is_ok();
        }

        let key = match self.resolve(decomposed.kid(), alg).await {
            Some(key) => key,
            None => {
                tracing::debug!(jwk.kid = ?decomposed.kid(), %alg, "token rejected; no key");
                return false;
            }
        };

        match decomposed.verify(alg, &key) {
            Ok(()) => true,
            Err(err) => {
                let error: &dyn std::error::Error = &err;
                tracing::debug!(jwk.kid = ?key.key_id(), error, "token rejected");
                false
            }
        }
    }

    /// Keeps the local key set in step with configuration updates
    ///
    /// The task ends when the configuration manager is dropped.
    pub fn follow(&self, mut updates: ConfigWatch) -> JoinHandle<()> {
        let this = self.clone();
        this.set_local(updates.borrow_and_update().jwks.clone());

        tokio::spawn(async move {
            while updates.changed().await.is_ok() {
                let jwks = updates.borrow_and_update().jwks.clone();
                tracing::debug!(jwks.len = jwks.len(), "local key set updated");
                this.set_local(jwks);
            }
        })
    }
}

/// Issues tokens signed with the newest live published key
#[derive(Debug)]
pub struct KeySigner<C = System> {
    resolver: KeyResolver,
    provider: Arc<dyn CryptoProvider>,
    clock: C,
}

impl KeySigner<System> {
    /// A signer using the system clock
    pub fn new(resolver: KeyResolver, provider: Arc<dyn CryptoProvider>) -> Self {
        Self::with_clock(resolver, provider, System)
    }
}

impl<C: Clock> KeySigner<C> {
    /// A signer using the given clock
    pub fn with_clock(resolver: KeyResolver, provider: Arc<dyn CryptoProvider>, clock: C) -> Self {
        Self {
            resolver,
            provider,
            clock,
        }
    }

    /// Signs `claims` with the newest live key for `alg`
    ///
    /// Tokens for `none` carry an empty signature.
    ///
    /// # Errors
    ///
    /// No live key is published for the algorithm, or signing failed.
    pub fn issue<T: Serialize + ?Sized>(
        &self,
        alg: jws::Algorithm,
        claims: &T,
    ) -> Result<Jwt, IssueError> {
        if alg == jws::Algorithm::NONE {
            return Ok(jwt::encode(&Headers::new(alg), claims, &jwa::Unsecured)?);
        }

        let keys = self.resolver.local_keys();
        let kid = keys
            .find_by_algorithm(alg, self.clock.now())
            .and_then(Jwk::key_id)
            .ok_or(IssueError::NoSigningKey(alg))?
            .to_owned();

        let headers = Headers::new(alg).with_key_id(kid.clone());
        let signer = ProviderSigner::new(self.provider.clone(), kid);
        Ok(jwt::encode(&headers, claims, &signer)?)
    }
}
