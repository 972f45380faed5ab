//! Signing key rotation
//!
//! A rotation pass generates one fresh key per configured algorithm, prunes
//! expired keys along with their private material, and writes the updated
//! key set back to the configuration record under a compare-and-swap on its
//! revision.
//!
//! New keys expire one regeneration interval plus one token lifetime after
//! they are created. The extra margin keeps a key published until the last
//! token it signed has itself expired.

use std::sync::Arc;

use aliri_clock::{Clock, System, UnixTime};
use async_trait::async_trait;
use warden_jose::{jws, Jwk, Jwks};

use crate::{
    config::{AppConfiguration, ConfigurationManager, ManualKeyPolicy},
    crypto::CryptoProvider,
    error::{RotationError, StoreError},
    guard::{SingleFlight, TickOutcome},
    model::{Conf, REVISION_ATTRIBUTE},
    store::{Expect, StoreExt},
    timer::Periodic,
};

/// Generates one key per algorithm, each expiring at `expires_at` epoch
/// milliseconds
///
/// Generation runs on the blocking thread pool. An algorithm whose
/// generation fails is logged and skipped.
pub async fn generate_keys(
    provider: Arc<dyn CryptoProvider>,
    algorithms: &[jws::Algorithm],
    expires_at: u64,
) -> Jwks {
    let mut jwks = Jwks::default();

    for &alg in algorithms {
        let provider = provider.clone();
        let generated =
            tokio::task::spawn_blocking(move || provider.generate_key(alg, expires_at)).await;

        match generated {
            Ok(Ok(key)) => {
                tracing::debug!(jwk.alg = %alg, jwk.kid = ?key.key_id(), "signing key generated");
                jwks.add_key(key);
            }
            Ok(Err(err)) => {
                let error: &dyn std::error::Error = &err;
                tracing::warn!(jwk.alg = %alg, error, "unable to generate signing key");
            }
            Err(err) => {
                let error: &dyn std::error::Error = &err;
                tracing::error!(jwk.alg = %alg, error, "signing key generation task failed");
            }
        }
    }

    jwks
}

/// Whether some configured algorithm lacks a key that stays fresh for a
/// full token lifetime past `now`
///
/// A key generated at `t` expires at `t + interval + lifetime`, so it is
/// due for replacement once `now + lifetime` reaches its expiration.
#[must_use]
pub fn needs_rotation(app: &AppConfiguration, jwks: &Jwks, now: UnixTime) -> bool {
    let horizon = now
        .0
        .saturating_add(app.id_token_lifetime)
        .saturating_mul(1000);

    app.key_algorithms.iter().any(|&alg| {
        !jwks.keys().iter().any(|key| {
            key.algorithm() == Some(alg) && key.expires_at().map_or(false, |exp| exp > horizon)
        })
    })
}

/// What a rotation pass did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RotationOutcome {
    /// Key regeneration is switched off
    Disabled,
    /// Every configured algorithm still has a fresh key
    NotDue,
    /// The key set was rotated and stored
    Rotated {
        /// The revision the updated record was stored under
        revision: u64,
        /// The number of keys generated
        generated: usize,
        /// The number of expired keys removed
        pruned: usize,
    },
}

/// Rotates the signing keys published in the configuration record
#[derive(Debug)]
pub struct KeyRotation<C = System> {
    config: Arc<ConfigurationManager<C>>,
    provider: Arc<dyn CryptoProvider>,
    guard: SingleFlight,
}

impl<C: Clock + Send + Sync> KeyRotation<C> {
    /// Constructs a rotation engine over the managed configuration
    pub fn new(config: Arc<ConfigurationManager<C>>, provider: Arc<dyn CryptoProvider>) -> Self {
        Self {
            config,
            provider,
            guard: SingleFlight::new(),
        }
    }

    /// Runs a rotation pass, unless one is already running
    pub async fn rotate(&self) -> TickOutcome<Result<RotationOutcome, RotationError>> {
        self.guarded(true).await
    }

    /// Runs a rotation pass if one is due, unless one is already running
    pub async fn tick(&self) -> TickOutcome<Result<RotationOutcome, RotationError>> {
        self.guarded(false).await
    }

    async fn guarded(&self, force: bool) -> TickOutcome<Result<RotationOutcome, RotationError>> {
        let _flight = match self.guard.try_acquire() {
            Some(flight) => flight,
            None => {
                tracing::debug!("key rotation already running; skipping");
                return TickOutcome::AlreadyRunning;
            }
        };

        TickOutcome::Completed(self.run(force).await)
    }

    #[tracing::instrument(skip(self))]
    async fn run(&self, force: bool) -> Result<RotationOutcome, RotationError> {
        let snapshot = self.config.snapshot();
        let app = &snapshot.app;

        if !app.key_regeneration_enabled {
            tracing::debug!("key regeneration disabled");
            return Ok(RotationOutcome::Disabled);
        }

        let now = self.config.clock().now();
        if !force && !needs_rotation(app, &snapshot.jwks, now) {
            tracing::trace!("signing keys are fresh");
            return Ok(RotationOutcome::NotDue);
        }

        let algorithms = app.rotation_algorithms()?;
        let dn = self.config.configuration_dn()?;
        let store = self.config.store();

        let mut conf = store
            .find::<Conf>(&dn)
            .await?
            .ok_or_else(|| RotationError::MissingConfiguration(dn.clone()))?;

        let existing = match conf.web_keys.as_deref() {
            Some(json) => Jwks::from_json(json).map_err(RotationError::MalformedKeySet)?,
            None => Jwks::default(),
        };

        let expires_at = app.key_expiration(now);
        let generated = generate_keys(self.provider.clone(), algorithms, expires_at).await;

        let mut jwks = generated.clone();
        let mut pruned = 0;
        for key in existing.into_keys() {
            if key.is_expired_at(now) && self.prune(&key) {
                pruned += 1;
                continue;
            }

            let key = match (key.expires_at(), app.manual_key_policy) {
                (None, ManualKeyPolicy::StampExpiration) => {
                    tracing::info!(jwk.kid = ?key.key_id(), "stamping expiration on manual key");
                    key.with_expiration(expires_at)
                }
                _ => key,
            };
            jwks.add_key(key);
        }

        let expected = conf.revision;
        let revision = expected + 1;

        conf.web_keys = match jwks.to_json() {
            Ok(json) => Some(json),
            Err(err) => {
                self.discard(&generated);
                return Err(RotationError::Serialization(err));
            }
        };
        conf.revision = revision;

        let expect = Expect {
            attribute: REVISION_ATTRIBUTE,
            value: expected.into(),
        };
        if let Err(err) = store.merge_if(&conf, &expect).await {
            self.discard(&generated);
            return Err(match err {
                StoreError::Conflict { .. } => RotationError::Conflict { expected },
                err => err.into(),
            });
        }

        let generated = generated.len();
        self.config.record_key_rotation(jwks, expected, revision);

        tracing::info!(revision, generated, pruned, "signing keys rotated");

        Ok(RotationOutcome::Rotated {
            revision,
            generated,
            pruned,
        })
    }

    /// Destroys the private half of an expired key
    ///
    /// Returns whether the key can be dropped from the key set. A key whose
    /// deletion failed stays so the next pass retries it.
    fn prune(&self, key: &Jwk) -> bool {
        let kid = match key.key_id() {
            Some(kid) => kid,
            None => return true,
        };

        match self.provider.delete_key(kid) {
            Ok(()) => {
                tracing::debug!(jwk.kid = %kid, "expired signing key deleted");
                true
            }
            Err(err) => {
                let error: &dyn std::error::Error = &err;
                tracing::warn!(jwk.kid = %kid, error, "unable to delete expired signing key; keeping it");
                false
            }
        }
    }

    /// Deletes keys generated by a pass that could not be stored
    fn discard(&self, generated: &Jwks) {
        for kid in generated.keys().iter().filter_map(Jwk::key_id) {
            if let Err(err) = self.provider.delete_key(kid) {
                let error: &dyn std::error::Error = &err;
                tracing::warn!(jwk.kid = %kid, error, "unable to discard unstored signing key");
            }
        }
    }
}

#[async_trait]
impl<C: Clock + Send + Sync + 'static> Periodic for KeyRotation<C> {
    fn name(&self) -> &'static str {
        "key rotation"
    }

    async fn tick(&self) {
        if let TickOutcome::Completed(Err(err)) = KeyRotation::tick(self).await {
            let error: &dyn std::error::Error = &err;
            tracing::error!(error, "key rotation failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use aliri_clock::TestClock;
    use color_eyre::Result;
    use tracing_test::traced_test;
    use warden_jose::jwa::{self, ec::Curve};

    use super::*;
    use crate::{
        crypto::InMemoryCryptoProvider,
        store::{Attributes, DnRef, Page, PageRequest, Query, Store},
        test::{self, conf, Harness, CONF_DN, EMPTY_JWKS},
    };

    const NOW: UnixTime = UnixTime(10_000);

    fn rotation(h: &Harness) -> KeyRotation<TestClock> {
        KeyRotation::new(h.manager.clone(), h.provider.clone())
    }

    async fn stored_keys(h: &Harness) -> Result<Jwks> {
        let stored: Conf = h
            .store
            .find(DnRef::from_str(CONF_DN))
            .await?
            .ok_or_else(|| color_eyre::eyre::eyre!("record missing"))?;
        Ok(Jwks::from_json(stored.web_keys.as_deref().unwrap_or_default())?)
    }

    /// A key held by the provider, expiring at `exp` milliseconds
    fn held_key(provider: &InMemoryCryptoProvider, exp: Option<u64>) -> Result<Jwk> {
        let key = Jwk::from(jwa::EllipticCurve::generate(Curve::P256)?)
            .with_algorithm(jws::Algorithm::ES256);
        let public = provider.import(key);
        Ok(match exp {
            Some(exp) => public.with_expiration(exp),
            None => public,
        })
    }

    fn key_set(keys: impl IntoIterator<Item = Jwk>) -> Result<String> {
        Ok(keys.into_iter().collect::<Jwks>().to_json()?)
    }

    #[tokio::test]
    async fn each_pass_adds_one_key_per_algorithm() -> Result<()> {
        let h = test::loaded(NOW, conf(3, EMPTY_JWKS)).await?;
        let rotation = rotation(&h);

        let first = rotation.rotate().await.completed();
        assert!(matches!(
            first,
            Some(Ok(RotationOutcome::Rotated { revision: 4, generated: 1, pruned: 0 }))
        ));

        let second = rotation.rotate().await.completed();
        assert!(matches!(
            second,
            Some(Ok(RotationOutcome::Rotated { revision: 5, generated: 1, pruned: 0 }))
        ));

        let keys = stored_keys(&h).await?;
        assert_eq!(keys.len(), 2);
        assert_eq!(h.manager.snapshot().jwks.len(), 2);
        assert_eq!(h.manager.loaded_revision(), Some(5));
        Ok(())
    }

    #[tokio::test]
    async fn new_keys_come_first_and_carry_the_rotation_expiration() -> Result<()> {
        let h = test::harness(NOW)?;
        let old = held_key(&h.provider, Some(u64::MAX))?;
        h.store.persist(&conf(3, &key_set([old.clone()])?)).await?;
        h.manager.initialize().await?;

        let _ = rotation(&h).rotate().await;

        let keys = stored_keys(&h).await?;
        assert_eq!(keys.len(), 2);
        assert_eq!(keys.keys()[1].key_id(), old.key_id());
        assert_eq!(
            keys.keys()[0].expires_at(),
            Some((NOW.0 + 3600 + 60) * 1000)
        );
        Ok(())
    }

    #[tokio::test]
    async fn expired_keys_are_pruned_and_deleted_once() -> Result<()> {
        let h = test::harness(NOW)?;
        let expired = held_key(&h.provider, Some(NOW.0 * 1000))?;
        let expired_kid = expired.thumbprint();
        h.store.persist(&conf(3, &key_set([expired])?)).await?;
        h.manager.initialize().await?;
        let rotation = rotation(&h);

        let outcome = rotation.rotate().await.completed();
        assert!(matches!(
            outcome,
            Some(Ok(RotationOutcome::Rotated { pruned: 1, .. }))
        ));
        let _ = rotation.rotate().await;

        assert!(stored_keys(&h).await?.find(&expired_kid).is_none());
        assert_eq!(
            h.provider.deleted().iter().filter(|k| **k == expired_kid).count(),
            1
        );
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn failed_deletion_keeps_the_expired_key() -> Result<()> {
        let h = test::harness(NOW)?;
        let expired = held_key(&h.provider, Some(1))?;
        let expired_kid = expired.thumbprint();
        h.provider.fail_deletion_of(expired_kid.clone());
        h.store.persist(&conf(3, &key_set([expired])?)).await?;
        h.manager.initialize().await?;

        let _ = rotation(&h).rotate().await;

        assert!(stored_keys(&h).await?.find(&expired_kid).is_some());
        assert!(logs_contain("unable to delete expired signing key"));
        Ok(())
    }

    #[tokio::test]
    async fn manual_keys_are_retained_by_default() -> Result<()> {
        let h = test::harness(NOW)?;
        let manual = held_key(&h.provider, None)?;
        let manual_kid = manual.thumbprint();
        h.store.persist(&conf(3, &key_set([manual])?)).await?;
        h.manager.initialize().await?;

        let _ = rotation(&h).rotate().await;

        let keys = stored_keys(&h).await?;
        let kept = keys.find(&manual_kid);
        assert!(kept.is_some());
        assert_eq!(kept.and_then(Jwk::expires_at), None);
        Ok(())
    }

    #[tokio::test]
    async fn manual_keys_can_be_stamped_to_age_out() -> Result<()> {
        let h = test::harness(NOW)?;
        let manual = held_key(&h.provider, None)?;
        let manual_kid = manual.thumbprint();
        let mut record = conf(3, &key_set([manual])?);
        record.dynamic = Some(
            r#"{ "keyRegenerationInterval": 1, "idTokenLifetime": 60, "keyAlgorithms": ["ES256"], "manualKeyPolicy": "stampExpiration" }"#
                .to_owned(),
        );
        h.store.persist(&record).await?;
        h.manager.initialize().await?;

        let _ = rotation(&h).rotate().await;

        let keys = stored_keys(&h).await?;
        assert_eq!(
            keys.find(&manual_kid).and_then(Jwk::expires_at),
            Some((NOW.0 + 3600 + 60) * 1000)
        );
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn a_failing_algorithm_does_not_stop_the_others() -> Result<()> {
        let h = test::harness(NOW)?;
        let mut record = conf(3, EMPTY_JWKS);
        record.dynamic = Some(r#"{ "keyAlgorithms": ["RS256", "ES384"] }"#.to_owned());
        h.store.persist(&record).await?;
        h.manager.initialize().await?;
        h.provider.fail_generation_for(jws::Algorithm::RS256);

        let outcome = rotation(&h).rotate().await.completed();

        assert!(matches!(
            outcome,
            Some(Ok(RotationOutcome::Rotated { generated: 1, .. }))
        ));
        let keys = stored_keys(&h).await?;
        assert_eq!(keys.keys()[0].algorithm(), Some(jws::Algorithm::ES384));
        assert!(logs_contain("unable to generate signing key"));
        Ok(())
    }

    #[tokio::test]
    async fn disabled_regeneration_does_nothing() -> Result<()> {
        let mut record = conf(3, EMPTY_JWKS);
        record.dynamic = Some(test::app_json(false));
        let h = test::loaded(NOW, record).await?;

        let outcome = rotation(&h).rotate().await.completed();
        assert!(matches!(outcome, Some(Ok(RotationOutcome::Disabled))));
        assert!(stored_keys(&h).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn symmetric_algorithms_are_refused() -> Result<()> {
        let mut record = conf(3, EMPTY_JWKS);
        record.dynamic = Some(r#"{ "keyAlgorithms": ["ES256", "HS256"] }"#.to_owned());
        let h = test::loaded(NOW, record).await?;

        let outcome = rotation(&h).rotate().await.completed();
        assert!(matches!(outcome, Some(Err(RotationError::Config(_)))));
        assert!(h.provider.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn fresh_keys_make_a_tick_a_no_op() -> Result<()> {
        let h = test::loaded(NOW, conf(3, EMPTY_JWKS)).await?;
        let rotation = rotation(&h);

        let first = rotation.tick().await.completed();
        assert!(matches!(first, Some(Ok(RotationOutcome::Rotated { .. }))));

        let second = rotation.tick().await.completed();
        assert!(matches!(second, Some(Ok(RotationOutcome::NotDue))));
        Ok(())
    }

    #[tokio::test]
    async fn held_guard_skips_the_pass() -> Result<()> {
        let h = test::loaded(NOW, conf(3, EMPTY_JWKS)).await?;
        let rotation = rotation(&h);

        let _held = rotation.guard.try_acquire();
        assert!(rotation.rotate().await.is_skipped());
        assert!(h.provider.is_empty());
        Ok(())
    }

    #[test]
    fn keys_are_due_once_the_interval_has_passed() -> Result<()> {
        let app = AppConfiguration {
            key_regeneration_interval: 1,
            id_token_lifetime: 60,
            key_algorithms: vec![jws::Algorithm::ES256],
            ..AppConfiguration::default()
        };
        let provider = InMemoryCryptoProvider::new();
        let generated_at = UnixTime(1_000);
        let jwks: Jwks = [provider.generate_key(jws::Algorithm::ES256, app.key_expiration(generated_at))?]
            .into_iter()
            .collect();

        assert!(!needs_rotation(&app, &jwks, UnixTime(1_000 + 3_599)));
        assert!(needs_rotation(&app, &jwks, UnixTime(1_000 + 3_600)));
        assert!(needs_rotation(&app, &Jwks::default(), generated_at));
        Ok(())
    }

    /// A store where another writer bumps the configuration revision just
    /// before every conditional write
    #[derive(Debug)]
    struct RacingStore {
        inner: Arc<crate::store::MemoryStore>,
    }

    #[async_trait]
    impl Store for RacingStore {
        async fn find_raw(
            &self,
            object_class: &str,
            dn: &DnRef,
            attributes: Option<&[&str]>,
        ) -> Result<Option<Attributes>, StoreError> {
            self.inner.find_raw(object_class, dn, attributes).await
        }

        async fn search_raw(
            &self,
            query: &Query,
            page: PageRequest,
        ) -> Result<Page<Attributes>, StoreError> {
            self.inner.search_raw(query, page).await
        }

        async fn persist_raw(
            &self,
            object_class: &str,
            dn: &DnRef,
            attributes: Attributes,
        ) -> Result<(), StoreError> {
            self.inner.persist_raw(object_class, dn, attributes).await
        }

        async fn merge_raw(
            &self,
            object_class: &str,
            dn: &DnRef,
            attributes: Attributes,
        ) -> Result<(), StoreError> {
            self.inner.merge_raw(object_class, dn, attributes).await
        }

        async fn merge_raw_if(
            &self,
            object_class: &str,
            dn: &DnRef,
            attributes: Attributes,
            expect: &Expect,
        ) -> Result<(), StoreError> {
            let mut bump = Attributes::new();
            bump.insert(REVISION_ATTRIBUTE.to_owned(), 99.into());
            self.inner.merge_raw(object_class, dn, bump).await?;
            self.inner
                .merge_raw_if(object_class, dn, attributes, expect)
                .await
        }

        async fn remove(&self, dn: &DnRef) -> Result<(), StoreError> {
            self.inner.remove(dn).await
        }

        async fn contains(&self, object_class: &str, dn: &DnRef) -> Result<bool, StoreError> {
            self.inner.contains(object_class, dn).await
        }
    }

    #[tokio::test]
    async fn losing_the_revision_race_discards_generated_keys() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(
            dir.path().join("store.properties"),
            format!("configurationEntryDN={}\n", CONF_DN),
        )?;
        let inner = Arc::new(crate::store::MemoryStore::new());
        inner.persist(&conf(3, EMPTY_JWKS)).await?;
        let provider = Arc::new(InMemoryCryptoProvider::new());
        let manager = Arc::new(ConfigurationManager::with_clock(
            Arc::new(RacingStore {
                inner: inner.clone(),
            }),
            provider.clone(),
            crate::config::BootstrapLocation::in_dir(dir.path()),
            TestClock::new(NOW),
        ));
        manager.initialize().await?;
        let rotation = KeyRotation::new(manager.clone(), provider.clone());

        let outcome = rotation.rotate().await.completed();

        assert!(matches!(
            outcome,
            Some(Err(RotationError::Conflict { expected: 3 }))
        ));
        assert!(provider.is_empty());
        assert_eq!(provider.deleted().len(), 1);
        assert_eq!(manager.loaded_revision(), Some(3));
        Ok(())
    }

    /// Delegates to an in-memory provider, noting the thread each key is
    /// generated on
    #[derive(Debug, Default)]
    struct ThreadNotingProvider {
        inner: InMemoryCryptoProvider,
        threads: parking_lot::Mutex<Vec<std::thread::ThreadId>>,
    }

    impl CryptoProvider for ThreadNotingProvider {
        fn generate_key(
            &self,
            alg: jws::Algorithm,
            expires_at: u64,
        ) -> Result<Jwk, crate::error::CryptoError> {
            self.threads.lock().push(std::thread::current().id());
            self.inner.generate_key(alg, expires_at)
        }

        fn sign(
            &self,
            kid: &warden_jose::jwk::KeyIdRef,
            alg: jws::Algorithm,
            data: &[u8],
        ) -> Result<Vec<u8>, crate::error::CryptoError> {
            self.inner.sign(kid, alg, data)
        }

        fn delete_key(
            &self,
            kid: &warden_jose::jwk::KeyIdRef,
        ) -> Result<(), crate::error::CryptoError> {
            self.inner.delete_key(kid)
        }

        fn contains_key(&self, kid: &warden_jose::jwk::KeyIdRef) -> bool {
            self.inner.contains_key(kid)
        }
    }

    #[tokio::test]
    async fn keys_are_generated_off_the_runtime_thread() -> Result<()> {
        let provider = Arc::new(ThreadNotingProvider::default());
        let algorithms = [jws::Algorithm::RS256, jws::Algorithm::ES256];

        let jwks = generate_keys(provider.clone(), &algorithms, 1_000).await;

        assert_eq!(jwks.len(), 2);
        let runtime_thread = std::thread::current().id();
        let threads = provider.threads.lock();
        assert_eq!(threads.len(), 2);
        assert!(threads.iter().all(|id| *id != runtime_thread));
        Ok(())
    }
}
