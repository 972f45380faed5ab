//! Configuration loading and the reload state machine
//!
//! Configuration comes in two layers. A small bootstrap settings file
//! locates the configuration record in the store. That record carries four
//! independent JSON payloads: the dynamic [`AppConfiguration`], the
//! [`StaticConfiguration`] DN layout, the published key set and the
//! [`ErrorCatalog`]. The record's revision counter tells a periodic check
//! whether the in-memory copy is stale.
//!
//! ```text
//! Uninitialized -> Loaded -> (Stale -> Reloading -> Loaded)*
//! ```
//!
//! When the store cannot provide a record at start-up, the payloads are
//! read from files instead. Configuration loaded that way stays file-sourced;
//! later staleness checks leave the store alone.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use aliri_clock::{Clock, System};
use async_trait::async_trait;
use parking_lot::{Mutex, MutexGuard};
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use warden_jose::Jwks;

use crate::{
    crypto::CryptoProvider,
    error::ConfigError,
    guard::{SingleFlight, TickOutcome},
    model::{Conf, ConfRevision, REVISION_ATTRIBUTE},
    rotation,
    store::{Dn, Expect, Store, StoreExt},
    timer::Periodic,
};

mod bootstrap;
mod documents;

pub use bootstrap::{
    Bootstrap, BootstrapLocation, CERTS_DIR_KEY, CONFIGURATION_DN_KEY, CONF_DIR_KEY,
};
pub use documents::{
    AppConfiguration, BaseDn, ErrorCatalog, ErrorMessage, ManualKeyPolicy, StaticConfiguration,
};

/// The fallback file holding the dynamic configuration
pub const CONFIG_FILE_NAME: &str = "warden-config.json";
/// The fallback file holding the static configuration
pub const STATIC_CONF_FILE_NAME: &str = "warden-static-conf.json";
/// The fallback file holding the error catalog
pub const ERRORS_FILE_NAME: &str = "warden-errors.json";
/// The fallback file holding the key set, found in the certificates directory
pub const WEB_KEYS_FILE_NAME: &str = "warden-web-keys.json";

/// Where the current configuration came from
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConfigSource {
    /// The configuration record in the store
    #[default]
    Store,
    /// The fallback files on disk
    Files,
}

/// Where the configuration manager is in its lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadState {
    /// Nothing has been loaded yet
    Uninitialized,
    /// The in-memory configuration is current as of the last check
    Loaded,
    /// A newer revision has been seen in the store
    Stale,
    /// A newer revision is being read
    Reloading,
}

/// A consistent view of the loaded configuration
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConfigSnapshot {
    /// The dynamic application configuration
    pub app: AppConfiguration,
    /// The static DN layout
    pub statics: StaticConfiguration,
    /// The published key set
    pub jwks: Jwks,
    /// The error catalog
    pub errors: ErrorCatalog,
    /// The revision the payloads were loaded from, when store-sourced
    pub revision: Option<u64>,
    /// Where the configuration came from
    pub source: ConfigSource,
}

/// A receiver that always holds the latest configuration
pub type ConfigWatch = watch::Receiver<Arc<ConfigSnapshot>>;

/// What a staleness check did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// The manager has not been initialized
    NotInitialized,
    /// Configuration is file-sourced, so the store was not consulted
    FileSourced,
    /// The store holds no configuration record
    NoRecord,
    /// The stored revision is not newer than the loaded one
    Current,
    /// A newer revision was loaded
    Reloaded {
        /// The revision now loaded
        revision: u64,
    },
}

#[derive(Debug)]
struct State {
    phase: LoadState,
    bootstrap: Option<Bootstrap>,
    loaded_revision: Option<u64>,
    source: ConfigSource,
}

/// Owns the in-memory configuration and keeps it current
#[derive(Debug)]
pub struct ConfigurationManager<C = System> {
    store: Arc<dyn Store>,
    provider: Arc<dyn CryptoProvider>,
    location: BootstrapLocation,
    clock: C,
    guard: SingleFlight,
    state: Mutex<State>,
    updates: watch::Sender<Arc<ConfigSnapshot>>,
}

impl ConfigurationManager<System> {
    /// Constructs a manager using the system clock
    pub fn new(
        store: Arc<dyn Store>,
        provider: Arc<dyn CryptoProvider>,
        location: BootstrapLocation,
    ) -> Self {
        Self::with_clock(store, provider, location, System)
    }
}

impl<C: Clock + Send + Sync> ConfigurationManager<C> {
    /// Constructs a manager using the given clock
    pub fn with_clock(
        store: Arc<dyn Store>,
        provider: Arc<dyn CryptoProvider>,
        location: BootstrapLocation,
        clock: C,
    ) -> Self {
        let (updates, _) = watch::channel(Arc::new(ConfigSnapshot::default()));

        Self {
            store,
            provider,
            location,
            clock,
            guard: SingleFlight::new(),
            state: Mutex::new(State {
                phase: LoadState::Uninitialized,
                bootstrap: None,
                loaded_revision: None,
                source: ConfigSource::Store,
            }),
            updates,
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock()
    }

    /// The store the configuration record lives in
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// The clock configuration changes are timed by
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// The current configuration
    #[must_use]
    pub fn snapshot(&self) -> Arc<ConfigSnapshot> {
        self.updates.borrow().clone()
    }

    /// Subscribes to configuration updates
    ///
    /// Every successful load publishes a new snapshot.
    #[must_use]
    pub fn subscribe(&self) -> ConfigWatch {
        self.updates.subscribe()
    }

    /// Where the manager is in its lifecycle
    #[must_use]
    pub fn load_state(&self) -> LoadState {
        self.state().phase
    }

    /// The revision the current configuration was loaded from
    #[must_use]
    pub fn loaded_revision(&self) -> Option<u64> {
        self.state().loaded_revision
    }

    /// Where the current configuration came from
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.state().source
    }

    /// The file the bootstrap settings were read from
    #[must_use]
    pub fn bootstrap_path(&self) -> Option<PathBuf> {
        self.state().bootstrap.as_ref().map(|b| b.path().to_owned())
    }

    /// The DN of the configuration record
    ///
    /// # Errors
    ///
    /// Bootstrap settings have not been loaded, or do not name the record.
    pub fn configuration_dn(&self) -> Result<Dn, ConfigError> {
        match &self.state().bootstrap {
            Some(bootstrap) => bootstrap.configuration_dn(),
            None => Err(ConfigError::MissingBootstrapValue(CONFIGURATION_DN_KEY)),
        }
    }

    fn publish(&self, snapshot: ConfigSnapshot) {
        self.updates.send_replace(Arc::new(snapshot));
    }

    fn set_phase(&self, phase: LoadState) {
        self.state().phase = phase;
    }

    /// Loads the bootstrap settings and then the configuration
    ///
    /// The store is tried first. If it cannot provide the record, the
    /// configuration is read from the fallback files.
    ///
    /// # Errors
    ///
    /// The bootstrap settings cannot be read, or configuration could be
    /// loaded from neither the store nor the files.
    #[tracing::instrument(skip(self))]
    pub async fn initialize(&self) -> Result<ConfigSource, ConfigError> {
        let path = self.location.resolve().await.to_owned();
        let bootstrap = Bootstrap::load(&path).await?;
        tracing::info!(bootstrap.path = %path.display(), "bootstrap settings loaded");
        self.state().bootstrap = Some(bootstrap);

        self.create(true).await
    }

    async fn create(&self, recover_from_files: bool) -> Result<ConfigSource, ConfigError> {
        let dn = self.configuration_dn()?;

        match self.store.find::<Conf>(&dn).await {
            Ok(Some(conf)) => {
                self.apply(conf).await;
                tracing::info!("configuration loaded from store");
                return Ok(ConfigSource::Store);
            }
            Ok(None) => tracing::warn!(store.dn = %dn, "no configuration record in store"),
            Err(err) => {
                let error: &dyn std::error::Error = &err;
                tracing::error!(store.dn = %dn, error, "unable to read configuration record");
            }
        }

        if !recover_from_files {
            return Err(ConfigError::Unavailable);
        }

        tracing::info!("loading configuration from the file system");
        let (conf_dir, certs_dir) = match &self.state().bootstrap {
            Some(b) => (b.conf_dir(), b.certs_dir()),
            None => return Err(ConfigError::MissingBootstrapValue(CONFIGURATION_DN_KEY)),
        };

        match load_from_files(&conf_dir, &certs_dir).await {
            Ok(snapshot) => {
                {
                    let mut state = self.state();
                    state.source = ConfigSource::Files;
                    state.phase = LoadState::Loaded;
                    state.loaded_revision = None;
                }
                self.publish(snapshot);
                tracing::info!("configuration loaded from files");
                Ok(ConfigSource::Files)
            }
            Err(err) => {
                let error: &dyn std::error::Error = &err;
                tracing::error!(error, "unable to load configuration from files");
                Err(ConfigError::Unavailable)
            }
        }
    }

    /// Applies a configuration record
    ///
    /// Each payload is parsed on its own. A payload that fails to parse
    /// leaves its previous value in place; a key set that fails to parse is
    /// replaced by a freshly generated one.
    async fn apply(&self, conf: Conf) {
        let mut next = (*self.snapshot()).clone();

        if let Some(app) = parse_payload("dynamic", conf.dynamic.as_deref()) {
            next.app = app;
        }
        if let Some(statics) = parse_payload("static", conf.statics.as_deref()) {
            next.statics = statics;
        }
        if let Some(errors) = parse_payload("errors", conf.errors.as_deref()) {
            next.errors = errors;
        }
        match parse_payload::<Jwks>("key set", conf.web_keys.as_deref()) {
            Some(jwks) => next.jwks = jwks,
            None => {
                tracing::warn!("key set unusable; generating a new one");
                next.jwks = self.regenerate_key_set(&next.app, &conf.dn).await;
            }
        }

        next.revision = Some(conf.revision);
        next.source = ConfigSource::Store;

        {
            let mut state = self.state();
            state.phase = LoadState::Loaded;
            state.loaded_revision = Some(conf.revision);
            state.source = ConfigSource::Store;
        }

        self.publish(next);
    }

    /// Generates a new key set and tries to store it
    ///
    /// The new key set is used whether or not storing it succeeds.
    async fn regenerate_key_set(&self, app: &AppConfiguration, dn: &Dn) -> Jwks {
        let algorithms = match app.rotation_algorithms() {
            Ok(algorithms) => algorithms,
            Err(err) => {
                let error: &dyn std::error::Error = &err;
                tracing::error!(error, "unable to generate a key set");
                return Jwks::default();
            }
        };

        let jwks = rotation::generate_keys(
            self.provider.clone(),
            algorithms,
            app.key_expiration(self.clock.now()),
        )
        .await;

        if let Err(err) = self.store_key_set(&jwks, dn).await {
            let error: &dyn std::error::Error = &err;
            tracing::error!(error, "unable to store generated key set");
        } else {
            tracing::info!(jwks.len = jwks.len(), "new key set generated and stored");
        }

        jwks
    }

    async fn store_key_set(&self, jwks: &Jwks, dn: &Dn) -> Result<(), ConfigError> {
        let mut conf = self
            .store
            .find::<Conf>(dn)
            .await?
            .ok_or(ConfigError::Unavailable)?;

        let expected = conf.revision;
        conf.web_keys = Some(jwks.to_json().map_err(|source| ConfigError::Parse {
            payload: "key set",
            source,
        })?);
        conf.revision = expected + 1;

        let expect = Expect {
            attribute: REVISION_ATTRIBUTE,
            value: expected.into(),
        };
        self.store.merge_if(&conf, &expect).await?;
        Ok(())
    }

    /// Checks for newer configuration, unless a check is already running
    pub async fn reload(&self) -> TickOutcome<Result<ReloadOutcome, ConfigError>> {
        let _flight = match self.guard.try_acquire() {
            Some(flight) => flight,
            None => {
                tracing::debug!("configuration reload already running; skipping");
                return TickOutcome::AlreadyRunning;
            }
        };

        TickOutcome::Completed(self.check_and_reload().await)
    }

    /// Reloads whatever is out of date
    ///
    /// The bootstrap settings are re-read when their resolved file or its
    /// modification time has changed. The configuration record is read in
    /// full only when its stored revision is newer than the loaded one.
    ///
    /// # Errors
    ///
    /// The store failed while checking or reading the record.
    #[tracing::instrument(skip(self))]
    pub async fn check_and_reload(&self) -> Result<ReloadOutcome, ConfigError> {
        let (phase, source, loaded) = {
            let state = self.state();
            (state.phase, state.source, state.loaded_revision)
        };

        if phase == LoadState::Uninitialized {
            return Ok(ReloadOutcome::NotInitialized);
        }

        self.refresh_bootstrap().await;

        if source == ConfigSource::Files {
            return Ok(ReloadOutcome::FileSourced);
        }

        let dn = self.configuration_dn()?;
        let stored = match self
            .store
            .find_projected::<Conf, ConfRevision>(&dn, &[REVISION_ATTRIBUTE])
            .await?
        {
            Some(stored) => stored.revision,
            None => return Ok(ReloadOutcome::NoRecord),
        };

        if loaded.map_or(false, |loaded| stored <= loaded) {
            tracing::trace!(revision = stored, "configuration is current");
            return Ok(ReloadOutcome::Current);
        }

        tracing::info!(revision = stored, loaded_revision = ?loaded, "configuration is stale");
        self.set_phase(LoadState::Stale);
        self.set_phase(LoadState::Reloading);

        match self.store.find::<Conf>(&dn).await {
            Ok(Some(conf)) => {
                let revision = conf.revision;
                self.apply(conf).await;
                tracing::info!(revision, "configuration reloaded");
                Ok(ReloadOutcome::Reloaded { revision })
            }
            Ok(None) => {
                self.set_phase(LoadState::Loaded);
                Ok(ReloadOutcome::NoRecord)
            }
            Err(err) => {
                self.set_phase(LoadState::Loaded);
                Err(err.into())
            }
        }
    }

    async fn refresh_bootstrap(&self) {
        let path = self.location.resolve().await;
        let modified = match tokio::fs::metadata(path).await {
            Ok(metadata) => metadata.modified().ok(),
            Err(_) => return,
        };

        let outdated = match &self.state().bootstrap {
            Some(bootstrap) => bootstrap.is_outdated_by(path, modified),
            None => true,
        };
        if !outdated {
            return;
        }

        match Bootstrap::load(path).await {
            Ok(bootstrap) => {
                tracing::info!(bootstrap.path = %path.display(), "bootstrap settings reloaded");
                self.state().bootstrap = Some(bootstrap);
            }
            Err(err) => {
                let error: &dyn std::error::Error = &err;
                tracing::warn!(bootstrap.path = %path.display(), error, "unable to reload bootstrap settings");
            }
        }
    }

    /// Adopts a key set just stored by a rotation pass
    ///
    /// The pass read revision `based_on` and wrote `revision`. When the
    /// loaded configuration was current as of `based_on`, it is current as
    /// of `revision` too, and the next check will not reload it.
    pub fn record_key_rotation(&self, jwks: Jwks, based_on: u64, revision: u64) {
        let mut next = (*self.snapshot()).clone();
        next.jwks = jwks;

        {
            let mut state = self.state();
            if state.loaded_revision == Some(based_on) {
                state.loaded_revision = Some(revision);
                next.revision = Some(revision);
            }
        }

        self.publish(next);
    }
}

#[async_trait]
impl<C: Clock + Send + Sync + 'static> Periodic for ConfigurationManager<C> {
    fn name(&self) -> &'static str {
        "configuration reload"
    }

    async fn tick(&self) {
        if let TickOutcome::Completed(Err(err)) = self.reload().await {
            let error: &dyn std::error::Error = &err;
            tracing::error!(error, "configuration reload failed");
        }
    }
}

fn parse_payload<T: DeserializeOwned>(payload: &'static str, json: Option<&str>) -> Option<T> {
    let json = match json {
        Some(json) => json,
        None => {
            tracing::warn!(payload, "configuration payload missing");
            return None;
        }
    };

    match serde_json::from_str(json) {
        Ok(value) => Some(value),
        Err(err) => {
            let error: &dyn std::error::Error = &err;
            tracing::error!(payload, error, "unable to parse configuration payload");
            None
        }
    }
}

async fn read_file<T: DeserializeOwned>(payload: &'static str, path: &Path) -> Result<T, ConfigError> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::File {
            path: path.to_owned(),
            source,
        })?;
    serde_json::from_str(&contents).map_err(|source| ConfigError::Parse { payload, source })
}

async fn load_from_files(conf_dir: &Path, certs_dir: &Path) -> Result<ConfigSnapshot, ConfigError> {
    Ok(ConfigSnapshot {
        app: read_file("dynamic", &conf_dir.join(CONFIG_FILE_NAME)).await?,
        statics: read_file("static", &conf_dir.join(STATIC_CONF_FILE_NAME)).await?,
        errors: read_file("errors", &conf_dir.join(ERRORS_FILE_NAME)).await?,
        jwks: read_file("key set", &certs_dir.join(WEB_KEYS_FILE_NAME)).await?,
        revision: None,
        source: ConfigSource::Files,
    })
}

#[cfg(test)]
mod tests {
    use aliri_clock::UnixTime;
    use color_eyre::Result;
    use tracing_test::traced_test;
    use warden_jose::jws;

    use super::*;
    use crate::{
        store::DnRef,
        test::{self, app_json, conf, CONF_DN, EMPTY_JWKS},
    };

    const NOW: UnixTime = UnixTime(1_000);

    #[tokio::test]
    async fn loads_every_payload_from_the_store() -> Result<()> {
        let h = test::harness(NOW)?;
        h.store.persist(&conf(3, EMPTY_JWKS)).await?;

        let source = h.manager.initialize().await?;

        assert_eq!(source, ConfigSource::Store);
        assert_eq!(h.manager.load_state(), LoadState::Loaded);
        assert_eq!(h.manager.loaded_revision(), Some(3));
        let snapshot = h.manager.snapshot();
        assert_eq!(snapshot.app.cleanup_batch_size, 50);
        assert_eq!(snapshot.statics.base_dn.clients.as_str(), "ou=clients,o=test");
        assert!(snapshot.errors.message("uma", "invalid_ticket").is_some());
        Ok(())
    }

    #[tokio::test]
    async fn newer_revision_triggers_a_full_reload() -> Result<()> {
        let h = test::loaded(NOW, conf(3, EMPTY_JWKS)).await?;

        let mut updated = conf(4, EMPTY_JWKS);
        updated.dynamic = Some(app_json(false));
        h.store.merge(&updated).await?;

        let outcome = h.manager.reload().await.completed();
        assert!(matches!(outcome, Some(Ok(ReloadOutcome::Reloaded { revision: 4 }))));
        assert!(!h.manager.snapshot().app.key_regeneration_enabled);
        assert_eq!(h.manager.loaded_revision(), Some(4));
        Ok(())
    }

    #[tokio::test]
    async fn same_revision_reads_only_the_revision() -> Result<()> {
        let h = test::loaded(NOW, conf(3, EMPTY_JWKS)).await?;

        let mut rewritten = conf(3, EMPTY_JWKS);
        rewritten.dynamic = Some(app_json(false));
        h.store.merge(&rewritten).await?;

        let outcome = h.manager.reload().await.completed();
        assert!(matches!(outcome, Some(Ok(ReloadOutcome::Current))));
        assert!(h.manager.snapshot().app.key_regeneration_enabled);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn a_bad_payload_keeps_its_previous_value() -> Result<()> {
        let h = test::loaded(NOW, conf(3, EMPTY_JWKS)).await?;

        let mut broken = conf(4, EMPTY_JWKS);
        broken.dynamic = Some("{ not json".to_owned());
        broken.errors = Some(
            r#"{ "token": [{ "id": "invalid_grant", "description": "Bad grant" }] }"#.to_owned(),
        );
        h.store.merge(&broken).await?;

        let _ = h.manager.reload().await;

        let snapshot = h.manager.snapshot();
        assert_eq!(snapshot.app.cleanup_batch_size, 50);
        assert!(snapshot.errors.message("token", "invalid_grant").is_some());
        assert!(logs_contain("unable to parse configuration payload"));
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn unparsable_key_set_is_regenerated_and_stored() -> Result<()> {
        let h = test::loaded(NOW, conf(3, "garbage")).await?;

        let snapshot = h.manager.snapshot();
        assert_eq!(snapshot.jwks.len(), 1);
        assert_eq!(
            snapshot.jwks.keys()[0].algorithm(),
            Some(jws::Algorithm::ES256)
        );
        assert_eq!(h.provider.len(), 1);

        let stored: Option<Conf> = h.store.find(DnRef::from_str(CONF_DN)).await?;
        let stored = stored.ok_or_else(|| color_eyre::eyre::eyre!("record missing"))?;
        assert_eq!(stored.revision, 4);
        let stored_keys = Jwks::from_json(stored.web_keys.as_deref().unwrap_or_default())?;
        assert_eq!(stored_keys.len(), 1);
        assert!(logs_contain("new key set generated and stored"));
        Ok(())
    }

    #[tokio::test]
    async fn missing_key_set_is_generated() -> Result<()> {
        let mut record = conf(3, "");
        record.web_keys = None;
        let h = test::loaded(NOW, record).await?;

        assert_eq!(h.manager.snapshot().jwks.len(), 1);
        assert_eq!(h.manager.loaded_revision(), Some(3));
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_store_falls_back_to_files() -> Result<()> {
        let h = test::harness(NOW)?;
        let dir = h.dir.path();
        std::fs::write(dir.join(CONFIG_FILE_NAME), app_json(true))?;
        std::fs::write(dir.join(STATIC_CONF_FILE_NAME), "{}")?;
        std::fs::write(dir.join(ERRORS_FILE_NAME), "{}")?;
        std::fs::write(dir.join(WEB_KEYS_FILE_NAME), EMPTY_JWKS)?;
        h.store.set_unavailable(true);

        let source = h.manager.initialize().await?;

        assert_eq!(source, ConfigSource::Files);
        assert_eq!(h.manager.snapshot().source, ConfigSource::Files);

        let outcome = h.manager.reload().await.completed();
        assert!(matches!(outcome, Some(Ok(ReloadOutcome::FileSourced))));
        Ok(())
    }

    #[tokio::test]
    async fn incomplete_files_leave_configuration_unavailable() -> Result<()> {
        let h = test::harness(NOW)?;
        std::fs::write(h.dir.path().join(CONFIG_FILE_NAME), app_json(true))?;

        let result = h.manager.initialize().await;
        assert!(matches!(result, Err(ConfigError::Unavailable)));
        assert_eq!(h.manager.load_state(), LoadState::Uninitialized);
        Ok(())
    }

    #[tokio::test]
    async fn reload_before_initialize_does_nothing() -> Result<()> {
        let h = test::harness(NOW)?;
        let outcome = h.manager.reload().await.completed();
        assert!(matches!(outcome, Some(Ok(ReloadOutcome::NotInitialized))));
        Ok(())
    }

    #[tokio::test]
    async fn held_guard_skips_the_tick() -> Result<()> {
        let h = test::loaded(NOW, conf(3, EMPTY_JWKS)).await?;

        let _held = h.manager.guard.try_acquire();
        assert!(h.manager.reload().await.is_skipped());
        Ok(())
    }

    #[tokio::test]
    async fn updated_bootstrap_file_is_reread() -> Result<()> {
        let h = test::loaded(NOW, conf(3, EMPTY_JWKS)).await?;

        let primary = h.dir.path().join("warden-store.properties");
        std::fs::write(&primary, format!("configurationEntryDN={}\n", CONF_DN))?;

        let _ = h.manager.reload().await;
        assert_eq!(h.manager.bootstrap_path(), Some(primary));
        Ok(())
    }

    #[tokio::test]
    async fn subscribers_see_rotated_key_sets() -> Result<()> {
        let h = test::loaded(NOW, conf(3, EMPTY_JWKS)).await?;
        let mut updates = h.manager.subscribe();

        let key = h.provider.generate_key(jws::Algorithm::ES256, 0)?;
        h.manager
            .record_key_rotation(std::iter::once(key).collect(), 3, 4);

        updates.changed().await?;
        assert_eq!(updates.borrow().jwks.len(), 1);
        assert_eq!(h.manager.loaded_revision(), Some(4));
        Ok(())
    }

    #[tokio::test]
    async fn rotation_based_on_an_old_revision_does_not_advance_the_loaded_one() -> Result<()> {
        let h = test::loaded(NOW, conf(3, EMPTY_JWKS)).await?;

        h.manager.record_key_rotation(Jwks::default(), 2, 3);
        assert_eq!(h.manager.loaded_revision(), Some(3));
        Ok(())
    }
}
