//! The server's background work, started on its configured periods
//!
//! Periods are read from the configuration applied when the work is
//! started. Later configuration changes do not move running timers.

use std::sync::Arc;

use aliri_clock::Clock;

use crate::{
    cleanup::CleanupScheduler,
    config::ConfigurationManager,
    rotation::KeyRotation,
    timer::{spawn_periodic, PeriodicHandle},
};

/// Handles to the configuration reload, key rotation and cleanup tasks
///
/// Dropping the handles leaves the tasks running.
#[derive(Debug)]
pub struct Background {
    reload: PeriodicHandle,
    rotation: PeriodicHandle,
    cleanup: PeriodicHandle,
}

impl Background {
    /// Starts each task on the period the current configuration sets for it
    pub fn start<C, R, S>(
        config: Arc<ConfigurationManager<C>>,
        rotation: Arc<KeyRotation<R>>,
        cleanup: Arc<CleanupScheduler<S>>,
    ) -> Self
    where
        C: Clock + Send + Sync + 'static,
        R: Clock + Send + Sync + 'static,
        S: Clock + Send + Sync + 'static,
    {
        let snapshot = config.snapshot();
        let app = &snapshot.app;

        tracing::info!(
            reload.period = ?app.reload_period(),
            rotation.period = ?app.rotation_check_period(),
            cleanup.period = ?app.cleanup_period(),
            "starting background tasks"
        );

        Self {
            reload: spawn_periodic(config, app.reload_period()),
            rotation: spawn_periodic(rotation, app.rotation_check_period()),
            cleanup: spawn_periodic(cleanup, app.cleanup_period()),
        }
    }

    /// The configuration staleness check
    #[must_use]
    pub fn reload(&self) -> &PeriodicHandle {
        &self.reload
    }

    /// The key rotation check
    #[must_use]
    pub fn rotation(&self) -> &PeriodicHandle {
        &self.rotation
    }

    /// The cleanup sweep
    #[must_use]
    pub fn cleanup(&self) -> &PeriodicHandle {
        &self.cleanup
    }

    /// Stops all three tasks
    pub fn stop(&self) {
        self.reload.stop();
        self.rotation.stop();
        self.cleanup.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use aliri_clock::{TestClock, UnixTime};
    use color_eyre::Result;

    use super::*;
    use crate::{
        grant::{GrantService, StoreGrantService},
        permission::PermissionManager,
        rpt::RptManager,
        store::{Store, StoreExt},
        test::{self, conf, EMPTY_JWKS},
    };

    const NOW: UnixTime = UnixTime(1_000_000);

    const APP: &str = r#"{
        "keyRegenerationEnabled": false,
        "configurationUpdateInterval": 5,
        "keyRotationCheckInterval": 20,
        "cleanServiceInterval": 40
    }"#;

    #[tokio::test(start_paused = true)]
    async fn each_task_runs_on_its_configured_period() -> Result<()> {
        let mut record = conf(3, EMPTY_JWKS);
        record.dynamic = Some(APP.to_owned());
        let h = test::loaded(NOW, record.clone()).await?;

        let watch = h.manager.subscribe();
        let store: Arc<dyn Store> = h.store.clone();
        let clock = TestClock::new(NOW);
        let grants: Arc<dyn GrantService> =
            Arc::new(StoreGrantService::new(store.clone(), watch.clone()));
        let rpts = Arc::new(RptManager::with_clock(
            store.clone(),
            grants.clone(),
            watch.clone(),
            clock.clone(),
        ));
        let permissions = Arc::new(PermissionManager::with_clock(
            store.clone(),
            watch.clone(),
            clock.clone(),
        ));
        let cleanup = Arc::new(CleanupScheduler::new(
            store,
            grants,
            rpts,
            permissions,
            watch,
            clock,
        ));
        let rotation = Arc::new(KeyRotation::new(h.manager.clone(), h.provider.clone()));

        let background = Background::start(h.manager.clone(), rotation, cleanup);

        assert_eq!(background.reload().period(), Duration::from_secs(5));
        assert_eq!(background.rotation().period(), Duration::from_secs(20));
        assert_eq!(background.cleanup().period(), Duration::from_secs(40));

        record.revision = 4;
        h.store.merge(&record).await?;
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(h.manager.loaded_revision(), Some(4));

        let searches = h.store.search_count();
        tokio::time::sleep(Duration::from_secs(35)).await;
        assert!(h.store.search_count() > searches);

        background.stop();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(background.reload().is_stopped());
        assert!(background.rotation().is_stopped());
        assert!(background.cleanup().is_stopped());
        Ok(())
    }
}
