use std::sync::Arc;

use aliri_clock::{TestClock, UnixTime};
use color_eyre::Result;

use crate::{
    config::{BootstrapLocation, ConfigurationManager},
    crypto::InMemoryCryptoProvider,
    model::Conf,
    store::{Dn, MemoryStore, StoreExt},
};

pub const CONF_DN: &str = "ou=configuration,o=warden";

pub const EMPTY_JWKS: &str = r#"{ "keys": [] }"#;

pub fn app_json(enabled: bool) -> String {
    format!(
        r#"{{ "keyRegenerationEnabled": {}, "keyRegenerationInterval": 1, "idTokenLifetime": 60, "keyAlgorithms": ["ES256"], "cleanupBatchSize": 50 }}"#,
        enabled
    )
}

pub fn conf(revision: u64, web_keys: &str) -> Conf {
    Conf {
        dn: Dn::from_static(CONF_DN),
        revision,
        dynamic: Some(app_json(true)),
        statics: Some(r#"{ "baseDn": { "clients": "ou=clients,o=test" } }"#.to_owned()),
        web_keys: Some(web_keys.to_owned()),
        errors: Some(
            r#"{ "uma": [{ "id": "invalid_ticket", "description": "Unknown ticket" }] }"#
                .to_owned(),
        ),
    }
}

/// A configuration manager over an in-memory store, bootstrapped from a
/// temporary directory
pub struct Harness {
    pub dir: tempfile::TempDir,
    pub store: Arc<MemoryStore>,
    pub provider: Arc<InMemoryCryptoProvider>,
    pub manager: Arc<ConfigurationManager<TestClock>>,
}

pub fn harness(now: UnixTime) -> Result<Harness> {
    let dir = tempfile::tempdir()?;
    std::fs::write(
        dir.path().join("store.properties"),
        format!("configurationEntryDN={}\n", CONF_DN),
    )?;

    let store = Arc::new(MemoryStore::new());
    let provider = Arc::new(InMemoryCryptoProvider::new());
    let manager = Arc::new(ConfigurationManager::with_clock(
        store.clone(),
        provider.clone(),
        BootstrapLocation::in_dir(dir.path()),
        TestClock::new(now),
    ));

    Ok(Harness {
        dir,
        store,
        provider,
        manager,
    })
}

/// A harness whose store holds `record`, already loaded
pub async fn loaded(now: UnixTime, record: Conf) -> Result<Harness> {
    let h = harness(now)?;
    h.store.persist(&record).await?;
    h.manager.initialize().await?;
    Ok(h)
}
