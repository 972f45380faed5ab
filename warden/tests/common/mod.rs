#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use aliri_clock::{Clock, UnixTime};
use color_eyre::Result;
use warden::{
    config::BootstrapLocation,
    crypto::InMemoryCryptoProvider,
    model::{Client, ClientId, Conf, TokenGrant, TokenKind},
    store::{Dn, DnRef, MemoryStore, StoreExt},
    ConfigurationManager,
};

pub const CONF_DN: &str = "ou=configuration,o=warden";
pub const CLIENTS_DN: &str = "ou=clients,o=warden";

/// A clock shared between every component of a test, advanced by hand
#[derive(Clone, Debug)]
pub struct SharedClock(Arc<AtomicU64>);

impl SharedClock {
    pub fn new(now: u64) -> Self {
        Self(Arc::new(AtomicU64::new(now)))
    }

    pub fn advance(&self, secs: u64) {
        self.0.fetch_add(secs, Ordering::AcqRel);
    }
}

impl Clock for SharedClock {
    fn now(&self) -> UnixTime {
        UnixTime(self.0.load(Ordering::Acquire))
    }
}

pub fn app_json(cleanup_batch_size: usize, rpt_lifetime: u64) -> String {
    format!(
        r#"{{
            "keyRegenerationEnabled": true,
            "keyRegenerationInterval": 1,
            "idTokenLifetime": 60,
            "keyAlgorithms": ["ES256"],
            "cleanupBatchSize": {},
            "umaRptLifetime": {}
        }}"#,
        cleanup_batch_size, rpt_lifetime
    )
}

pub fn record(revision: u64, dynamic: String) -> Conf {
    Conf {
        dn: Dn::from_static(CONF_DN),
        revision,
        dynamic: Some(dynamic),
        statics: Some("{}".to_owned()),
        web_keys: Some(r#"{ "keys": [] }"#.to_owned()),
        errors: Some(
            r#"{ "uma": [{ "id": "expired_ticket", "description": "The ticket has expired" }] }"#
                .to_owned(),
        ),
    }
}

/// Everything a lifecycle test needs, wired to one store and one clock
pub struct World {
    pub dir: tempfile::TempDir,
    pub clock: SharedClock,
    pub store: Arc<MemoryStore>,
    pub provider: Arc<InMemoryCryptoProvider>,
    pub config: Arc<ConfigurationManager<SharedClock>>,
}

/// A world whose configuration record was stored and then loaded
pub async fn world(now: u64, dynamic: String) -> Result<World> {
    let dir = tempfile::tempdir()?;
    std::fs::write(
        dir.path().join("warden-store.properties"),
        format!("configurationEntryDN={}\n", CONF_DN),
    )?;

    let clock = SharedClock::new(now);
    let store = Arc::new(MemoryStore::new());
    let provider = Arc::new(InMemoryCryptoProvider::new());
    let config = Arc::new(ConfigurationManager::with_clock(
        store.clone(),
        provider.clone(),
        BootstrapLocation::in_dir(dir.path()),
        clock.clone(),
    ));

    store.persist(&record(1, dynamic)).await?;
    config.initialize().await?;

    Ok(World {
        dir,
        clock,
        store,
        provider,
        config,
    })
}

/// Stores a client holding a live access token, returning the client's DN
pub async fn client_with_access_token(store: &MemoryStore, id: &str, token: &str) -> Result<Dn> {
    let client_dn = DnRef::from_str(CLIENTS_DN).child("inum", id);
    store
        .persist(&Client {
            dn: client_dn.clone(),
            client_id: ClientId::new(id.to_owned()),
            secret_expires_at: None,
        })
        .await?;
    store
        .persist(&TokenGrant {
            dn: client_dn.child("oxAuthTokenCode", token),
            code: token.to_owned(),
            kind: TokenKind::AccessToken,
            client_id: ClientId::new(id.to_owned()),
            expires_at: UnixTime(u64::MAX / 2),
        })
        .await?;
    Ok(client_dn)
}
