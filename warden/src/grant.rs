//! Authorization grants, as seen by the lifecycle machinery

use std::{fmt, sync::Arc};

use aliri_clock::UnixTime;
use async_trait::async_trait;

use crate::{
    config::ConfigWatch,
    error::StoreError,
    model::{ClientIdRef, TokenGrant, TokenKind},
    paged::{PagedQuery, SweepReport},
    store::{Dn, Filter, PageRequest, Query, Store, StoreExt},
};

/// The grant operations the cleanup and RPT machinery depend on
#[async_trait]
pub trait GrantService: fmt::Debug + Send + Sync {
    /// Removes every token grant that has expired as of `now`
    async fn clean_up(&self, now: UnixTime) -> SweepReport;

    /// Removes every token grant issued to the client
    async fn remove_grants_of(&self, client_id: &ClientIdRef) -> SweepReport;

    /// Finds the client that owns the access token
    async fn client_dn_for_access_token(&self, token: &str) -> Result<Option<Dn>, StoreError>;
}

/// Grants kept below their clients' entries in the store
#[derive(Debug)]
pub struct StoreGrantService {
    store: Arc<dyn Store>,
    config: ConfigWatch,
}

impl StoreGrantService {
    /// Constructs a grant service over the store
    pub fn new(store: Arc<dyn Store>, config: ConfigWatch) -> Self {
        Self { store, config }
    }

    fn layout(&self) -> (Dn, usize) {
        let snapshot = self.config.borrow();
        (
            snapshot.statics.base_dn.clients.clone(),
            snapshot.app.chunk_size(),
        )
    }
}

#[async_trait]
impl GrantService for StoreGrantService {
    async fn clean_up(&self, now: UnixTime) -> SweepReport {
        let (clients, chunk_size) = self.layout();
        let query = Query::subtree::<TokenGrant>(
            clients,
            Filter::at_or_before("oxAuthExpiration", now.0),
        );

        PagedQuery::new(&*self.store, query, chunk_size)
            .remove_all::<TokenGrant>()
            .await
    }

    async fn remove_grants_of(&self, client_id: &ClientIdRef) -> SweepReport {
        let (clients, chunk_size) = self.layout();
        let query = Query::subtree::<TokenGrant>(
            clients.child("inum", client_id.as_str()),
            Filter::Always,
        );

        PagedQuery::new(&*self.store, query, chunk_size)
            .remove_all::<TokenGrant>()
            .await
    }

    async fn client_dn_for_access_token(&self, token: &str) -> Result<Option<Dn>, StoreError> {
        let (clients, _) = self.layout();
        let query = Query::subtree::<TokenGrant>(
            clients.clone(),
            Filter::And(vec![
                Filter::equals("oxAuthTokenCode", token),
                Filter::equals("oxAuthTokenType", TokenKind::AccessToken.as_str()),
            ]),
        );

        let page = self.store.search::<TokenGrant>(&query, PageRequest::first(1)).await?;

        Ok(page.entries.into_iter().next().map(|grant| {
            let client = grant.client_id;
            clients.child("inum", client.as_str())
        }))
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;

    use super::*;
    use crate::{
        config::ConfigSnapshot,
        model::ClientId,
        store::{DnRef, MemoryStore},
    };

    fn grant(client: &str, code: &str, kind: TokenKind, expires_at: u64) -> TokenGrant {
        let client_dn = DnRef::from_str("ou=clients,o=warden").child("inum", client);
        TokenGrant {
            dn: client_dn.child("oxAuthTokenCode", code),
            code: code.to_owned(),
            kind,
            client_id: ClientId::new(client.to_owned()),
            expires_at: UnixTime(expires_at),
        }
    }

    async fn service() -> Result<(Arc<MemoryStore>, StoreGrantService, tokio::sync::watch::Sender<Arc<ConfigSnapshot>>)> {
        let store = Arc::new(MemoryStore::new());
        for g in [
            grant("c1", "a1", TokenKind::AccessToken, 100),
            grant("c1", "r1", TokenKind::RefreshToken, 500),
            grant("c2", "a2", TokenKind::AccessToken, 50),
            grant("c2", "code2", TokenKind::AuthorizationCode, 300),
        ] {
            store.persist(&g).await?;
        }
        let (tx, rx) = tokio::sync::watch::channel(Arc::new(ConfigSnapshot::default()));
        Ok((store.clone(), StoreGrantService::new(store, rx), tx))
    }

    #[tokio::test]
    async fn expired_grants_are_removed() -> Result<()> {
        let (store, grants, _tx) = service().await?;

        let report = grants.clean_up(UnixTime(100)).await;

        assert_eq!(report.processed, 2);
        assert_eq!(store.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn a_clients_grants_are_removed_together() -> Result<()> {
        let (store, grants, _tx) = service().await?;

        let report = grants.remove_grants_of(ClientIdRef::from_str("c2")).await;

        assert_eq!(report.processed, 2);
        assert_eq!(store.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn access_tokens_resolve_to_their_client() -> Result<()> {
        let (_store, grants, _tx) = service().await?;

        let dn = grants.client_dn_for_access_token("a2").await?;
        assert_eq!(dn.as_deref().map(DnRef::as_str), Some("inum=c2,ou=clients,o=warden"));

        assert_eq!(grants.client_dn_for_access_token("r1").await?, None);
        assert_eq!(grants.client_dn_for_access_token("unknown").await?, None);
        Ok(())
    }
}
