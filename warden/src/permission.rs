//! Resource set permissions

use std::sync::Arc;

use aliri_clock::{Clock, System, UnixTime};

use crate::{
    config::ConfigWatch,
    error::StoreError,
    model::{random_code, ResourceSetPermission},
    paged::{PagedQuery, SweepReport},
    store::{Dn, DnRef, Filter, Query, Store, StoreExt},
};

const TICKET_LEN: usize = 32;

/// Creates, finds and expires resource set permissions
#[derive(Debug)]
pub struct PermissionManager<C = System> {
    store: Arc<dyn Store>,
    config: ConfigWatch,
    clock: C,
}

impl PermissionManager<System> {
    /// Constructs a manager using the system clock
    pub fn new(store: Arc<dyn Store>, config: ConfigWatch) -> Self {
        Self::with_clock(store, config, System)
    }
}

impl<C: Clock + Send + Sync> PermissionManager<C> {
    /// Constructs a manager using the given clock
    pub fn with_clock(store: Arc<dyn Store>, config: ConfigWatch, clock: C) -> Self {
        Self {
            store,
            config,
            clock,
        }
    }

    fn base(&self) -> Dn {
        self.config.borrow().statics.base_dn.uma_permissions.clone()
    }

    /// Records a permission on a resource set, valid for `lifetime` seconds
    ///
    /// # Errors
    ///
    /// The store rejected the new entry.
    pub async fn create(
        &self,
        resource_set_id: &str,
        scopes: impl IntoIterator<Item = String>,
        am_host: &str,
        lifetime: u64,
    ) -> Result<ResourceSetPermission, StoreError> {
        let ticket = random_code(TICKET_LEN);
        let now = self.clock.now();

        let permission = ResourceSetPermission {
            dn: self.base().child("oxTicket", &ticket),
            ticket,
            resource_set_id: resource_set_id.to_owned(),
            scopes: scopes.into_iter().collect(),
            am_host: am_host.to_owned(),
            expires_at: UnixTime(now.0.saturating_add(lifetime)),
        };

        self.store.persist(&permission).await?;
        tracing::debug!(store.dn = %permission.dn, "permission created");
        Ok(permission)
    }

    /// Finds the permission handed out under `ticket`
    ///
    /// # Errors
    ///
    /// The store failed.
    pub async fn find_by_ticket(
        &self,
        ticket: &str,
    ) -> Result<Option<ResourceSetPermission>, StoreError> {
        self.find(&self.base().child("oxTicket", ticket)).await
    }

    /// Finds the permission stored at `dn`
    ///
    /// # Errors
    ///
    /// The store failed.
    pub async fn find(&self, dn: &DnRef) -> Result<Option<ResourceSetPermission>, StoreError> {
        self.store.find(dn).await
    }

    /// Removes every permission that has expired as of `now`
    pub async fn cleanup(&self, now: UnixTime) -> SweepReport {
        let (base, chunk_size) = {
            let snapshot = self.config.borrow();
            (
                snapshot.statics.base_dn.uma_permissions.clone(),
                snapshot.app.chunk_size(),
            )
        };
        let query = Query::subtree::<ResourceSetPermission>(
            base,
            Filter::at_or_before("oxAuthExpiration", now.0),
        );

        PagedQuery::new(&*self.store, query, chunk_size)
            .remove_all::<ResourceSetPermission>()
            .await
    }
}
