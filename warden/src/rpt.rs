//! UMA requesting party token lifecycle
//!
//! RPTs live below the client they were issued to, in a branch that is
//! created the first time the client receives one:
//!
//! ```text
//! uniqueIdentifier=<id>,ou=uma_requester_permission_token,inum=<client>,<clients base>
//! ```
//!
//! Read paths log store failures and report "not found"; mutations return
//! them.

use std::sync::Arc;

use aliri_clock::{Clock, System, UnixTime};

use crate::{
    config::ConfigWatch,
    error::{RptError, StoreError},
    grant::GrantService,
    model::{random_code, Branch, Client, ResourceSetPermission, UmaRpt},
    paged::{PagedQuery, SweepReport},
    store::{Dn, DnRef, Entry, Filter, PageRequest, Query, Store, StoreExt},
};

const RPT_BRANCH: &str = "uma_requester_permission_token";
const ID_LEN: usize = 24;
const CODE_LEN: usize = 40;

/// The branch below a client that holds its RPTs
#[must_use]
pub fn branch_dn(client_dn: &DnRef) -> Dn {
    client_dn.child("ou", RPT_BRANCH)
}

/// Issues, finds and expires requesting party tokens
#[derive(Debug)]
pub struct RptManager<C = System> {
    store: Arc<dyn Store>,
    grants: Arc<dyn GrantService>,
    config: ConfigWatch,
    clock: C,
}

impl RptManager<System> {
    /// Constructs a manager using the system clock
    pub fn new(store: Arc<dyn Store>, grants: Arc<dyn GrantService>, config: ConfigWatch) -> Self {
        Self::with_clock(store, grants, config, System)
    }
}

impl<C: Clock + Send + Sync> RptManager<C> {
    /// Constructs a manager using the given clock
    pub fn with_clock(
        store: Arc<dyn Store>,
        grants: Arc<dyn GrantService>,
        config: ConfigWatch,
        clock: C,
    ) -> Self {
        Self {
            store,
            grants,
            config,
            clock,
        }
    }

    fn clients_base(&self) -> Dn {
        self.config.borrow().statics.base_dn.clients.clone()
    }

    /// Issues an RPT to the client that presented `authorization`
    ///
    /// The authorization must be a bearer access token issued to a known
    /// client.
    ///
    /// # Errors
    ///
    /// The authorization is not a bearer token, no grant or client owns the
    /// token, or the store failed.
    #[tracing::instrument(skip(self, authorization))]
    pub async fn create(
        &self,
        authorization: &str,
        am_host: &str,
        is_global: bool,
    ) -> Result<UmaRpt, RptError> {
        let token = authorization
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(RptError::InvalidAuthorization)?;

        let client_dn = self
            .grants
            .client_dn_for_access_token(token)
            .await?
            .ok_or(RptError::UnknownGrant)?;
        let client = self
            .store
            .find::<Client>(&client_dn)
            .await?
            .ok_or(RptError::UnknownGrant)?;

        let (id, code) = (random_code(ID_LEN), random_code(CODE_LEN));
        let lifetime = self.config.borrow().app.uma_rpt_lifetime;
        let now = self.clock.now();

        let rpt = UmaRpt {
            dn: branch_dn(&client_dn).child("uniqueIdentifier", &id),
            id,
            code,
            client_id: client.client_id,
            am_host: am_host.to_owned(),
            is_global,
            created_at: now,
            expires_at: UnixTime(now.0.saturating_add(lifetime)),
            permissions: Vec::new(),
        };

        self.persist(&rpt).await?;
        tracing::info!(store.dn = %rpt.dn, "RPT issued");
        Ok(rpt)
    }

    /// Stores an RPT, creating its client's RPT branch first if needed
    ///
    /// # Errors
    ///
    /// The store failed or already holds the RPT.
    pub async fn persist(&self, rpt: &UmaRpt) -> Result<(), RptError> {
        if let Some(branch) = rpt.dn.parent() {
            self.ensure_branch(branch).await?;
        }
        self.store.persist(rpt).await?;
        Ok(())
    }

    async fn ensure_branch(&self, dn: &DnRef) -> Result<(), StoreError> {
        if self.store.contains(Branch::OBJECT_CLASS, dn).await? {
            return Ok(());
        }

        let branch = Branch {
            dn: dn.to_owned(),
            name: RPT_BRANCH.to_owned(),
        };
        match self.store.persist(&branch).await {
            Ok(()) => {
                tracing::debug!(store.dn = %dn, "RPT branch created");
                Ok(())
            }
            Err(StoreError::AlreadyExists(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn search_by_code(&self, code: &str) -> Result<Option<UmaRpt>, StoreError> {
        let query = Query::subtree::<UmaRpt>(
            self.clients_base(),
            Filter::equals("oxAuthTokenCode", code),
        );
        let page = self.store.search::<UmaRpt>(&query, PageRequest::first(1)).await?;
        Ok(page.entries.into_iter().next())
    }

    /// Finds the RPT with the given token value
    pub async fn find_by_code(&self, code: &str) -> Option<UmaRpt> {
        match self.search_by_code(code).await {
            Ok(rpt) => rpt,
            Err(err) => {
                let error: &dyn std::error::Error = &err;
                tracing::warn!(error, "unable to look up RPT");
                None
            }
        }
    }

    /// Deletes the RPT with the given token value
    ///
    /// Returns whether an RPT was deleted.
    ///
    /// # Errors
    ///
    /// The store failed.
    pub async fn delete(&self, code: &str) -> Result<bool, RptError> {
        let rpt = match self.search_by_code(code).await? {
            Some(rpt) => rpt,
            None => return Ok(false),
        };

        self.store.remove(&rpt.dn).await?;
        tracing::debug!(store.dn = %rpt.dn, "RPT deleted");
        Ok(true)
    }

    /// Adds a permission to an RPT
    ///
    /// Attaching a permission the RPT already holds changes nothing.
    ///
    /// # Errors
    ///
    /// The store failed.
    pub async fn attach_permission(
        &self,
        rpt: &mut UmaRpt,
        permission: &ResourceSetPermission,
    ) -> Result<(), RptError> {
        if rpt.permissions.contains(&permission.dn) {
            return Ok(());
        }

        rpt.permissions.push(permission.dn.clone());
        if let Err(err) = self.store.merge(&*rpt).await {
            rpt.permissions.pop();
            return Err(err.into());
        }
        Ok(())
    }

    /// The permissions an RPT holds, in the order they were attached
    ///
    /// References to permissions that no longer exist are skipped.
    pub async fn permissions_of(&self, rpt: &UmaRpt) -> Vec<ResourceSetPermission> {
        let mut permissions = Vec::with_capacity(rpt.permissions.len());

        for dn in &rpt.permissions {
            match self.store.find::<ResourceSetPermission>(dn).await {
                Ok(Some(permission)) => permissions.push(permission),
                Ok(None) => {
                    tracing::warn!(store.dn = %dn, rpt = %rpt.dn, "skipping dangling permission reference");
                }
                Err(err) => {
                    let error: &dyn std::error::Error = &err;
                    tracing::warn!(store.dn = %dn, error, "unable to read permission");
                }
            }
        }

        permissions
    }

    /// Finds the permission an RPT holds on a resource set
    pub async fn find_permission_by_resource_set_id(
        &self,
        rpt: &UmaRpt,
        resource_set_id: &str,
    ) -> Option<ResourceSetPermission> {
        self.permissions_of(rpt)
            .await
            .into_iter()
            .find(|p| p.resource_set_id == resource_set_id)
    }

    /// Removes every RPT that has expired as of `now`
    pub async fn cleanup(&self, now: UnixTime) -> SweepReport {
        let chunk_size = self.config.borrow().app.chunk_size();
        let query = Query::subtree::<UmaRpt>(
            self.clients_base(),
            Filter::at_or_before("oxAuthExpiration", now.0),
        );

        PagedQuery::new(&*self.store, query, chunk_size)
            .remove_all::<UmaRpt>()
            .await
    }
}
