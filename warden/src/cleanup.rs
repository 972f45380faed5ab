//! The periodic cleanup sweep
//!
//! A cleanup tick runs a fixed sequence of phases. Each phase is a chunked
//! sweep with per-record error isolation, so one bad record or one failed
//! phase never stops the rest of the tick.

use std::{fmt, sync::Arc};

use aliri_clock::{Clock, System, UnixTime};
use async_trait::async_trait;

use crate::{
    config::ConfigWatch,
    error::StoreError,
    grant::GrantService,
    guard::{SingleFlight, TickOutcome},
    model::{Client, DeviceRegistration, DeviceStatus, EphemeralRequest, MetricEntry},
    paged::{PagedQuery, SweepReport},
    permission::PermissionManager,
    rpt::RptManager,
    store::{Entry, Filter, Query, Store},
    timer::Periodic,
};

/// How old an unanswered device request or an unfinished device
/// registration gets before it is removed, in seconds
pub const EPHEMERAL_WINDOW_SECS: u64 = 90;

const SECS_PER_DAY: u64 = 86_400;

/// A phase of the cleanup sweep, in execution order
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Expired token grants
    Grants,
    /// Clients whose secret has expired, with their grants
    Clients,
    /// Expired requesting party tokens
    Rpts,
    /// Expired resource set permissions
    Permissions,
    /// Stale device requests
    EphemeralRequests,
    /// Stale unfinished device registrations
    DeviceRegistrations,
    /// Metric samples past retention
    Metrics,
}

impl Phase {
    /// The name of the phase, as logged
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Grants => "grants",
            Self::Clients => "clients",
            Self::Rpts => "rpts",
            Self::Permissions => "permissions",
            Self::EphemeralRequests => "ephemeral_requests",
            Self::DeviceRegistrations => "device_registrations",
            Self::Metrics => "metrics",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What each phase of a cleanup tick did, in execution order
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// The report of each phase
    pub phases: Vec<(Phase, SweepReport)>,
}

impl CleanupReport {
    /// The report of a single phase
    #[must_use]
    pub fn phase(&self, phase: Phase) -> Option<SweepReport> {
        self.phases
            .iter()
            .find(|(p, _)| *p == phase)
            .map(|(_, report)| *report)
    }

    /// The reports of all phases combined
    #[must_use]
    pub fn total(&self) -> SweepReport {
        let mut total = SweepReport::default();
        for (_, report) in &self.phases {
            total.absorb(*report);
        }
        total
    }
}

/// Runs the cleanup sweep
#[derive(Debug)]
pub struct CleanupScheduler<C = System> {
    store: Arc<dyn Store>,
    grants: Arc<dyn GrantService>,
    rpts: Arc<RptManager<C>>,
    permissions: Arc<PermissionManager<C>>,
    config: ConfigWatch,
    clock: C,
    guard: SingleFlight,
}

impl<C: Clock + Send + Sync> CleanupScheduler<C> {
    /// Constructs a scheduler over the collaborators it sweeps
    pub fn new(
        store: Arc<dyn Store>,
        grants: Arc<dyn GrantService>,
        rpts: Arc<RptManager<C>>,
        permissions: Arc<PermissionManager<C>>,
        config: ConfigWatch,
        clock: C,
    ) -> Self {
        Self {
            store,
            grants,
            rpts,
            permissions,
            config,
            clock,
            guard: SingleFlight::new(),
        }
    }

    /// Runs the sweep as of now, unless a sweep is already running
    pub async fn tick(&self) -> TickOutcome<CleanupReport> {
        let _flight = match self.guard.try_acquire() {
            Some(flight) => flight,
            None => {
                tracing::debug!("cleanup already running; skipping");
                return TickOutcome::AlreadyRunning;
            }
        };

        TickOutcome::Completed(self.run_cleanup(self.clock.now()).await)
    }

    /// Runs every phase of the sweep as of `now`
    #[tracing::instrument(skip(self, now), fields(now = now.0))]
    pub async fn run_cleanup(&self, now: UnixTime) -> CleanupReport {
        let (base_dn, chunk_size, keep_days) = {
            let snapshot = self.config.borrow();
            (
                snapshot.statics.base_dn.clone(),
                snapshot.app.chunk_size(),
                snapshot.app.metric_reporter_keep_data_days,
            )
        };
        let ephemeral_cutoff = now.0.saturating_sub(EPHEMERAL_WINDOW_SECS);
        let metric_cutoff = now.0.saturating_sub(keep_days.saturating_mul(SECS_PER_DAY));

        let mut report = CleanupReport::default();

        report.phases.push((Phase::Grants, self.grants.clean_up(now).await));
        report.phases.push((Phase::Clients, self.remove_expired_clients(now, chunk_size).await));
        report.phases.push((Phase::Rpts, self.rpts.cleanup(now).await));
        report.phases.push((Phase::Permissions, self.permissions.cleanup(now).await));

        let requests = Query::subtree::<EphemeralRequest>(
            base_dn.ephemeral_requests,
            Filter::at_or_before("creationDate", ephemeral_cutoff),
        );
        report.phases.push((
            Phase::EphemeralRequests,
            self.remove_all::<EphemeralRequest>(requests, chunk_size).await,
        ));

        let registrations = Query::subtree::<DeviceRegistration>(
            base_dn.device_registrations,
            Filter::And(vec![
                Filter::at_or_before("creationDate", ephemeral_cutoff),
                Filter::equals("oxStatus", status_name(DeviceStatus::Active)).not(),
            ]),
        );
        report.phases.push((
            Phase::DeviceRegistrations,
            self.remove_all::<DeviceRegistration>(registrations, chunk_size).await,
        ));

        let metrics = Query::subtree::<MetricEntry>(
            base_dn.metrics,
            Filter::at_or_before("oxStartDate", metric_cutoff),
        );
        report.phases.push((
            Phase::Metrics,
            self.remove_all::<MetricEntry>(metrics, chunk_size).await,
        ));

        for (phase, sweep) in &report.phases {
            if sweep.aborted {
                tracing::error!(%phase, processed = sweep.processed, "cleanup phase aborted");
            } else if sweep.processed > 0 || sweep.failed > 0 {
                tracing::debug!(%phase, processed = sweep.processed, failed = sweep.failed, "cleanup phase finished");
            }
        }

        let total = report.total();
        tracing::info!(
            processed = total.processed,
            failed = total.failed,
            "cleanup finished"
        );

        report
    }

    async fn remove_all<T: Entry>(&self, query: Query, chunk_size: usize) -> SweepReport {
        PagedQuery::new(&*self.store, query, chunk_size)
            .remove_all::<T>()
            .await
    }

    /// Removes clients whose secret expired before `now`, grants first
    async fn remove_expired_clients(&self, now: UnixTime, chunk_size: usize) -> SweepReport {
        let clients = self.config.borrow().statics.base_dn.clients.clone();
        let query = Query::subtree::<Client>(
            clients,
            Filter::And(vec![
                Filter::present("oxAuthClientSecretExpiresAt"),
                Filter::before("oxAuthClientSecretExpiresAt", now.0),
            ]),
        );

        let store = &*self.store;
        let grants = &*self.grants;
        PagedQuery::new(store, query, chunk_size)
            .for_each(|client: Client| async move {
                let removed = grants.remove_grants_of(&client.client_id).await;
                if removed.aborted {
                    return Err(StoreError::Unavailable {
                        reason: format!("unable to remove grants of client '{}'", client.client_id),
                    });
                }

                store.remove(client.dn()).await?;
                tracing::info!(store.dn = %client.dn, "expired client removed");
                Ok::<_, StoreError>(())
            })
            .await
    }
}

fn status_name(status: DeviceStatus) -> &'static str {
    match status {
        DeviceStatus::Pending => "pending",
        DeviceStatus::Active => "active",
    }
}

#[async_trait]
impl<C: Clock + Send + Sync + 'static> Periodic for CleanupScheduler<C> {
    fn name(&self) -> &'static str {
        "cleanup"
    }

    async fn tick(&self) {
        let _ = CleanupScheduler::tick(self).await;
    }
}
