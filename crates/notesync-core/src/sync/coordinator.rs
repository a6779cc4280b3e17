//! Serialized sync passes on a background worker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::db::{LocalStore, SettingsRepository};
use crate::error::{Error, Result};
use crate::models::{JournalStatus, SyncSettings};
use crate::remote::RemoteClient;
use crate::state::SyncRunState;

use super::config::SyncConfig;
use super::conflicts::ConflictResolver;
use super::events::{EventBus, EventStatus, SyncEvent, SyncPhase};
use super::journal::Journal;
use super::network::{ConnectivityProbe, DeferReason, GateDecision, NetworkGate};
use super::pass::{PassContext, PassReport};

/// Result of asking for a sync pass
#[derive(Debug)]
pub enum SyncRequest {
    /// A pass was handed to the worker
    Scheduled(PassTicket),
    /// A pass is already running; the request was dropped
    AlreadyRunning,
    /// The network gate refused; the request is remembered as pending
    Deferred(DeferReason),
    /// `resume_pending` found no deferred request
    NothingPending,
}

impl SyncRequest {
    pub const fn is_scheduled(&self) -> bool {
        matches!(self, Self::Scheduled(_))
    }

    /// The ticket of a scheduled pass
    pub fn into_ticket(self) -> Option<PassTicket> {
        match self {
            Self::Scheduled(ticket) => Some(ticket),
            _ => None,
        }
    }
}

/// Handle to a scheduled pass; dropping it does not cancel the pass
#[derive(Debug)]
pub struct PassTicket(oneshot::Receiver<PassReport>);

impl PassTicket {
    /// Wait for the pass to finish
    pub async fn wait(self) -> Result<PassReport> {
        self.0.await.map_err(|_| Error::WorkerStopped)
    }
}

struct PassJob {
    progress_delay: Duration,
    done: oneshot::Sender<PassReport>,
}

struct Shared<S, R, P> {
    ctx: Arc<PassContext<S, R>>,
    gate: NetworkGate<P>,
    running: AtomicBool,
}

/// Clears the running flag unless ownership moved to the worker
struct RunningGuard<'a>(Option<&'a AtomicBool>);

impl RunningGuard<'_> {
    fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        if let Some(flag) = self.0 {
            flag.store(false, Ordering::SeqCst);
        }
    }
}

/// Runs at most one sync pass at a time for one user.
///
/// Passes execute on a background task, so callers never block on network
/// I/O. Requests that arrive while a pass runs are dropped; requests refused
/// by the network gate are remembered and replayed by [`Self::resume_pending`].
pub struct SyncCoordinator<S, R, P> {
    shared: Arc<Shared<S, R, P>>,
    jobs: mpsc::Sender<PassJob>,
}

impl<S, R, P> Clone for SyncCoordinator<S, R, P> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            jobs: self.jobs.clone(),
        }
    }
}

impl<S, R, P> SyncCoordinator<S, R, P>
where
    S: LocalStore + SettingsRepository + 'static,
    R: RemoteClient + 'static,
    P: ConnectivityProbe + 'static,
{
    /// Create the coordinator and spawn its worker.
    ///
    /// Must be called from within a Tokio runtime. The worker exits once every
    /// clone of the coordinator has been dropped.
    pub fn new(config: SyncConfig, store: Arc<S>, remote: Arc<R>, probe: P) -> Self {
        let ctx = PassContext {
            user_id: config.user_id,
            remote_timeout: config.remote_timeout,
            journal: Journal::new(Arc::clone(&store)),
            store,
            remote,
            events: EventBus::new(config.event_capacity),
        };
        let shared = Arc::new(Shared {
            ctx: Arc::new(ctx),
            gate: NetworkGate::new(probe),
            running: AtomicBool::new(false),
        });

        let (jobs, receiver) = mpsc::channel(1);
        tokio::spawn(run_worker(Arc::clone(&shared), receiver));

        Self { shared, jobs }
    }

    /// Ask for a pass.
    ///
    /// Returns immediately: the pass itself runs on the worker and its report
    /// is delivered through the returned ticket.
    pub async fn request_sync(&self) -> Result<SyncRequest> {
        if self.is_running() {
            tracing::debug!("Sync already running; request ignored");
            return Ok(SyncRequest::AlreadyRunning);
        }

        let ctx = &self.shared.ctx;
        let settings = ctx.store.load_sync_settings(&ctx.user_id).await?;

        // A deferral never takes the running flag.
        if let GateDecision::Defer(reason) = self.shared.gate.check(settings.wifi_only) {
            self.defer(reason).await;
            return Ok(SyncRequest::Deferred(reason));
        }

        if self
            .shared
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("Sync already running; request ignored");
            return Ok(SyncRequest::AlreadyRunning);
        }
        let guard = RunningGuard(Some(&self.shared.running));

        let (done, report) = oneshot::channel();
        self.jobs
            .try_send(PassJob {
                progress_delay: settings.progress_notification_delay(),
                done,
            })
            .map_err(|_| Error::WorkerStopped)?;
        guard.disarm();

        Ok(SyncRequest::Scheduled(PassTicket(report)))
    }

    /// Replay a deferred request, typically on connectivity change or app start
    pub async fn resume_pending(&self) -> Result<SyncRequest> {
        let ctx = &self.shared.ctx;
        if !ctx.store.load_sync_settings(&ctx.user_id).await?.pending_sync {
            return Ok(SyncRequest::NothingPending);
        }
        tracing::info!("Resuming deferred sync for user {}", ctx.user_id);
        self.request_sync().await
    }

    pub async fn run_state(&self) -> Result<SyncRunState> {
        if self.is_running() {
            return Ok(SyncRunState::Running);
        }
        let ctx = &self.shared.ctx;
        let settings = ctx.store.load_sync_settings(&ctx.user_id).await?;
        Ok(if settings.pending_sync {
            SyncRunState::Pending
        } else {
            SyncRunState::Idle
        })
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.shared.ctx.events.subscribe()
    }

    /// `true` while at least one conflict marker exists
    pub fn conflict_indicator(&self) -> watch::Receiver<bool> {
        self.shared.ctx.events.conflict_indicator()
    }

    /// Recompute the conflict indicator from the store, e.g. after entries
    /// were deleted outside a pass
    pub async fn refresh_conflict_indicator(&self) -> bool {
        self.shared.ctx.refresh_conflict_indicator().await > 0
    }

    pub fn events(&self) -> &EventBus {
        &self.shared.ctx.events
    }

    pub fn journal(&self) -> &Journal<S> {
        &self.shared.ctx.journal
    }

    pub fn conflicts(&self) -> ConflictResolver<S, R> {
        ConflictResolver::new(Arc::clone(&self.shared.ctx))
    }

    pub fn user_id(&self) -> &str {
        &self.shared.ctx.user_id
    }

    pub async fn settings(&self) -> Result<SyncSettings> {
        let ctx = &self.shared.ctx;
        ctx.store.load_sync_settings(&ctx.user_id).await
    }

    pub async fn save_settings(&self, settings: &SyncSettings) -> Result<()> {
        let ctx = &self.shared.ctx;
        ctx.store.save_sync_settings(&ctx.user_id, settings).await
    }

    async fn defer(&self, reason: DeferReason) {
        let ctx = &self.shared.ctx;
        tracing::info!("Sync deferred for user {}: {:?}", ctx.user_id, reason);

        if let Err(e) = ctx.store.set_pending_sync(&ctx.user_id, true).await {
            tracing::warn!("Failed to persist pending sync flag: {}", e);
        }
        ctx.journal
            .record(reason.journal_action(), JournalStatus::Ok, 0)
            .await;
        ctx.events
            .publish(SyncEvent::new(SyncPhase::Deferral, EventStatus::Pending, 0));
    }
}

async fn run_worker<S, R, P>(shared: Arc<Shared<S, R, P>>, mut jobs: mpsc::Receiver<PassJob>)
where
    S: LocalStore + SettingsRepository,
    R: RemoteClient,
{
    while let Some(job) = jobs.recv().await {
        let report = run_with_progress(&shared.ctx, job.progress_delay).await;
        shared.running.store(false, Ordering::SeqCst);
        if job.done.send(report).is_err() {
            tracing::trace!("Pass ticket dropped before completion");
        }
    }
    tracing::debug!("Sync worker stopped");
}

/// Run a pass, announcing it once if it outlasts `delay`
async fn run_with_progress<S, R>(ctx: &PassContext<S, R>, delay: Duration) -> PassReport
where
    S: LocalStore + SettingsRepository,
    R: RemoteClient,
{
    let pass = ctx.run();
    tokio::pin!(pass);

    tokio::select! {
        biased;
        report = &mut pass => report,
        () = tokio::time::sleep(delay) => {
            ctx.events
                .publish(SyncEvent::new(SyncPhase::Pass, EventStatus::InProgress, 0));
            pass.await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::LibSqlStore;
    use crate::models::{Entry, EntryContent, JournalAction};
    use crate::remote::MemoryRemote;
    use crate::sync::network::{Connectivity, ConnectivityState};

    async fn coordinator(
        connectivity: Connectivity,
    ) -> SyncCoordinator<LibSqlStore, MemoryRemote, ConnectivityState> {
        let store = Arc::new(LibSqlStore::open_in_memory().await.unwrap());
        SyncCoordinator::new(
            SyncConfig::new("alice"),
            store,
            Arc::new(MemoryRemote::new()),
            ConnectivityState::new(connectivity),
        )
    }

    #[tokio::test]
    async fn deferred_request_is_pending_until_resumed() {
        let sync = coordinator(Connectivity::None).await;

        let request = sync.request_sync().await.unwrap();
        assert!(matches!(request, SyncRequest::Deferred(DeferReason::NoInternet)));
        assert_eq!(sync.run_state().await.unwrap(), SyncRunState::Pending);
        assert!(!sync.is_running());

        sync.shared.gate.probe().set(Connectivity::Unmetered);
        let report = sync
            .resume_pending()
            .await
            .unwrap()
            .into_ticket()
            .unwrap()
            .wait()
            .await
            .unwrap();

        assert_eq!(report.failed(), 0);
        assert_eq!(sync.run_state().await.unwrap(), SyncRunState::Idle);
        assert!(matches!(
            sync.resume_pending().await.unwrap(),
            SyncRequest::NothingPending
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_deferrals_are_each_recorded() {
        let sync = coordinator(Connectivity::None).await;

        let requests: Vec<_> = (0..4)
            .map(|_| {
                let sync = sync.clone();
                tokio::spawn(async move { sync.request_sync().await })
            })
            .collect();
        for request in requests {
            let request = request.await.unwrap().unwrap();
            assert!(matches!(request, SyncRequest::Deferred(DeferReason::NoInternet)));
        }

        assert!(!sync.is_running());
        assert_eq!(sync.run_state().await.unwrap(), SyncRunState::Pending);
        let history = sync.journal().history(10).await.unwrap();
        assert_eq!(history.len(), 4);
        assert!(history
            .iter()
            .all(|record| record.action == JournalAction::DeferredNoInternet));
    }

    #[tokio::test]
    async fn saving_stale_settings_keeps_deferred_request() {
        let sync = coordinator(Connectivity::None).await;
        let stale = sync.settings().await.unwrap();

        let request = sync.request_sync().await.unwrap();
        assert!(matches!(request, SyncRequest::Deferred(_)));

        sync.save_settings(&SyncSettings {
            wifi_only: true,
            ..stale
        })
        .await
        .unwrap();

        assert_eq!(sync.run_state().await.unwrap(), SyncRunState::Pending);
        assert!(sync.settings().await.unwrap().wifi_only);

        sync.shared.gate.probe().set(Connectivity::Unmetered);
        let resumed = sync.resume_pending().await.unwrap();
        assert!(resumed.is_scheduled());
        resumed.into_ticket().unwrap().wait().await.unwrap();
        assert_eq!(sync.run_state().await.unwrap(), SyncRunState::Idle);
    }

    #[tokio::test]
    async fn wifi_only_defers_on_metered_network() {
        let sync = coordinator(Connectivity::Metered).await;
        sync.save_settings(&SyncSettings {
            wifi_only: true,
            ..SyncSettings::default()
        })
        .await
        .unwrap();

        let request = sync.request_sync().await.unwrap();

        assert!(matches!(request, SyncRequest::Deferred(DeferReason::NoWifi)));
        let history = sync.journal().history(1).await.unwrap();
        assert_eq!(history[0].action, JournalAction::DeferredNoWifi);
    }

    #[tokio::test]
    async fn second_request_during_pass_is_dropped() {
        let sync = coordinator(Connectivity::Unmetered).await;
        sync.shared.ctx.remote.set_latency(Duration::from_millis(50));

        let first = sync.request_sync().await.unwrap();
        let second = sync.request_sync().await.unwrap();

        assert!(first.is_scheduled());
        assert!(matches!(second, SyncRequest::AlreadyRunning));
        assert_eq!(sync.run_state().await.unwrap(), SyncRunState::Running);

        first.into_ticket().unwrap().wait().await.unwrap();
        assert!(!sync.is_running());
        assert!(sync.request_sync().await.unwrap().is_scheduled());
    }

    #[tokio::test]
    async fn slow_pass_announces_progress_once() {
        let sync = coordinator(Connectivity::Unmetered).await;
        sync.save_settings(&SyncSettings {
            progress_notification_delay_ms: 10,
            ..SyncSettings::default()
        })
        .await
        .unwrap();
        sync.shared.ctx.remote.set_latency(Duration::from_millis(40));
        let mut events = sync.subscribe();

        let ticket = sync.request_sync().await.unwrap().into_ticket().unwrap();
        ticket.wait().await.unwrap();

        let mut in_progress = 0;
        while let Ok(event) = events.try_recv() {
            if event.status == EventStatus::InProgress {
                in_progress += 1;
            }
        }
        assert_eq!(in_progress, 1);
    }

    #[tokio::test]
    async fn pass_pushes_new_entries() {
        let sync = coordinator(Connectivity::Unmetered).await;
        let entry = Entry::new(EntryContent::new("hello"));
        sync.shared.ctx.store.insert_entry(&entry).await.unwrap();

        let report = sync
            .request_sync()
            .await
            .unwrap()
            .into_ticket()
            .unwrap()
            .wait()
            .await
            .unwrap();

        assert_eq!(report.pushed.succeeded, 1);
        assert_eq!(report.total_affected(), 1);
        assert_eq!(sync.shared.ctx.remote.records("alice").len(), 1);
    }
}
