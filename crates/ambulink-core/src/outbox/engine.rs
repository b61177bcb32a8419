//! Outbox drain loop.
//!
//! Every trigger (connectivity, timer, manual) ends up in [`OutboxEngine::drain`].
//! Only one drain runs at a time; a trigger that arrives while one is running is
//! coalesced into it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use super::submitter::{RecordSubmitter, SubmitError};
use crate::connectivity::ConnectivityMonitor;
use crate::models::{FieldRecord, RecordId};
use crate::services::RecordStoreService;
use crate::util::sanitize_error;
use crate::Result;

/// Per-record outcome of one submission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Synced,
    /// Permanently rejected; the record is held until requeued
    Failed,
    /// Transient failure; the record stays pending
    Retrying,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
    pub record_id: RecordId,
    pub outcome: SyncOutcome,
    /// Attempts including this one
    pub attempts: u32,
    pub message: Option<String>,
}

pub type StatusCallback = Arc<dyn Fn(&SyncStatus) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainTrigger {
    Connectivity,
    Timer,
    Manual,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainSummary {
    pub synced: usize,
    pub failed: usize,
    pub retrying: usize,
    /// Corrupt rows skipped this pass
    pub skipped: usize,
    /// The pass ended before the queue was exhausted
    pub halted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainReport {
    /// Another drain was already running
    Coalesced,
    Completed {
        trigger: DrainTrigger,
        summary: DrainSummary,
    },
}

impl DrainReport {
    pub const fn summary(&self) -> Option<&DrainSummary> {
        match self {
            Self::Coalesced => None,
            Self::Completed { summary, .. } => Some(summary),
        }
    }
}

/// Pending-count and offline indicator for the UI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStatus {
    pub pending: usize,
    pub held: usize,
    pub online: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboxSettings {
    pub submit_timeout: Duration,
    /// Safety-net cadence while online
    pub sync_interval: Duration,
}

impl Default for OutboxSettings {
    fn default() -> Self {
        Self {
            submit_timeout: Duration::from_secs(15),
            sync_interval: Duration::from_secs(30),
        }
    }
}

impl From<&crate::config::ClientConfig> for OutboxSettings {
    fn from(config: &crate::config::ClientConfig) -> Self {
        Self {
            submit_timeout: config.submit_timeout,
            sync_interval: config.sync_interval,
        }
    }
}

enum Step {
    Continue,
    Halt,
}

#[derive(Clone)]
pub struct OutboxEngine {
    store: RecordStoreService,
    submitter: Arc<dyn RecordSubmitter>,
    connectivity: ConnectivityMonitor,
    settings: OutboxSettings,
    on_status: Option<StatusCallback>,
    drain_lock: Arc<Mutex<()>>,
}

impl OutboxEngine {
    pub fn new(
        store: RecordStoreService,
        submitter: Arc<dyn RecordSubmitter>,
        connectivity: ConnectivityMonitor,
        settings: OutboxSettings,
    ) -> Self {
        Self {
            store,
            submitter,
            connectivity,
            settings,
            on_status: None,
            drain_lock: Arc::new(Mutex::new(())),
        }
    }

    #[must_use]
    pub fn with_status_callback(mut self, callback: StatusCallback) -> Self {
        self.on_status = Some(callback);
        self
    }

    pub const fn store(&self) -> &RecordStoreService {
        &self.store
    }

    pub async fn queue_status(&self) -> Result<QueueStatus> {
        let counts = self.store.counts().await?;
        Ok(QueueStatus {
            pending: counts.pending,
            held: counts.held,
            online: self.connectivity.is_online(),
        })
    }

    /// Return a held record to automatic draining.
    pub async fn requeue(&self, id: &RecordId) -> Result<()> {
        self.store.requeue(id).await?;
        tracing::info!(record_id = %id, "Requeued held record");
        Ok(())
    }

    /// Run one pass over the pending queue in FIFO order.
    ///
    /// Never fails: store problems end the pass early and are logged.
    pub async fn drain(&self, trigger: DrainTrigger) -> DrainReport {
        let Ok(_guard) = self.drain_lock.try_lock() else {
            tracing::debug!(?trigger, "Drain already running; coalescing trigger");
            return DrainReport::Coalesced;
        };

        let mut summary = DrainSummary::default();
        let scan = match self.store.scan_pending().await {
            Ok(scan) => scan,
            Err(error) => {
                tracing::error!(error = %error, "Failed to read outbox; ending drain");
                summary.halted = true;
                return DrainReport::Completed { trigger, summary };
            }
        };

        for skipped in &scan.skipped {
            tracing::warn!(
                seq = skipped.seq,
                record_id = %skipped.record_id,
                reason = %skipped.reason,
                "Skipping corrupt outbox record"
            );
        }
        summary.skipped = scan.skipped.len();

        for record in scan.records.iter().filter(|record| !record.held) {
            match self.submit_one(record, &mut summary).await {
                Ok(Step::Continue) => {}
                Ok(Step::Halt) => {
                    summary.halted = true;
                    break;
                }
                Err(error) => {
                    tracing::error!(
                        record_id = %record.record_id,
                        error = %error,
                        "Outbox store update failed; ending drain"
                    );
                    summary.halted = true;
                    break;
                }
            }
        }

        tracing::info!(
            ?trigger,
            synced = summary.synced,
            failed = summary.failed,
            retrying = summary.retrying,
            skipped = summary.skipped,
            halted = summary.halted,
            "Outbox drain finished"
        );
        DrainReport::Completed { trigger, summary }
    }

    async fn submit_one(&self, record: &FieldRecord, summary: &mut DrainSummary) -> Result<Step> {
        let submission = record.submission();
        let attempts = record.attempts.saturating_add(1);

        let result = tokio::time::timeout(
            self.settings.submit_timeout,
            self.submitter.submit(&submission),
        )
        .await
        .unwrap_or_else(|_| {
            Err(SubmitError::Transient(format!(
                "submission timed out after {}s",
                self.settings.submit_timeout.as_secs()
            )))
        });

        match result {
            Ok(acceptance) => {
                self.store.mark_settled(&record.record_id).await?;
                tracing::info!(record_id = %record.record_id, ?acceptance, attempts, "Record settled");
                summary.synced += 1;
                self.report(record.record_id, SyncOutcome::Synced, attempts, None);
                Ok(Step::Continue)
            }
            Err(SubmitError::Transient(message)) => {
                self.store.record_failure(&record.record_id, &message).await?;
                tracing::warn!(record_id = %record.record_id, attempts, error = %message, "Submission failed; will retry");
                summary.retrying += 1;
                self.report(record.record_id, SyncOutcome::Retrying, attempts, Some(message));
                Ok(Step::Halt)
            }
            Err(SubmitError::Rejected(message)) => {
                self.store.hold(&record.record_id, &message).await?;
                tracing::error!(record_id = %record.record_id, attempts, error = %message, "Record rejected; holding");
                summary.failed += 1;
                self.report(record.record_id, SyncOutcome::Failed, attempts, Some(message));
                Ok(Step::Continue)
            }
        }
    }

    fn report(
        &self,
        record_id: RecordId,
        outcome: SyncOutcome,
        attempts: u32,
        message: Option<String>,
    ) {
        if let Some(callback) = self.on_status.as_ref() {
            callback(&SyncStatus {
                record_id,
                outcome,
                attempts,
                message: message.map(|message| sanitize_error(&message)),
            });
        }
    }

    /// Start the trigger loop. It stops when the returned handle is dropped.
    pub fn spawn(self) -> OutboxHandle {
        let (manual_tx, manual_rx) = mpsc::channel(1);
        let online_rx = self.connectivity.subscribe();
        let task = tokio::spawn(self.run(online_rx, manual_rx));
        OutboxHandle { manual_tx, task }
    }

    async fn run(
        self,
        mut online_rx: watch::Receiver<bool>,
        mut manual_rx: mpsc::Receiver<()>,
    ) {
        let mut ticker = tokio::time::interval(self.settings.sync_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        if self.connectivity.is_online() {
            self.drain(DrainTrigger::Connectivity).await;
        }

        loop {
            let trigger = tokio::select! {
                changed = online_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if !*online_rx.borrow_and_update() {
                        continue;
                    }
                    DrainTrigger::Connectivity
                }
                _ = ticker.tick() => {
                    if !self.connectivity.is_online() {
                        continue;
                    }
                    DrainTrigger::Timer
                }
                request = manual_rx.recv() => {
                    if request.is_none() {
                        break;
                    }
                    DrainTrigger::Manual
                }
            };

            let report = self.drain(trigger).await;
            let halted = report.summary().is_some_and(|summary| summary.halted);

            // Triggers raised during the pass were served by it, unless it
            // halted: a reconnect seen mid-pass must still start a new one
            while manual_rx.try_recv().is_ok() {}
            if !halted {
                drop(online_rx.borrow_and_update());
            }
            ticker.reset();
        }

        tracing::debug!("Outbox trigger loop stopped");
    }
}

/// Handle to a running trigger loop.
pub struct OutboxHandle {
    manual_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl OutboxHandle {
    /// Ask for a drain. A request made while one is queued or running is coalesced.
    pub fn request_sync(&self) {
        if let Err(mpsc::error::TrySendError::Closed(())) = self.manual_tx.try_send(()) {
            tracing::warn!("Outbox loop is not running; manual sync ignored");
        }
    }

    /// Stop the loop and wait for it to exit.
    pub async fn shutdown(self) {
        let Self { manual_tx, task } = self;
        drop(manual_tx);
        if let Err(error) = task.await {
            tracing::warn!(error = %error, "Outbox loop ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RecordPayload, RecordSubmission};
    use crate::outbox::submitter::{Acceptance, SubmitResult};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::collections::{HashMap, HashSet, VecDeque};
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Notify;

    /// Endpoint stand-in: scripted failures per record, idempotent on record id.
    #[derive(Default)]
    struct ScriptedEndpoint {
        script: StdMutex<HashMap<RecordId, VecDeque<SubmitError>>>,
        seen: StdMutex<Vec<RecordId>>,
        accepted: StdMutex<HashSet<RecordId>>,
    }

    impl ScriptedEndpoint {
        fn fail_next(&self, id: RecordId, error: SubmitError) {
            self.script
                .lock()
                .unwrap()
                .entry(id)
                .or_default()
                .push_back(error);
        }

        fn seen(&self) -> Vec<RecordId> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RecordSubmitter for ScriptedEndpoint {
        async fn submit(&self, submission: &RecordSubmission) -> SubmitResult {
            let id = submission.record_id;
            self.seen.lock().unwrap().push(id);
            if let Some(error) = self
                .script
                .lock()
                .unwrap()
                .get_mut(&id)
                .and_then(VecDeque::pop_front)
            {
                return Err(error);
            }
            if self.accepted.lock().unwrap().insert(id) {
                Ok(Acceptance::Created)
            } else {
                Ok(Acceptance::AlreadyExisted)
            }
        }
    }

    async fn engine_with(
        endpoint: Arc<ScriptedEndpoint>,
        online: bool,
    ) -> (OutboxEngine, ConnectivityMonitor) {
        let store = RecordStoreService::open_in_memory().await.unwrap();
        let connectivity = ConnectivityMonitor::new(online);
        let engine = OutboxEngine::new(
            store,
            endpoint,
            connectivity.clone(),
            OutboxSettings::default(),
        );
        (engine, connectivity)
    }

    async fn append(engine: &OutboxEngine, complaint: &str) -> RecordId {
        engine
            .store()
            .append(RecordPayload::new("7", complaint))
            .await
            .unwrap()
    }

    fn collect_statuses(engine: OutboxEngine) -> (OutboxEngine, Arc<StdMutex<Vec<SyncStatus>>>) {
        let statuses = Arc::new(StdMutex::new(Vec::new()));
        let sink = statuses.clone();
        let engine = engine.with_status_callback(Arc::new(move |status: &SyncStatus| {
            sink.lock().unwrap().push(status.clone());
        }));
        (engine, statuses)
    }

    #[tokio::test]
    async fn offline_capture_drains_in_order_with_retry() {
        let endpoint = Arc::new(ScriptedEndpoint::default());
        let (engine, _connectivity) = engine_with(endpoint.clone(), false).await;
        let (engine, statuses) = collect_statuses(engine);

        let r1 = append(&engine, "one").await;
        let r2 = append(&engine, "two").await;
        let r3 = append(&engine, "three").await;
        endpoint.fail_next(r2, SubmitError::Transient("connection reset".to_string()));

        let first = engine.drain(DrainTrigger::Connectivity).await;
        let summary = first.summary().unwrap();
        assert_eq!((summary.synced, summary.retrying), (1, 1));
        assert!(summary.halted);
        assert_eq!(engine.store().get(&r2).await.unwrap().unwrap().attempts, 1);

        engine.drain(DrainTrigger::Timer).await;

        assert_eq!(endpoint.seen(), vec![r1, r2, r2, r3]);
        for id in [r1, r2, r3] {
            assert!(engine.store().get(&id).await.unwrap().unwrap().settled);
        }
        let outcomes: Vec<_> = statuses
            .lock()
            .unwrap()
            .iter()
            .map(|status| (status.record_id, status.outcome))
            .collect();
        assert_eq!(
            outcomes,
            vec![
                (r1, SyncOutcome::Synced),
                (r2, SyncOutcome::Retrying),
                (r2, SyncOutcome::Synced),
                (r3, SyncOutcome::Synced),
            ]
        );
    }

    #[tokio::test]
    async fn resubmission_reuses_record_id_and_settles_on_already_exists() {
        let endpoint = Arc::new(ScriptedEndpoint::default());
        let (engine, _connectivity) = engine_with(endpoint.clone(), true).await;
        let id = append(&engine, "fall").await;

        // Accepted by the endpoint, but the device never recorded it
        endpoint.accepted.lock().unwrap().insert(id);
        engine.drain(DrainTrigger::Manual).await;

        assert_eq!(endpoint.seen(), vec![id]);
        assert!(engine.store().get(&id).await.unwrap().unwrap().settled);
        assert_eq!(endpoint.accepted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rejected_record_is_held_and_skipped_until_requeued() {
        let endpoint = Arc::new(ScriptedEndpoint::default());
        let (engine, _connectivity) = engine_with(endpoint.clone(), true).await;
        let (engine, statuses) = collect_statuses(engine);

        let r1 = append(&engine, "one").await;
        let r2 = append(&engine, "two").await;
        endpoint.fail_next(r1, SubmitError::Rejected("missing room (422)".to_string()));

        let report = engine.drain(DrainTrigger::Manual).await;
        let summary = report.summary().unwrap();
        assert_eq!((summary.failed, summary.synced), (1, 1));
        assert!(!summary.halted);

        let held = engine.store().get(&r1).await.unwrap().unwrap();
        assert!(held.held && !held.settled);
        assert_eq!(held.attempts, 1);
        assert_eq!(statuses.lock().unwrap()[0].outcome, SyncOutcome::Failed);
        assert_eq!(
            engine.queue_status().await.unwrap(),
            QueueStatus {
                pending: 1,
                held: 1,
                online: true
            }
        );

        engine.drain(DrainTrigger::Timer).await;
        assert_eq!(endpoint.seen(), vec![r1, r2]);

        engine.requeue(&r1).await.unwrap();
        engine.drain(DrainTrigger::Manual).await;
        assert_eq!(endpoint.seen(), vec![r1, r2, r1]);
        assert!(engine.store().get(&r1).await.unwrap().unwrap().settled);
    }

    /// Submitter that parks until released, to hold a drain open.
    struct GatedEndpoint {
        entered: Notify,
        release: Notify,
        calls: StdMutex<usize>,
    }

    #[async_trait]
    impl RecordSubmitter for GatedEndpoint {
        async fn submit(&self, _submission: &RecordSubmission) -> SubmitResult {
            *self.calls.lock().unwrap() += 1;
            self.entered.notify_one();
            self.release.notified().await;
            Ok(Acceptance::Created)
        }
    }

    #[tokio::test]
    async fn trigger_during_drain_is_coalesced() {
        let endpoint = Arc::new(GatedEndpoint {
            entered: Notify::new(),
            release: Notify::new(),
            calls: StdMutex::new(0),
        });
        let store = RecordStoreService::open_in_memory().await.unwrap();
        store.append(RecordPayload::new("7", "one")).await.unwrap();
        let engine = OutboxEngine::new(
            store,
            endpoint.clone(),
            ConnectivityMonitor::new(true),
            OutboxSettings::default(),
        );

        let running = tokio::spawn({
            let engine = engine.clone();
            async move { engine.drain(DrainTrigger::Connectivity).await }
        });
        endpoint.entered.notified().await;

        assert_eq!(
            engine.drain(DrainTrigger::Manual).await,
            DrainReport::Coalesced
        );
        assert_eq!(*endpoint.calls.lock().unwrap(), 1);

        endpoint.release.notify_one();
        let report = running.await.unwrap();
        assert_eq!(report.summary().unwrap().synced, 1);
        assert_eq!(*endpoint.calls.lock().unwrap(), 1);
    }

    struct StalledEndpoint;

    #[async_trait]
    impl RecordSubmitter for StalledEndpoint {
        async fn submit(&self, _submission: &RecordSubmission) -> SubmitResult {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn submission_timeout_is_transient() {
        let store = RecordStoreService::open_in_memory().await.unwrap();
        let id = store.append(RecordPayload::new("7", "one")).await.unwrap();
        let engine = OutboxEngine::new(
            store,
            Arc::new(StalledEndpoint),
            ConnectivityMonitor::new(true),
            OutboxSettings {
                submit_timeout: Duration::from_secs(2),
                ..OutboxSettings::default()
            },
        );

        let report = engine.drain(DrainTrigger::Manual).await;
        assert_eq!(report.summary().unwrap().retrying, 1);
        let record = engine.store().get(&id).await.unwrap().unwrap();
        assert!(!record.settled);
        assert!(record.last_error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn going_online_triggers_drain() {
        let endpoint = Arc::new(ScriptedEndpoint::default());
        let (engine, connectivity) = engine_with(endpoint.clone(), false).await;
        let id = append(&engine, "one").await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let engine = engine.with_status_callback(Arc::new(move |status: &SyncStatus| {
            let _ = tx.send(status.clone());
        }));
        let handle = engine.spawn();
        tokio::task::yield_now().await;
        assert!(endpoint.seen().is_empty());

        connectivity.set_online(true);
        let status = rx.recv().await.unwrap();
        assert_eq!(status.record_id, id);
        assert_eq!(status.outcome, SyncOutcome::Synced);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn manual_request_drains_via_loop() {
        let endpoint = Arc::new(ScriptedEndpoint::default());
        let (engine, _connectivity) = engine_with(endpoint.clone(), false).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let engine = engine.with_status_callback(Arc::new(move |status: &SyncStatus| {
            let _ = tx.send(status.outcome);
        }));
        let store = engine.store().clone();
        let handle = engine.spawn();

        store.append(RecordPayload::new("7", "one")).await.unwrap();
        handle.request_sync();
        assert_eq!(rx.recv().await, Some(SyncOutcome::Synced));
        handle.shutdown().await;
    }

    /// Parks the first submission until released and fails it; later ones succeed.
    struct FlappingEndpoint {
        entered: Notify,
        release: Notify,
        calls: StdMutex<usize>,
    }

    #[async_trait]
    impl RecordSubmitter for FlappingEndpoint {
        async fn submit(&self, _submission: &RecordSubmission) -> SubmitResult {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                *calls += 1;
                *calls
            };
            if call == 1 {
                self.entered.notify_one();
                self.release.notified().await;
                return Err(SubmitError::Transient("link dropped".to_string()));
            }
            Ok(Acceptance::Created)
        }
    }

    #[tokio::test]
    async fn reconnect_during_failing_pass_starts_another_drain() {
        let endpoint = Arc::new(FlappingEndpoint {
            entered: Notify::new(),
            release: Notify::new(),
            calls: StdMutex::new(0),
        });
        let store = RecordStoreService::open_in_memory().await.unwrap();
        let id = store.append(RecordPayload::new("7", "one")).await.unwrap();
        let connectivity = ConnectivityMonitor::new(false);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let engine = OutboxEngine::new(
            store,
            endpoint.clone(),
            connectivity.clone(),
            OutboxSettings {
                sync_interval: Duration::from_secs(3600),
                ..OutboxSettings::default()
            },
        )
        .with_status_callback(Arc::new(move |status: &SyncStatus| {
            let _ = tx.send(status.outcome);
        }));
        let store = engine.store().clone();
        let handle = engine.spawn();

        connectivity.set_online(true);
        endpoint.entered.notified().await;
        // The link flaps while the first submission is still in flight
        connectivity.set_online(false);
        connectivity.set_online(true);
        endpoint.release.notify_one();

        let wait = Duration::from_secs(5);
        assert_eq!(
            tokio::time::timeout(wait, rx.recv()).await.unwrap(),
            Some(SyncOutcome::Retrying)
        );
        assert_eq!(
            tokio::time::timeout(wait, rx.recv()).await.unwrap(),
            Some(SyncOutcome::Synced)
        );
        assert_eq!(*endpoint.calls.lock().unwrap(), 2);
        assert!(store.get(&id).await.unwrap().unwrap().settled);
        handle.shutdown().await;
    }
}
