//! # Synchronization Coordinator
//!
//! The coordinator owns the in-memory view of every resource collection and
//! is the only writer of that view and of the pending queue. It applies
//! optimistic local mutations, tracks connectivity, drains the queue against
//! the remote API, and refreshes the view from the server.
//!
//! ## Flow
//!
//! UI action → [`mutate`] → optimistic in-memory apply + durable enqueue →
//! (while online) fire-and-forget drain → on acknowledgment the operation is
//! dequeued → [`refresh`] reconciles server-side effects back into the view.
//! While offline everything stays queued; a connectivity or login signal
//! triggers the drain.
//!
//! ## Failure Absorption
//!
//! Network errors during [`refresh`] or [`process_sync`] never escape as
//! errors: they become state (`is_online`, `pending_count`, per-item error
//! flags) the UI renders as a connectivity banner. Only malformed calls
//! (an update without a target id) fail hard.
//!
//! [`mutate`]: SyncCoordinator::mutate
//! [`refresh`]: SyncCoordinator::refresh
//! [`process_sync`]: SyncCoordinator::process_sync

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::api::{ApiRequest, ApiResponse, HttpApi, RemoteApi};
use crate::config::SyncConfig;
use crate::error::{ApiError, SyncError};
use crate::model::{
    Collections, DrainReport, OperationKind, OperationStatus, PendingOperation, SyncStatus,
    record_id,
};
use crate::store::{LocalStore, OperationQueue, SnapshotStore};

/// Orchestrates reads, optimistic writes, connectivity, and queue draining
///
/// Cheap to clone; clones share the same engine state. Construct with
/// injected store handles ([`new`]) for tests, or let [`open`] wire up the
/// production HTTP transport and local database.
///
/// [`new`]: SyncCoordinator::new
/// [`open`]: SyncCoordinator::open
pub struct SyncCoordinator<A: RemoteApi> {
    inner: Arc<Inner<A>>,
}

impl<A: RemoteApi> Clone for SyncCoordinator<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<A> {
    api: A,
    snapshots: SnapshotStore,
    queue: OperationQueue,
    config: SyncConfig,
    // Held only for synchronous in-memory work, never across an await
    view: Mutex<ViewState>,
    // Held for the whole logical drain; concurrent process_sync calls coalesce on it
    drain: tokio::sync::Mutex<()>,
}

struct ViewState {
    collections: Collections,
    seeded: bool,
    online: bool,
    snapshot_at: Option<DateTime<Utc>>,
}

impl SyncCoordinator<HttpApi> {
    /// Open the production engine: local database + HTTP transport
    pub async fn open(config: SyncConfig) -> Result<Self, SyncError> {
        let store = LocalStore::open(&config).await?;
        let snapshots = store.snapshots(&config);
        let queue = store.queue(&config).await?;
        let api = HttpApi::new(&config)?;
        Ok(Self::new(api, snapshots, queue, config))
    }
}

impl<A: RemoteApi> SyncCoordinator<A> {
    /// Build a coordinator from its injected dependencies
    pub fn new(api: A, snapshots: SnapshotStore, queue: OperationQueue, config: SyncConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                api,
                snapshots,
                queue,
                config,
                view: Mutex::new(ViewState {
                    collections: Collections::new(),
                    seeded: false,
                    online: true,
                    snapshot_at: None,
                }),
                drain: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Replace the in-memory view with fresh server data
    ///
    /// All-or-nothing: either every configured collection is listed
    /// successfully and swapped in together, or the view is left untouched.
    /// On success the snapshot is rewritten; still-queued operations are
    /// replayed on top of the fresh data so optimistic state is not lost.
    /// On failure an unseeded session is seeded from the snapshot instead
    /// (degraded boot).
    pub async fn refresh(&self) -> bool {
        let mut staging = Collections::new();
        for resource in &self.inner.config.resources {
            match self.send(ApiRequest::list(resource.clone())).await {
                Ok(response) if response.ok => match response.data {
                    Some(Value::Array(records)) => {
                        staging.insert(resource.clone(), records);
                    }
                    _ => {
                        tracing::warn!(%resource, "listing returned no record array");
                        return self.refresh_failed().await;
                    }
                },
                Ok(response) => {
                    tracing::warn!(
                        %resource,
                        "server refused listing: {}",
                        response.message.as_deref().unwrap_or("no message")
                    );
                    return self.refresh_failed().await;
                }
                Err(err) => {
                    tracing::warn!(%resource, "listing failed: {err}");
                    self.note_send_failure(&err);
                    return self.refresh_failed().await;
                }
            }
        }

        let pending = self.inner.queue.peek_all();
        {
            let mut view = self.view();
            view.collections = staging.clone();
            // Unacknowledged work stays visible on top of the server truth
            Self::replay(&mut view.collections, &pending);
            view.seeded = true;
            view.online = true;
        }

        // The snapshot holds server truth only; queued operations are
        // replayed at load time, so persisting them here would double-apply.
        let saved = self.inner.snapshots.save(&staging).await;
        if saved {
            self.view().snapshot_at = Some(Utc::now());
        }
        tracing::info!(
            collections = staging.len(),
            snapshot_saved = saved,
            "view refreshed from server"
        );
        true
    }

    /// Apply a local mutation optimistically and queue it for delivery
    ///
    /// The in-memory apply and the queue append both complete before any
    /// network suspension; the caller's UI never waits on latency. Creates
    /// get a locally generated id that stays stable in the local view (the
    /// post-drain refresh brings in whatever id the server assigned).
    /// Returns the applied record id.
    pub async fn mutate(
        &self,
        resource: &str,
        kind: OperationKind,
        target_id: Option<String>,
        mut payload: Value,
    ) -> Result<String, SyncError> {
        let applied_id = match kind {
            OperationKind::Create => {
                let object = payload
                    .as_object_mut()
                    .ok_or_else(|| SyncError::invalid("create payload must be an object"))?;
                match object.get("id").and_then(Value::as_str) {
                    Some(id) => id.to_string(),
                    None => {
                        let local_id = Uuid::new_v4().to_string();
                        object.insert("id".to_string(), json!(local_id));
                        local_id
                    }
                }
            }
            OperationKind::Update => {
                if !payload.is_object() {
                    return Err(SyncError::invalid("update payload must be an object"));
                }
                target_id
                    .clone()
                    .ok_or_else(|| SyncError::invalid("update requires a target id"))?
            }
            OperationKind::Delete => target_id
                .clone()
                .ok_or_else(|| SyncError::invalid("delete requires a target id"))?,
        };

        {
            let mut view = self.view();
            Self::apply(&mut view.collections, resource, kind, &applied_id, &payload);
        }

        let queue_target = match kind {
            OperationKind::Create => None,
            _ => target_id,
        };
        self.inner
            .queue
            .enqueue(resource, kind, queue_target, payload)
            .await;
        tracing::debug!(
            resource,
            kind = kind.as_str(),
            %applied_id,
            pending = self.inner.queue.size(),
            "mutation applied locally"
        );

        if self.is_online() {
            let this = self.clone();
            tokio::spawn(async move {
                this.process_sync().await;
            });
        }
        Ok(applied_id)
    }

    /// Drain the pending queue in FIFO order, then refresh from the server
    ///
    /// An acknowledged operation is dequeued. A server rejection halts
    /// further operations for that resource (ordering is preserved) and
    /// bumps the item's retry count. A network failure halts the whole
    /// drain and flips connectivity to offline. Concurrent calls coalesce:
    /// a second caller awaits the in-flight drain instead of double-sending.
    pub async fn process_sync(&self) -> DrainReport {
        let _guard = match self.inner.drain.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                let _g = self.inner.drain.lock().await;
                return DrainReport::default();
            }
        };

        let report = self.drain_queue().await;
        // Drain-then-refresh order is fixed: server-side effects (computed
        // fields, id reassignment) come back only after the drain attempt.
        self.refresh().await;
        tracing::info!(
            succeeded = report.succeeded,
            failed = report.failed,
            pending = self.inner.queue.size(),
            "sync pass finished"
        );
        report
    }

    /// Connectivity signal from the host platform
    ///
    /// The offline transition is advisory (stops speculative sends, rolls
    /// nothing back). The online transition triggers a drain.
    pub async fn on_connectivity_change(&self, is_online: bool) {
        let transitioned = {
            let mut view = self.view();
            let was = view.online;
            view.online = is_online;
            was != is_online
        };
        if transitioned {
            tracing::info!(is_online, "connectivity changed");
            if is_online {
                self.process_sync().await;
            }
        }
    }

    /// Session login signal
    ///
    /// Drains first so work done offline reaches the server before the
    /// fresh pull overwrites the view; the drain's trailing refresh is that
    /// pull.
    pub async fn on_login(&self, bearer: &str) {
        self.inner.api.set_bearer(Some(bearer.to_string()));
        self.view().online = true;
        tracing::info!("session opened, draining offline work");
        self.process_sync().await;
    }

    /// Session logout signal
    ///
    /// Discards the in-memory view and the persisted snapshot. The pending
    /// queue survives: unsent work must outlive a logout/login cycle on the
    /// same device.
    pub async fn on_logout(&self) {
        self.inner.api.set_bearer(None);
        {
            let mut view = self.view();
            view.collections.clear();
            view.seeded = false;
            view.snapshot_at = None;
        }
        self.inner.snapshots.clear().await;
        tracing::info!(
            pending = self.inner.queue.size(),
            "session closed, local view and snapshot discarded"
        );
    }

    /// Current records of one resource collection
    pub fn collection(&self, resource: &str) -> Vec<Value> {
        self.view()
            .collections
            .get(resource)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of operations awaiting acknowledgment
    pub fn pending_count(&self) -> usize {
        self.inner.queue.size()
    }

    /// Believed connectivity state
    pub fn is_online(&self) -> bool {
        self.view().online
    }

    /// Capture time of the last persisted snapshot, for "data as of …"
    pub async fn last_snapshot_timestamp(&self) -> Option<DateTime<Utc>> {
        let cached = self.view().snapshot_at;
        match cached {
            Some(ts) => Some(ts),
            None => self.inner.snapshots.timestamp().await,
        }
    }

    /// Operations that exhausted their retries and need manual resolution
    pub fn failed_operations(&self) -> Vec<PendingOperation> {
        self.inner.queue.failed_operations()
    }

    /// Drop a queued operation after the user resolved it by hand
    pub async fn cancel_operation(&self, queue_id: &str) {
        self.inner.queue.cancel(queue_id).await;
    }

    /// Status triple the UI polls for its banner
    pub fn status(&self) -> SyncStatus {
        let view = self.view();
        SyncStatus {
            online: view.online,
            pending_count: self.inner.queue.size(),
            last_snapshot: view.snapshot_at,
        }
    }

    async fn drain_queue(&self) -> DrainReport {
        let ops = self.inner.queue.peek_all();
        let mut halted: HashSet<String> = HashSet::new();
        let mut report = DrainReport::default();

        for op in ops {
            if op.status == OperationStatus::Failed {
                // Terminal failure blocks its resource until cancelled,
                // otherwise a later operation would jump the order
                halted.insert(op.resource.clone());
                continue;
            }
            if halted.contains(&op.resource) {
                continue;
            }

            match self.send(Self::op_request(&op)).await {
                Ok(response) if response.ok => {
                    self.inner.queue.remove(&op.queue_id).await;
                    report.succeeded += 1;
                }
                Ok(response) => {
                    let message = response
                        .message
                        .unwrap_or_else(|| "rejected by server".to_string());
                    tracing::warn!(
                        queue_id = %op.queue_id,
                        resource = %op.resource,
                        "server rejected operation: {message}"
                    );
                    self.inner.queue.mark_attempt(&op.queue_id, &message).await;
                    halted.insert(op.resource.clone());
                    report.failed += 1;
                }
                Err(err) => {
                    tracing::warn!(
                        queue_id = %op.queue_id,
                        "send failed, operation stays queued: {err}"
                    );
                    report.failed += 1;
                    self.note_send_failure(&err);
                    if err.is_transient() {
                        // Dead link: everything behind this waits for the
                        // next connectivity trigger
                        break;
                    }
                    halted.insert(op.resource.clone());
                }
            }
        }
        report
    }

    async fn refresh_failed(&self) -> bool {
        let needs_seed = !self.view().seeded;
        if needs_seed {
            self.seed_from_snapshot().await;
        }
        false
    }

    /// Degraded boot: last snapshot plus queued operations replayed in order
    async fn seed_from_snapshot(&self) {
        let snapshot = self.inner.snapshots.load().await;
        let pending = self.inner.queue.peek_all();

        let mut view = self.view();
        if view.seeded {
            return;
        }
        let (mut collections, snapshot_at) = match snapshot {
            Some(snapshot) => (snapshot.collections, Some(snapshot.captured_at)),
            None => (Collections::new(), None),
        };
        Self::replay(&mut collections, &pending);
        tracing::info!(
            collections = collections.len(),
            replayed = pending.len(),
            snapshot_at = ?snapshot_at,
            "seeded view from local snapshot"
        );
        view.collections = collections;
        view.snapshot_at = snapshot_at;
        view.seeded = true;
    }

    /// Per-send bound, independent of the transport's own timeout
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        match tokio::time::timeout(self.inner.config.send_timeout, self.inner.api.call(request))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(ApiError::Timeout),
        }
    }

    /// Failed-send heuristic: a transient failure while believed-online
    /// flips the state to offline
    fn note_send_failure(&self, err: &ApiError) {
        if !err.is_transient() {
            return;
        }
        let mut view = self.view();
        if view.online {
            view.online = false;
            tracing::info!("send failed while believed online, now offline");
        }
    }

    fn op_request(op: &PendingOperation) -> ApiRequest {
        let data = match op.kind {
            OperationKind::Create => op.payload.clone(),
            OperationKind::Update => {
                let mut data = op.payload.clone();
                if let (Some(object), Some(target)) = (data.as_object_mut(), &op.target_id) {
                    object
                        .entry("id".to_string())
                        .or_insert_with(|| json!(target));
                }
                data
            }
            OperationKind::Delete => json!({ "id": op.target_id }),
        };
        ApiRequest {
            resource: op.resource.clone(),
            action: op.kind.into(),
            data: Some(data),
        }
    }

    fn apply(
        collections: &mut Collections,
        resource: &str,
        kind: OperationKind,
        applied_id: &str,
        payload: &Value,
    ) {
        let records = collections.entry(resource.to_string()).or_default();
        match kind {
            OperationKind::Create => {
                // Upsert: when the create already reached the server but its
                // acknowledgment was lost, a replay over a fresh listing would
                // otherwise duplicate the record
                match records
                    .iter_mut()
                    .find(|record| record_id(record) == Some(applied_id))
                {
                    Some(record) => *record = payload.clone(),
                    None => records.push(payload.clone()),
                }
            }
            OperationKind::Update => {
                let Some(record) = records
                    .iter_mut()
                    .find(|record| record_id(record) == Some(applied_id))
                else {
                    tracing::debug!(resource, applied_id, "update target not in local view");
                    return;
                };
                if let (Some(object), Some(changes)) =
                    (record.as_object_mut(), payload.as_object())
                {
                    for (field, value) in changes {
                        if field != "id" {
                            object.insert(field.clone(), value.clone());
                        }
                    }
                } else {
                    *record = payload.clone();
                }
            }
            OperationKind::Delete => {
                records.retain(|record| record_id(record) != Some(applied_id));
            }
        }
    }

    /// Re-apply unacknowledged operations in enqueue order
    fn replay(collections: &mut Collections, pending: &[PendingOperation]) {
        for op in pending {
            let applied_id = match op.kind {
                OperationKind::Create => record_id(&op.payload).map(str::to_string),
                _ => op.target_id.clone(),
            };
            let Some(applied_id) = applied_id else {
                tracing::warn!(queue_id = %op.queue_id, "queued operation has no id, skipping replay");
                continue;
            };
            Self::apply(collections, &op.resource, op.kind, &applied_id, &op.payload);
        }
    }

    fn view(&self) -> std::sync::MutexGuard<'_, ViewState> {
        self.inner.view.lock().expect("view lock")
    }
}
