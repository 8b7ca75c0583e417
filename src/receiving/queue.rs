//! Per-session request serialisation.
//!
//! One worker task owns all mutating traffic of a session. Jobs arrive over
//! an mpsc channel, exactly one request is in flight at a time, and each
//! response is applied to the shared workspace before the next job starts,
//! so the local view always reflects submission order.

use serde::Serialize;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clients::ReceivingApi;
use crate::error::ReceivingError;
use crate::events::EventBus;
use crate::receiving::model::{FinalizeResult, PauseResult, ReceivingSummary, ScanStatus};
use crate::receiving::workspace::{Confirmation, ReceivingWorkspace, ScanApplied};

const QUEUE_CAPACITY: usize = 256;

pub type SharedWorkspace = Arc<Mutex<ReceivingWorkspace>>;

pub(crate) fn lock(workspace: &SharedWorkspace) -> MutexGuard<'_, ReceivingWorkspace> {
    workspace.lock().unwrap_or_else(|e| e.into_inner())
}

type Reply<T> = oneshot::Sender<Result<T, ReceivingError>>;

/// Outcome of one applied scan, returned to whoever submitted it.
#[derive(Debug, Clone, Serialize)]
pub struct ScanOutcome {
    /// Idempotency key sent with the request.
    pub ticket: Uuid,
    pub code: String,
    pub qty: f64,
    pub status: ScanStatus,
    pub applied: ScanApplied,
    /// The session was re-fetched because the line could not be located.
    pub refreshed: bool,
    pub summary: ReceivingSummary,
}

impl ScanOutcome {
    pub fn found(&self) -> bool {
        self.applied != ScanApplied::NotFound
    }
}

/// A scan accepted by the queue but not yet answered.
#[derive(Debug)]
pub struct PendingScan {
    pub ticket: Uuid,
    rx: oneshot::Receiver<Result<ScanOutcome, ReceivingError>>,
}

impl PendingScan {
    pub async fn outcome(self) -> Result<ScanOutcome, ReceivingError> {
        self.rx.await.map_err(|_| ReceivingError::QueueClosed)?
    }
}

/// Result of pressing "finalize".
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FinalizeGate {
    /// Incomplete lines: the operator must confirm first. No request was sent.
    NeedsConfirmation { confirmation: Confirmation },
    Finalized { result: FinalizeResult },
}

enum Job {
    Scan {
        code: String,
        qty: f64,
        ticket: Uuid,
        reply: Reply<ScanOutcome>,
    },
    SetQty {
        line_index: usize,
        received_qty: f64,
        note: Option<String>,
        reply: Reply<()>,
    },
    AcceptAll {
        only_pending: bool,
        reply: Reply<u32>,
    },
    ResetAll {
        reply: Reply<()>,
    },
    Refresh {
        reply: Reply<()>,
    },
    Pause {
        reply: Reply<PauseResult>,
    },
    Finalize {
        force: bool,
        reply: Reply<FinalizeResult>,
    },
    FinalizeGate {
        reply: Reply<FinalizeGate>,
    },
}

impl Job {
    fn name(&self) -> &'static str {
        match self {
            Job::Scan { .. } => "scan",
            Job::SetQty { .. } => "set_qty",
            Job::AcceptAll { .. } => "accept_all",
            Job::ResetAll { .. } => "reset_all",
            Job::Refresh { .. } => "refresh",
            Job::Pause { .. } => "pause",
            Job::Finalize { .. } => "finalize",
            Job::FinalizeGate { .. } => "finalize_gate",
        }
    }

    fn reject(self, err: ReceivingError) {
        match self {
            Job::Scan { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Job::SetQty { reply, .. } | Job::ResetAll { reply } | Job::Refresh { reply } => {
                let _ = reply.send(Err(err));
            }
            Job::AcceptAll { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Job::Pause { reply } => {
                let _ = reply.send(Err(err));
            }
            Job::Finalize { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Job::FinalizeGate { reply } => {
                let _ = reply.send(Err(err));
            }
        }
    }
}

#[derive(Debug, Default)]
struct QueueStats {
    queued: AtomicUsize,
    in_flight: AtomicBool,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct QueueStatus {
    pub queued: usize,
    pub in_flight: bool,
    pub closed: bool,
}

/// Handle to a session's worker. Dropping every handle closes the channel
/// and lets the worker finish.
#[derive(Debug)]
pub struct SessionQueue {
    tx: mpsc::Sender<Job>,
    cancel: CancellationToken,
    stats: Arc<QueueStats>,
    handle: JoinHandle<()>,
}

impl SessionQueue {
    pub fn spawn(
        api: Arc<dyn ReceivingApi>,
        workspace: SharedWorkspace,
        events: EventBus,
    ) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let cancel = CancellationToken::new();
        let stats = Arc::new(QueueStats::default());
        let worker = Worker {
            api,
            workspace,
            events,
            stats: stats.clone(),
        };
        let handle = tokio::spawn(worker.run(rx, cancel.clone()));
        Self {
            tx,
            cancel,
            stats,
            handle,
        }
    }

    pub fn status(&self) -> QueueStatus {
        QueueStatus {
            queued: self.stats.queued.load(Ordering::SeqCst),
            in_flight: self.stats.in_flight.load(Ordering::SeqCst),
            closed: self.cancel.is_cancelled() || self.tx.is_closed(),
        }
    }

    async fn dispatch<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> Job,
    ) -> Result<oneshot::Receiver<Result<T, ReceivingError>>, ReceivingError> {
        if self.cancel.is_cancelled() {
            return Err(ReceivingError::QueueClosed);
        }
        let (reply, rx) = oneshot::channel();
        self.stats.queued.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(make(reply)).await.is_err() {
            self.stats.queued.fetch_sub(1, Ordering::SeqCst);
            return Err(ReceivingError::QueueClosed);
        }
        Ok(rx)
    }

    async fn call<T>(&self, make: impl FnOnce(Reply<T>) -> Job) -> Result<T, ReceivingError> {
        let rx = self.dispatch(make).await?;
        rx.await.map_err(|_| ReceivingError::QueueClosed)?
    }

    /// Queue a scan without waiting for its response.
    pub async fn enqueue_scan(&self, code: &str, qty: f64) -> Result<PendingScan, ReceivingError> {
        let ticket = Uuid::new_v4();
        let code = code.to_string();
        let rx = self
            .dispatch(|reply| Job::Scan {
                code,
                qty,
                ticket,
                reply,
            })
            .await?;
        Ok(PendingScan { ticket, rx })
    }

    pub async fn scan(&self, code: &str, qty: f64) -> Result<ScanOutcome, ReceivingError> {
        self.enqueue_scan(code, qty).await?.outcome().await
    }

    pub async fn set_qty(
        &self,
        line_index: usize,
        received_qty: f64,
        note: Option<String>,
    ) -> Result<(), ReceivingError> {
        self.call(|reply| Job::SetQty {
            line_index,
            received_qty,
            note,
            reply,
        })
        .await
    }

    pub async fn accept_all(&self, only_pending: bool) -> Result<u32, ReceivingError> {
        self.call(|reply| Job::AcceptAll {
            only_pending,
            reply,
        })
        .await
    }

    pub async fn reset_all(&self) -> Result<(), ReceivingError> {
        self.call(|reply| Job::ResetAll { reply }).await
    }

    pub async fn refresh(&self) -> Result<(), ReceivingError> {
        self.call(|reply| Job::Refresh { reply }).await
    }

    pub async fn pause(&self) -> Result<PauseResult, ReceivingError> {
        self.call(|reply| Job::Pause { reply }).await
    }

    pub async fn finalize(&self, force: bool) -> Result<FinalizeResult, ReceivingError> {
        self.call(|reply| Job::Finalize { force, reply }).await
    }

    /// Decide between confirmation and finalize behind every job queued
    /// so far, so scans still in the queue count toward the decision.
    pub async fn finalize_gate(&self) -> Result<FinalizeGate, ReceivingError> {
        self.call(|reply| Job::FinalizeGate { reply }).await
    }

    /// Cancel the worker without waiting for it, as if it had died.
    #[cfg(test)]
    pub(crate) fn abort(&self) {
        self.cancel.cancel();
    }

    /// Stop accepting work. The request in flight completes; everything
    /// still queued is rejected with [`ReceivingError::QueueClosed`].
    pub async fn shutdown(self) {
        self.cancel.cancel();
        drop(self.tx);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "receiving queue worker ended abnormally");
        }
    }
}

struct Worker {
    api: Arc<dyn ReceivingApi>,
    workspace: SharedWorkspace,
    events: EventBus,
    stats: Arc<QueueStats>,
}

impl Worker {
    async fn run(self, mut rx: mpsc::Receiver<Job>, cancel: CancellationToken) {
        loop {
            let job = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                job = rx.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };
            self.stats.queued.fetch_sub(1, Ordering::SeqCst);
            self.stats.in_flight.store(true, Ordering::SeqCst);
            debug!(job = job.name(), "receiving job started");
            self.handle(job).await;
            self.stats.in_flight.store(false, Ordering::SeqCst);
        }

        rx.close();
        let mut rejected = 0usize;
        while let Some(job) = rx.recv().await {
            self.stats.queued.fetch_sub(1, Ordering::SeqCst);
            job.reject(ReceivingError::QueueClosed);
            rejected += 1;
        }
        info!(rejected, "receiving queue stopped");
    }

    async fn handle(&self, job: Job) {
        match job {
            Job::Scan {
                code,
                qty,
                ticket,
                reply,
            } => {
                let _ = reply.send(self.scan(code, qty, ticket).await);
            }
            Job::SetQty {
                line_index,
                received_qty,
                note,
                reply,
            } => {
                let _ = reply.send(self.set_qty(line_index, received_qty, note).await);
            }
            Job::AcceptAll {
                only_pending,
                reply,
            } => {
                let _ = reply.send(self.accept_all(only_pending).await);
            }
            Job::ResetAll { reply } => {
                let _ = reply.send(self.reset_all().await);
            }
            Job::Refresh { reply } => {
                let _ = reply.send(self.refresh().await);
            }
            Job::Pause { reply } => {
                let _ = reply.send(self.pause().await);
            }
            Job::Finalize { force, reply } => {
                let _ = reply.send(self.finalize(force).await);
            }
            Job::FinalizeGate { reply } => {
                let _ = reply.send(self.finalize_gate().await);
            }
        }
    }

    /// `(supplier, session_id)` when the session still accepts mutations.
    fn session(&self) -> Result<(String, String), ReceivingError> {
        let ws = lock(&self.workspace);
        let id = ws.ensure_mutable()?.to_string();
        Ok((ws.supplier.clone(), id))
    }

    fn emit_error(&self, op: &str, error: &ReceivingError) {
        warn!(op, error = %error, "receiving operation failed");
        self.events
            .emit("receiving_error", json!({ "op": op, "error": error.to_string() }));
    }

    async fn scan(&self, code: String, qty: f64, ticket: Uuid) -> Result<ScanOutcome, ReceivingError> {
        let (supplier, session_id) = self.session().inspect_err(|e| {
            lock(&self.workspace).scan_failed(&code, &e.to_string());
        })?;
        let key = ticket.to_string();
        let result = match self
            .api
            .scan_code(&supplier, &session_id, &code, qty, Some(&key))
            .await
        {
            Ok(result) => result,
            Err(e) => {
                let err = ReceivingError::from(e);
                lock(&self.workspace).scan_failed(&code, &err.to_string());
                self.emit_error("scan", &err);
                return Err(err);
            }
        };

        let status = result.status;
        let applied = lock(&self.workspace).apply_scan(&code, qty, result);
        let mut refreshed = false;
        if applied == ScanApplied::NeedsRefresh {
            debug!(session_id = %session_id, code = %code, "scan line not uniquely located, refreshing");
            match self.api.get_summary(&supplier, &session_id).await {
                Ok(snapshot) => {
                    lock(&self.workspace).apply_lines(snapshot.lines, snapshot.summary);
                    refreshed = true;
                }
                Err(e) => {
                    let err = ReceivingError::from(e);
                    lock(&self.workspace).action_failed("Obnovenie relácie zlyhalo", &err.to_string());
                    self.emit_error("refresh", &err);
                }
            }
        }

        let outcome = ScanOutcome {
            ticket,
            code,
            qty,
            status,
            applied,
            refreshed,
            summary: lock(&self.workspace).summary,
        };
        debug!(
            session_id = %session_id,
            code = %outcome.code,
            status = status.as_str(),
            "scan applied"
        );
        self.events.emit("receiving_scan_applied", &outcome);
        Ok(outcome)
    }

    async fn set_qty(
        &self,
        line_index: usize,
        received_qty: f64,
        note: Option<String>,
    ) -> Result<(), ReceivingError> {
        let (supplier, session_id) = self.session()?;
        match self
            .api
            .set_line_quantity(&supplier, &session_id, line_index, received_qty, note.as_deref())
            .await
        {
            Ok(result) => {
                let line = result.line.clone();
                lock(&self.workspace).apply_set_qty(line_index, result.line, result.summary)?;
                info!(session_id = %session_id, line_index, received_qty, "line quantity set");
                self.events.emit(
                    "receiving_line_updated",
                    json!({ "line_index": line_index, "line": line, "summary": result.summary }),
                );
                Ok(())
            }
            Err(e) => {
                let err = ReceivingError::from(e);
                lock(&self.workspace).edit_failed(line_index, &err.to_string());
                self.emit_error("set_qty", &err);
                Err(err)
            }
        }
    }

    async fn accept_all(&self, only_pending: bool) -> Result<u32, ReceivingError> {
        let (supplier, session_id) = self.session()?;
        match self
            .api
            .accept_all_items(&supplier, &session_id, only_pending)
            .await
        {
            Ok(result) => {
                let summary = result.summary;
                lock(&self.workspace).apply_bulk(result.lines, summary, result.message);
                info!(session_id = %session_id, updated = result.updated_count, only_pending, "accept-all applied");
                self.events.emit(
                    "receiving_accept_all",
                    json!({ "updated_count": result.updated_count, "summary": summary }),
                );
                Ok(result.updated_count)
            }
            Err(e) => {
                let err = ReceivingError::from(e);
                lock(&self.workspace).action_failed("Prijatie všetkých položiek zlyhalo", &err.to_string());
                self.emit_error("accept_all", &err);
                Err(err)
            }
        }
    }

    async fn reset_all(&self) -> Result<(), ReceivingError> {
        let (supplier, session_id) = self.session()?;
        match self.api.reset_all_items(&supplier, &session_id).await {
            Ok(result) => {
                let summary = result.summary;
                lock(&self.workspace).apply_bulk(result.lines, summary, result.message);
                info!(session_id = %session_id, "reset-all applied");
                self.events
                    .emit("receiving_reset", json!({ "summary": summary }));
                Ok(())
            }
            Err(e) => {
                let err = ReceivingError::from(e);
                lock(&self.workspace).action_failed("Vynulovanie zlyhalo", &err.to_string());
                self.emit_error("reset_all", &err);
                Err(err)
            }
        }
    }

    async fn refresh(&self) -> Result<(), ReceivingError> {
        let (supplier, session_id) = self.session()?;
        match self.api.get_summary(&supplier, &session_id).await {
            Ok(snapshot) => {
                let summary = snapshot.summary;
                lock(&self.workspace).apply_lines(snapshot.lines, summary);
                self.events
                    .emit("receiving_refreshed", json!({ "summary": summary }));
                Ok(())
            }
            Err(e) => {
                let err = ReceivingError::from(e);
                lock(&self.workspace).action_failed("Obnovenie relácie zlyhalo", &err.to_string());
                self.emit_error("refresh", &err);
                Err(err)
            }
        }
    }

    async fn pause(&self) -> Result<PauseResult, ReceivingError> {
        let (supplier, session_id) = self.session().inspect_err(|e| {
            lock(&self.workspace).pause_failed(&e.to_string());
        })?;
        match self.api.pause(&supplier, &session_id).await {
            Ok(paused) => {
                lock(&self.workspace).apply_paused(paused.clone());
                info!(session_id = %session_id, paused_at = %paused.paused_at, "receiving paused");
                self.events.emit("receiving_paused", &paused);
                Ok(paused)
            }
            Err(e) => {
                let err = ReceivingError::from(e);
                lock(&self.workspace).pause_failed(&err.to_string());
                self.emit_error("pause", &err);
                Err(err)
            }
        }
    }

    async fn finalize_gate(&self) -> Result<FinalizeGate, ReceivingError> {
        let confirmation = lock(&self.workspace).settle_finalize_gate()?;
        match confirmation {
            Some(confirmation) => {
                debug!(?confirmation, "finalize needs confirmation");
                Ok(FinalizeGate::NeedsConfirmation { confirmation })
            }
            None => self
                .finalize(false)
                .await
                .map(|result| FinalizeGate::Finalized { result }),
        }
    }

    async fn finalize(&self, force: bool) -> Result<FinalizeResult, ReceivingError> {
        let (supplier, session_id) = self.session().inspect_err(|e| {
            lock(&self.workspace).finalize_failed(&e.to_string());
        })?;
        match self.api.finalize(&supplier, &session_id, force).await {
            Ok(finalized) => {
                lock(&self.workspace).apply_finalized(finalized.clone());
                info!(
                    session_id = %session_id,
                    received_items = finalized.received_items_count,
                    "receiving finalized"
                );
                self.events.emit("receiving_finalized", &finalized);
                Ok(finalized)
            }
            Err(e) => {
                let err = ReceivingError::from(e);
                lock(&self.workspace).finalize_failed(&err.to_string());
                self.emit_error("finalize", &err);
                Err(err)
            }
        }
    }
}
