//! Receiving session controller.
//!
//! Owns the shared workspace and the session queue. Purely local actions
//! (input, edit modal, confirmations) touch the workspace directly; every
//! server mutation is routed through the queue.

use std::sync::{Arc, Mutex};
use tracing::info;

use crate::clients::invoices::{InvoiceIndexEntry, InvoiceStatus};
use crate::clients::ReceivingApi;
use crate::error::ReceivingError;
use crate::events::EventBus;
use crate::receiving::model::{FinalizeResult, PauseResult};
pub use crate::receiving::queue::FinalizeGate;
use crate::receiving::queue::{lock, PendingScan, QueueStatus, ScanOutcome, SessionQueue, SharedWorkspace};
use crate::receiving::workspace::{Confirmation, EditModal, ReceivingWorkspace};

pub struct ReceivingController {
    api: Arc<dyn ReceivingApi>,
    workspace: SharedWorkspace,
    events: EventBus,
    queue: SessionQueue,
}

impl std::fmt::Debug for ReceivingController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ws = lock(&self.workspace);
        f.debug_struct("ReceivingController")
            .field("supplier", &ws.supplier)
            .field("session_id", &ws.session_id)
            .field("phase", &ws.phase)
            .finish()
    }
}

impl ReceivingController {
    fn attach(api: Arc<dyn ReceivingApi>, events: EventBus, workspace: ReceivingWorkspace) -> Self {
        let workspace = Arc::new(Mutex::new(workspace));
        let queue = SessionQueue::spawn(api.clone(), workspace.clone(), events.clone());
        Self {
            api,
            workspace,
            events,
            queue,
        }
    }

    /// Create a new session for `invoice_id` (`supplier:number` or bare number).
    pub async fn start(
        api: Arc<dyn ReceivingApi>,
        events: EventBus,
        supplier: &str,
        invoice_id: &str,
    ) -> Result<Self, ReceivingError> {
        let created = api.create_session(supplier, invoice_id).await?;
        info!(
            supplier,
            invoice_id,
            session_id = %created.session_id,
            lines = created.lines.len(),
            "receiving session created"
        );
        let mut workspace = ReceivingWorkspace::new(supplier);
        workspace.invoice_no = invoice_id
            .split_once(':')
            .map(|(_, n)| n)
            .unwrap_or(invoice_id)
            .to_string();
        workspace.apply_created(created);
        events.emit("receiving_started", snapshot_payload(&workspace));
        Ok(Self::attach(api, events, workspace))
    }

    pub async fn resume(
        api: Arc<dyn ReceivingApi>,
        events: EventBus,
        supplier: &str,
        session_id: &str,
    ) -> Result<Self, ReceivingError> {
        let resumed = api.resume(supplier, session_id).await?;
        info!(
            supplier,
            session_id,
            lines = resumed.lines.len(),
            scans = resumed.scans.len(),
            "receiving session resumed"
        );
        let mut workspace = ReceivingWorkspace::new(supplier);
        workspace.apply_resumed(resumed);
        events.emit("receiving_resumed", snapshot_payload(&workspace));
        Ok(Self::attach(api, events, workspace))
    }

    /// Open the receiving screen for an invoice index entry: resume the
    /// in-progress session, reuse a session the server still has open, or
    /// create a new one. Processed invoices must be reopened first.
    pub async fn open_invoice(
        api: Arc<dyn ReceivingApi>,
        events: EventBus,
        entry: &InvoiceIndexEntry,
    ) -> Result<Self, ReceivingError> {
        let supplier = entry.supplier.trim();
        let invoice_no = entry.invoice_no();
        match (&entry.status, entry.current_session_id.as_deref()) {
            (InvoiceStatus::Processed, _) => {
                Err(ReceivingError::InvoiceProcessed(invoice_no.to_string()))
            }
            (InvoiceStatus::InProgress, Some(session_id)) if !session_id.trim().is_empty() => {
                Self::resume(api, events, supplier, session_id.trim()).await
            }
            _ => {
                let active = api.active_session(supplier, invoice_no).await?;
                match active.session.filter(|_| active.has_session) {
                    Some(session) => Self::resume(api, events, supplier, &session.session_id).await,
                    None => {
                        let invoice_id = if entry.invoice_id.trim().is_empty() {
                            format!("{supplier}:{invoice_no}")
                        } else {
                            entry.invoice_id.trim().to_string()
                        };
                        Self::start(api, events, supplier, &invoice_id).await
                    }
                }
            }
        }
    }

    /// Re-read the session from the server and replace all local state.
    pub async fn reload(&self) -> Result<(), ReceivingError> {
        let (supplier, session_id) = {
            let ws = lock(&self.workspace);
            let id = ws.session_id.clone().ok_or(ReceivingError::NoSession)?;
            (ws.supplier.clone(), id)
        };
        let resumed = self.api.resume(&supplier, &session_id).await?;
        let payload = {
            let mut ws = lock(&self.workspace);
            ws.apply_resumed(resumed);
            snapshot_payload(&ws)
        };
        self.events.emit("receiving_resumed", payload);
        Ok(())
    }

    pub fn snapshot(&self) -> ReceivingWorkspace {
        lock(&self.workspace).clone()
    }

    pub fn session_id(&self) -> Option<String> {
        lock(&self.workspace).session_id.clone()
    }

    pub fn queue_status(&self) -> QueueStatus {
        self.queue.status()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    // -- scanning -----------------------------------------------------------

    pub fn set_input(&self, code: &str) {
        lock(&self.workspace).set_input(code);
    }

    pub fn set_input_qty(&self, qty: f64) {
        lock(&self.workspace).set_input_qty(qty);
    }

    /// Queue a scan. Blank codes are ignored without a request.
    pub async fn enqueue_scan(
        &self,
        code: &str,
        qty: f64,
    ) -> Result<Option<PendingScan>, ReceivingError> {
        let code = code.trim();
        if code.is_empty() {
            return Ok(None);
        }
        lock(&self.workspace).ensure_mutable()?;
        self.queue.enqueue_scan(code, qty).await.map(Some)
    }

    pub async fn scan(&self, code: &str, qty: f64) -> Result<Option<ScanOutcome>, ReceivingError> {
        match self.enqueue_scan(code, qty).await? {
            Some(pending) => pending.outcome().await.map(Some),
            None => Ok(None),
        }
    }

    /// Submit whatever is in the scan input.
    pub async fn submit_input(&self) -> Result<Option<ScanOutcome>, ReceivingError> {
        let input = lock(&self.workspace).input.clone();
        self.scan(&input.code, input.qty).await
    }

    // -- manual edit --------------------------------------------------------

    pub fn open_edit(&self, line_index: usize) -> Result<EditModal, ReceivingError> {
        lock(&self.workspace).open_edit(line_index).cloned()
    }

    pub fn edit_fill_ordered(&self) -> Option<f64> {
        lock(&self.workspace).edit_fill_ordered()
    }

    pub fn set_edit(&self, qty: f64, note: &str) {
        if let Some(modal) = lock(&self.workspace).edit.as_mut() {
            modal.qty = qty;
            modal.note = note.to_string();
            modal.error = None;
        }
    }

    pub fn close_edit(&self) {
        lock(&self.workspace).close_edit();
    }

    /// Send the open edit modal. The modal closes only on success.
    pub async fn submit_edit(&self) -> Result<(), ReceivingError> {
        let (line_index, qty, note) = {
            let mut ws = lock(&self.workspace);
            let modal = ws.edit.as_mut().ok_or(ReceivingError::NothingToConfirm)?;
            modal.submitting = true;
            modal.error = None;
            (modal.line_index, modal.qty, modal.note.clone())
        };
        self.set_line_quantity(line_index, qty, Some(&note)).await
    }

    /// Absolute quantity for the line at `line_index` as currently displayed.
    pub async fn set_line_quantity(
        &self,
        line_index: usize,
        received_qty: f64,
        note: Option<&str>,
    ) -> Result<(), ReceivingError> {
        {
            let ws = lock(&self.workspace);
            ws.ensure_mutable()?;
            if line_index >= ws.lines.len() {
                return Err(ReceivingError::InvalidLineIndex {
                    index: line_index,
                    len: ws.lines.len(),
                });
            }
        }
        let note = note
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string);
        self.queue.set_qty(line_index, received_qty, note).await
    }

    // -- bulk actions -------------------------------------------------------

    pub async fn accept_all(&self, only_pending: bool) -> Result<u32, ReceivingError> {
        lock(&self.workspace).ensure_mutable()?;
        self.queue.accept_all(only_pending).await
    }

    pub fn request_reset_all(&self) -> Result<Confirmation, ReceivingError> {
        lock(&self.workspace).request_reset_all().cloned()
    }

    pub async fn confirm_reset_all(&self) -> Result<(), ReceivingError> {
        lock(&self.workspace).take_reset_confirmation()?;
        self.queue.reset_all().await
    }

    pub fn cancel_confirmation(&self) -> Option<Confirmation> {
        lock(&self.workspace).cancel_confirmation()
    }

    pub async fn refresh(&self) -> Result<(), ReceivingError> {
        self.queue.refresh().await
    }

    // -- lifecycle ----------------------------------------------------------

    pub async fn pause(&self) -> Result<PauseResult, ReceivingError> {
        lock(&self.workspace).begin_pause()?;
        let result = self.queue.pause().await;
        if let Err(e @ ReceivingError::QueueClosed) = &result {
            // The worker never answered, so nothing released the flag.
            lock(&self.workspace).pause_failed(&e.to_string());
        }
        result
    }

    /// Finalize right away when nothing is incomplete, otherwise return the
    /// confirmation the operator has to accept. The decision is taken after
    /// every scan queued before this call has been applied.
    pub async fn request_finalize(&self) -> Result<FinalizeGate, ReceivingError> {
        lock(&self.workspace).begin_finalize()?;
        let gate = self.queue.finalize_gate().await;
        self.release_finalize_on_close(&gate);
        gate
    }

    /// Proceed after the operator accepted the finalize confirmation.
    pub async fn confirm_finalize(&self) -> Result<FinalizeResult, ReceivingError> {
        if !lock(&self.workspace).has_finalize_confirmation() {
            return Err(ReceivingError::NothingToConfirm);
        }
        self.finalize(false).await
    }

    /// `force` is forwarded to the server untouched.
    pub async fn finalize(&self, force: bool) -> Result<FinalizeResult, ReceivingError> {
        lock(&self.workspace).begin_finalize()?;
        let result = self.queue.finalize(force).await;
        self.release_finalize_on_close(&result);
        result
    }

    fn release_finalize_on_close<T>(&self, result: &Result<T, ReceivingError>) {
        if let Err(e @ ReceivingError::QueueClosed) = result {
            lock(&self.workspace).finalize_failed(&e.to_string());
        }
    }

    pub fn dismiss_error(&self) {
        lock(&self.workspace).dismiss_blocking_error();
    }

    pub async fn shutdown(self) {
        self.queue.shutdown().await;
    }
}

fn snapshot_payload(ws: &ReceivingWorkspace) -> serde_json::Value {
    serde_json::json!({
        "supplier": ws.supplier,
        "invoice_no": ws.invoice_no,
        "session_id": ws.session_id,
        "lines": ws.lines.len(),
        "summary": ws.summary,
    })
}
