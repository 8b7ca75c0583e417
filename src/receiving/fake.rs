//! In-memory receiving server used by the workflow tests.
//!
//! Mirrors the server rules: first line whose EAN, supplier code or product
//! code equals the scanned code wins, statuses are recomputed on every
//! mutation and summaries are counted from the stored lines.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::clients::ReceivingApi;
use crate::error::ApiError;
use crate::receiving::model::{
    AcceptAllResult, ActiveSession, ActiveSessionInfo, ActiveSessionStats, CreateSessionResult,
    FinalizeResult, LineStatus, PauseResult, ReceivingLine, ReceivingStats, ReceivingSummary,
    ReopenResult, ResetAllResult, ResumeResult, ScanLogEntry, ScanResult, ScanStatus, SetQtyResult,
    SummarySnapshot,
};

const NOW: &str = "2026-01-10T09:30:00Z";

#[derive(Debug, Clone)]
struct FakeSession {
    invoice_no: String,
    lines: Vec<ReceivingLine>,
    scans: Vec<ScanLogEntry>,
    paused_at: Option<String>,
    finalized: bool,
}

impl FakeSession {
    fn summary(&self) -> ReceivingSummary {
        let unexpected = self.scans.iter().filter(|s| s.is_unexpected()).count() as u32;
        ReceivingSummary::from_lines(&self.lines, unexpected)
    }

    fn stats(&self) -> ReceivingStats {
        let summary = self.summary();
        ReceivingStats {
            total_lines: self.lines.len() as u32,
            received_complete: summary.matched,
            received_partial: summary.partial,
            received_overage: summary.overage,
            not_received: summary.pending,
            total_scans: self.scans.len() as u32,
            unexpected_scans: summary.unexpected,
        }
    }
}

#[derive(Debug, Default)]
struct FakeState {
    template: Vec<ReceivingLine>,
    sessions: HashMap<String, FakeSession>,
    next_session: u32,
    calls: Vec<&'static str>,
    failures: HashMap<&'static str, ApiError>,
    scans: Vec<(f64, Option<String>)>,
    last_set_qty: Option<(usize, f64, Option<String>)>,
    last_force: Option<bool>,
}

pub(crate) struct FakeReceivingApi {
    state: Mutex<FakeState>,
    latency: Duration,
    report_line_index: bool,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn not_found() -> ApiError {
    ApiError::Http {
        status: 404,
        status_text: "Not Found".into(),
        body: "{\"detail\":\"Session not found\"}".into(),
    }
}

impl FakeReceivingApi {
    pub(crate) fn with_invoice(_invoice_no: &str, ordered: &[f64]) -> Self {
        let template = ordered
            .iter()
            .enumerate()
            .map(|(i, qty)| ReceivingLine {
                ean: format!("8585{:09}", i + 1),
                scm: format!("PL-{:04}", i + 1),
                product_code: String::new(),
                title: format!("Item {}", i + 1),
                ordered_qty: *qty,
                received_qty: 0.0,
                status: LineStatus::Pending,
            })
            .collect();
        Self {
            state: Mutex::new(FakeState {
                template,
                ..Default::default()
            }),
            latency: Duration::ZERO,
            report_line_index: true,
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Behave like servers that do not report `line_index` on scans.
    pub(crate) fn without_line_index(mut self) -> Self {
        self.report_line_index = false;
        self
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub(crate) fn set_line_codes(&self, index: usize, ean: &str, scm: &str) {
        let mut state = self.state();
        let line = &mut state.template[index];
        line.ean = ean.to_string();
        line.scm = scm.to_string();
    }

    pub(crate) fn line_ean(&self, index: usize) -> String {
        self.state().template[index].ean.clone()
    }

    pub(crate) fn line_scm(&self, index: usize) -> String {
        self.state().template[index].scm.clone()
    }

    pub(crate) fn fail_next(&self, op: &'static str, err: ApiError) {
        self.state().failures.insert(op, err);
    }

    pub(crate) fn call_count(&self, op: &str) -> usize {
        self.state().calls.iter().filter(|c| **c == op).count()
    }

    pub(crate) fn max_concurrency(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub(crate) fn scanned_quantities(&self) -> Vec<f64> {
        self.state().scans.iter().map(|(qty, _)| *qty).collect()
    }

    pub(crate) fn idempotency_keys(&self) -> Vec<String> {
        self.state()
            .scans
            .iter()
            .filter_map(|(_, key)| key.clone())
            .collect()
    }

    pub(crate) fn last_set_qty(&self) -> Option<(usize, f64, Option<String>)> {
        self.state().last_set_qty.clone()
    }

    pub(crate) fn last_finalize_force(&self) -> Option<bool> {
        self.state().last_force
    }

    async fn enter(&self, op: &'static str) -> Result<InFlight<'_>, ApiError> {
        self.state().calls.push(op);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight(&self.active);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        match self.state().failures.remove(op) {
            Some(err) => Err(err),
            None => Ok(guard),
        }
    }

    fn with_session<T>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut FakeSession) -> T,
    ) -> Result<T, ApiError> {
        let mut state = self.state();
        let session = state.sessions.get_mut(session_id).ok_or_else(not_found)?;
        Ok(f(session))
    }
}

#[async_trait]
impl ReceivingApi for FakeReceivingApi {
    async fn create_session(
        &self,
        _supplier: &str,
        invoice_id: &str,
    ) -> Result<CreateSessionResult, ApiError> {
        let _guard = self.enter("create_session").await?;
        let invoice_no = invoice_id
            .split_once(':')
            .map(|(_, n)| n)
            .unwrap_or(invoice_id)
            .to_string();
        let mut state = self.state();
        state.next_session += 1;
        let session_id = format!("2026011009{:04}", state.next_session);
        let lines = state.template.clone();
        state.sessions.insert(
            session_id.clone(),
            FakeSession {
                invoice_no: invoice_no.clone(),
                lines: lines.clone(),
                scans: Vec::new(),
                paused_at: None,
                finalized: false,
            },
        );
        Ok(CreateSessionResult {
            session_id,
            invoice_no,
            lines,
        })
    }

    async fn scan_code(
        &self,
        _supplier: &str,
        session_id: &str,
        code: &str,
        qty: f64,
        idempotency_key: Option<&str>,
    ) -> Result<ScanResult, ApiError> {
        let _guard = self.enter("scan").await?;
        self.state()
            .scans
            .push((qty, idempotency_key.map(str::to_string)));
        let report_index = self.report_line_index;
        self.with_session(session_id, |session| {
            let code = code.trim();
            let hit = session.lines.iter().position(|line| {
                !code.is_empty()
                    && [&line.ean, &line.scm, &line.product_code]
                        .iter()
                        .any(|c| c.trim() == code)
            });
            let (status, line) = match hit {
                Some(index) => {
                    let line = &mut session.lines[index];
                    line.received_qty += qty;
                    line.status = LineStatus::derive(line.received_qty, line.ordered_qty);
                    let status = match line.status {
                        LineStatus::Pending => ScanStatus::Pending,
                        LineStatus::Partial => ScanStatus::Partial,
                        LineStatus::Matched => ScanStatus::Matched,
                        LineStatus::Overage => ScanStatus::Overage,
                    };
                    (status, Some(line.clone()))
                }
                None => (ScanStatus::Unknown, None),
            };
            session.scans.push(ScanLogEntry {
                ts: NOW.into(),
                code: Some(code.to_string()),
                qty: Some(qty),
                status: Some(status.as_str().to_string()),
                ..Default::default()
            });
            ScanResult {
                status,
                line,
                line_index: hit.filter(|_| report_index),
                summary: session.summary(),
            }
        })
    }

    async fn get_summary(
        &self,
        _supplier: &str,
        session_id: &str,
    ) -> Result<SummarySnapshot, ApiError> {
        let _guard = self.enter("summary").await?;
        self.with_session(session_id, |session| SummarySnapshot {
            invoice_no: session.invoice_no.clone(),
            lines: session.lines.clone(),
            summary: session.summary(),
        })
    }

    async fn set_line_quantity(
        &self,
        _supplier: &str,
        session_id: &str,
        line_index: usize,
        received_qty: f64,
        note: Option<&str>,
    ) -> Result<SetQtyResult, ApiError> {
        let _guard = self.enter("set_qty").await?;
        let result = self.with_session(session_id, |session| {
            let line = session.lines.get_mut(line_index).ok_or(ApiError::Http {
                status: 400,
                status_text: "Bad Request".into(),
                body: "{\"detail\":\"Invalid line_index\"}".into(),
            })?;
            let old_qty = line.received_qty;
            line.received_qty = received_qty;
            line.status = LineStatus::derive(received_qty, line.ordered_qty);
            let line = line.clone();
            session.scans.push(ScanLogEntry {
                ts: NOW.into(),
                kind: Some("manual_edit".into()),
                line_index: Some(line_index),
                old_qty: Some(old_qty),
                new_qty: Some(received_qty),
                note: note.map(str::to_string),
                status: Some(line.status.as_str().to_string()),
                ..Default::default()
            });
            Ok(SetQtyResult {
                line,
                summary: session.summary(),
            })
        })??;
        self.state().last_set_qty = Some((line_index, received_qty, note.map(str::to_string)));
        Ok(result)
    }

    async fn accept_all_items(
        &self,
        _supplier: &str,
        session_id: &str,
        only_pending: bool,
    ) -> Result<AcceptAllResult, ApiError> {
        let _guard = self.enter("accept_all").await?;
        self.with_session(session_id, |session| {
            let mut updated_count = 0;
            for line in session.lines.iter_mut() {
                if only_pending && line.status != LineStatus::Pending {
                    continue;
                }
                if line.received_qty < line.ordered_qty {
                    line.received_qty = line.ordered_qty;
                    line.status = LineStatus::Matched;
                    updated_count += 1;
                }
            }
            AcceptAllResult {
                updated_count,
                lines: session.lines.clone(),
                summary: session.summary(),
                message: Some(format!("Označených {updated_count} položiek ako prijaté.")),
            }
        })
    }

    async fn reset_all_items(
        &self,
        _supplier: &str,
        session_id: &str,
    ) -> Result<ResetAllResult, ApiError> {
        let _guard = self.enter("reset_all").await?;
        self.with_session(session_id, |session| {
            for line in session.lines.iter_mut() {
                line.received_qty = 0.0;
                line.status = LineStatus::Pending;
            }
            ResetAllResult {
                lines: session.lines.clone(),
                summary: session.summary(),
                message: None,
            }
        })
    }

    async fn pause(&self, _supplier: &str, session_id: &str) -> Result<PauseResult, ApiError> {
        let _guard = self.enter("pause").await?;
        self.with_session(session_id, |session| {
            session.paused_at = Some(NOW.into());
            PauseResult {
                invoice_no: session.invoice_no.clone(),
                session_id: session_id.to_string(),
                paused_at: NOW.into(),
                stats: session.stats(),
                message: None,
            }
        })
    }

    async fn resume(&self, _supplier: &str, session_id: &str) -> Result<ResumeResult, ApiError> {
        let _guard = self.enter("resume").await?;
        self.with_session(session_id, |session| {
            session.paused_at = None;
            ResumeResult {
                session_id: session_id.to_string(),
                invoice_no: session.invoice_no.clone(),
                lines: session.lines.clone(),
                scans: session.scans.clone(),
                created_at: Some(NOW.into()),
                resumed_at: Some(NOW.into()),
            }
        })
    }

    async fn finalize(
        &self,
        _supplier: &str,
        session_id: &str,
        force: bool,
    ) -> Result<FinalizeResult, ApiError> {
        let _guard = self.enter("finalize").await?;
        self.state().last_force = Some(force);
        self.with_session(session_id, |session| {
            session.finalized = true;
            let total_received: f64 = session.lines.iter().map(|l| l.received_qty).sum();
            FinalizeResult {
                invoice_no: session.invoice_no.clone(),
                session_id: session_id.to_string(),
                completed_at: Some(NOW.into()),
                stats: session.stats(),
                total_ordered: session.lines.iter().map(|l| l.ordered_qty).sum(),
                total_received,
                received_items_count: session
                    .lines
                    .iter()
                    .filter(|l| l.received_qty > 0.0)
                    .count() as u32,
                message: None,
            }
        })
    }

    async fn active_session(
        &self,
        _supplier: &str,
        invoice_no: &str,
    ) -> Result<ActiveSession, ApiError> {
        let _guard = self.enter("active_session").await?;
        let state = self.state();
        let open = state
            .sessions
            .iter()
            .find(|(_, s)| s.invoice_no == invoice_no && !s.finalized);
        Ok(match open {
            Some((id, session)) => {
                let summary = session.summary();
                ActiveSession {
                    has_session: true,
                    session: Some(ActiveSessionInfo {
                        session_id: id.clone(),
                        created_at: Some(NOW.into()),
                        is_paused: session.paused_at.is_some(),
                        paused_at: session.paused_at.clone(),
                        lines_count: session.lines.len() as u32,
                        scans_count: session.scans.len() as u32,
                        stats: ActiveSessionStats {
                            matched: summary.matched,
                            partial: summary.partial,
                            pending: summary.pending,
                        },
                    }),
                }
            }
            None => ActiveSession::default(),
        })
    }

    async fn reopen_invoice(
        &self,
        _supplier: &str,
        invoice_no: &str,
    ) -> Result<ReopenResult, ApiError> {
        let _guard = self.enter("reopen").await?;
        Ok(ReopenResult {
            success: true,
            message: Some(format!("Faktúra {invoice_no} bola znovu otvorená")),
        })
    }
}
