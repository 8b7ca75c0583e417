//! Client-side state of one receiving session.
//!
//! Pure state: every method either validates a pending action or applies a
//! server response. Lines and summary are only ever replaced from responses,
//! never patched from local arithmetic.

use serde::Serialize;
use std::time::Duration;

use crate::error::ReceivingError;
use crate::receiving::model::{
    CreateSessionResult, FinalizeResult, PauseResult, ReceivingLine, ReceivingSummary,
    ResumeResult, ScanLogEntry, ScanResult, ScanStatus,
};

/// Delay before leaving the pause confirmation screen.
pub const PAUSE_NAVIGATION_DELAY: Duration = Duration::from_secs(2);
/// Delay before leaving the finalize success screen.
pub const FINALIZE_NAVIGATION_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Active,
    Paused,
    Finalized,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanInput {
    pub code: String,
    pub qty: f64,
}

impl Default for ScanInput {
    fn default() -> Self {
        Self {
            code: String::new(),
            qty: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LastScan {
    pub code: String,
    pub qty: f64,
    pub status: ScanStatus,
    pub found: bool,
    pub line: Option<ReceivingLine>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EditModal {
    pub line_index: usize,
    pub title: String,
    pub ordered_qty: f64,
    pub qty: f64,
    pub note: String,
    pub error: Option<String>,
    pub submitting: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Confirmation {
    ResetAll { message: String },
    Finalize {
        pending: u32,
        partial: u32,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "target", rename_all = "snake_case")]
pub enum Navigation {
    InvoiceList {
        #[serde(rename = "after_ms", serialize_with = "duration_ms")]
        after: Duration,
    },
    Dashboard {
        #[serde(rename = "after_ms", serialize_with = "duration_ms")]
        after: Duration,
    },
}

fn duration_ms<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    Info,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub text: String,
}

impl Notice {
    fn info(text: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Info,
            text: text.into(),
        }
    }

    fn success(text: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Success,
            text: text.into(),
        }
    }

    fn error(text: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Error,
            text: text.into(),
        }
    }
}

/// How a scan response was folded into the local lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "line_index", rename_all = "snake_case")]
pub enum ScanApplied {
    /// The line at this position was replaced.
    Line(usize),
    /// The code matched no line; lines untouched.
    NotFound,
    /// The affected line could not be located unambiguously; the caller
    /// must re-fetch the whole session.
    NeedsRefresh,
}

/// Text of the finalize confirmation, or `None` when nothing is incomplete.
pub fn finalize_confirmation_message(summary: &ReceivingSummary) -> Option<String> {
    if summary.pending == 0 && summary.partial == 0 {
        return None;
    }
    let mut parts = Vec::new();
    if summary.pending > 0 {
        parts.push(format!("{} položiek neprijatých", summary.pending));
    }
    if summary.partial > 0 {
        parts.push(format!("{} položiek čiastočne prijatých", summary.partial));
    }
    Some(format!(
        "Príjem nie je kompletný: {}. Naozaj chcete príjem dokončiť?",
        parts.join(", ")
    ))
}

fn fmt_qty(qty: f64) -> String {
    if qty.fract() == 0.0 {
        format!("{}", qty as i64)
    } else {
        format!("{qty}")
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReceivingWorkspace {
    pub supplier: String,
    pub invoice_no: String,
    pub session_id: Option<String>,
    pub phase: Phase,
    pub lines: Vec<ReceivingLine>,
    pub summary: ReceivingSummary,
    /// Server scan log as returned by resume. Display only.
    pub scans: Vec<ScanLogEntry>,
    pub created_at: Option<String>,
    pub resumed_at: Option<String>,
    pub input: ScanInput,
    pub focus_requested: bool,
    pub last_scan: Option<LastScan>,
    pub edit: Option<EditModal>,
    pub confirmation: Option<Confirmation>,
    pub notice: Option<Notice>,
    /// Lifecycle failures (pause, finalize) shown until dismissed.
    pub blocking_error: Option<String>,
    pub navigation: Option<Navigation>,
    pub paused: Option<PauseResult>,
    pub finalized: Option<FinalizeResult>,
    pub pause_in_flight: bool,
    pub finalize_in_flight: bool,
}

impl ReceivingWorkspace {
    pub fn new(supplier: impl Into<String>) -> Self {
        Self {
            supplier: supplier.into(),
            ..Default::default()
        }
    }

    fn reset_view(&mut self) {
        self.input = ScanInput::default();
        self.last_scan = None;
        self.edit = None;
        self.confirmation = None;
        self.notice = None;
        self.blocking_error = None;
        self.navigation = None;
        self.paused = None;
        self.finalized = None;
        self.pause_in_flight = false;
        self.finalize_in_flight = false;
        self.focus_requested = true;
    }

    // -- lifecycle ----------------------------------------------------------

    pub fn apply_created(&mut self, created: CreateSessionResult) {
        self.reset_view();
        self.session_id = Some(created.session_id);
        if !created.invoice_no.is_empty() {
            self.invoice_no = created.invoice_no;
        }
        self.summary = ReceivingSummary::from_lines(&created.lines, 0);
        self.lines = created.lines;
        self.scans.clear();
        self.created_at = None;
        self.resumed_at = None;
        self.phase = Phase::Active;
    }

    /// Replace all local state from a resume response.
    pub fn apply_resumed(&mut self, resumed: ResumeResult) {
        self.reset_view();
        self.summary = resumed.summary();
        self.session_id = Some(resumed.session_id);
        if !resumed.invoice_no.is_empty() {
            self.invoice_no = resumed.invoice_no;
        }
        self.lines = resumed.lines;
        self.scans = resumed.scans;
        self.created_at = resumed.created_at;
        self.resumed_at = resumed.resumed_at;
        self.phase = Phase::Active;
    }

    /// Session id when mutations are currently allowed.
    pub fn ensure_mutable(&self) -> Result<&str, ReceivingError> {
        let id = self.session_id.as_deref().ok_or(ReceivingError::NoSession)?;
        match self.phase {
            Phase::Active => Ok(id),
            Phase::Paused => Err(ReceivingError::Paused(id.to_string())),
            Phase::Finalized => Err(ReceivingError::Finalized(id.to_string())),
            Phase::Idle => Err(ReceivingError::NoSession),
        }
    }

    // -- scan input ---------------------------------------------------------

    pub fn set_input(&mut self, code: &str) {
        self.input.code = code.to_string();
    }

    pub fn set_input_qty(&mut self, qty: f64) {
        self.input.qty = qty;
    }

    pub fn take_focus_request(&mut self) -> bool {
        std::mem::take(&mut self.focus_requested)
    }

    /// Fold a scan response into the session.
    pub fn apply_scan(&mut self, code: &str, qty: f64, result: ScanResult) -> ScanApplied {
        self.summary = result.summary;

        let applied = match &result.line {
            None => ScanApplied::NotFound,
            Some(line) => match self.locate_line(result.line_index, line) {
                Some(index) => {
                    self.lines[index] = line.clone();
                    ScanApplied::Line(index)
                }
                None => ScanApplied::NeedsRefresh,
            },
        };
        let applied = match applied {
            ScanApplied::Line(_) | ScanApplied::NotFound
                if !self.summary.is_consistent_with(&self.lines) =>
            {
                ScanApplied::NeedsRefresh
            }
            other => other,
        };

        let message = match &result.line {
            None => format!("Kód {code} nebol nájdený na faktúre"),
            Some(line) => {
                let name = if line.title.trim().is_empty() {
                    line.display_code()
                } else {
                    line.title.trim()
                };
                format!(
                    "{name}: {} / {} ({})",
                    fmt_qty(line.received_qty),
                    fmt_qty(line.ordered_qty),
                    result.status.as_str()
                )
            }
        };
        self.last_scan = Some(LastScan {
            code: code.to_string(),
            qty,
            status: result.status,
            found: result.line.is_some(),
            line: result.line,
            message,
        });

        if self.input.code.trim() == code.trim() {
            self.input.code.clear();
        }
        self.input.qty = 1.0;
        self.focus_requested = true;
        self.notice = None;
        applied
    }

    /// Index of the line a scan response refers to. A server-provided index
    /// is trusted only when it points at the same product; otherwise the
    /// identity must match exactly one line.
    fn locate_line(&self, hint: Option<usize>, line: &ReceivingLine) -> Option<usize> {
        if let Some(index) = hint {
            if self
                .lines
                .get(index)
                .is_some_and(|current| current.same_identity(line))
            {
                return Some(index);
            }
        }
        let mut matches = self
            .lines
            .iter()
            .enumerate()
            .filter(|(_, current)| current.same_identity(line))
            .map(|(i, _)| i);
        match (matches.next(), matches.next()) {
            (Some(index), None) => Some(index),
            _ => None,
        }
    }

    /// Scan failed: keep the code for a manual retry.
    pub fn scan_failed(&mut self, code: &str, error: &str) {
        if self.input.code.trim().is_empty() {
            self.input.code = code.to_string();
        }
        self.notice = Some(Notice::error(format!("Chyba pri skenovaní: {error}")));
        self.focus_requested = true;
    }

    // -- whole-session replacement -----------------------------------------

    pub fn apply_lines(&mut self, lines: Vec<ReceivingLine>, summary: ReceivingSummary) {
        self.lines = lines;
        self.summary = summary;
    }

    pub fn apply_bulk(
        &mut self,
        lines: Vec<ReceivingLine>,
        summary: ReceivingSummary,
        message: Option<String>,
    ) {
        self.apply_lines(lines, summary);
        self.notice = message.map(Notice::success);
        self.focus_requested = true;
    }

    pub fn action_failed(&mut self, action: &str, error: &str) {
        self.notice = Some(Notice::error(format!("{action}: {error}")));
    }

    // -- manual edit --------------------------------------------------------

    pub fn open_edit(&mut self, line_index: usize) -> Result<&EditModal, ReceivingError> {
        self.ensure_mutable()?;
        let line = self
            .lines
            .get(line_index)
            .ok_or(ReceivingError::InvalidLineIndex {
                index: line_index,
                len: self.lines.len(),
            })?;
        let title = if line.title.trim().is_empty() {
            line.display_code().to_string()
        } else {
            line.title.clone()
        };
        let modal = self.edit.insert(EditModal {
            line_index,
            title,
            ordered_qty: line.ordered_qty,
            qty: line.received_qty,
            note: String::new(),
            error: None,
            submitting: false,
        });
        Ok(&*modal)
    }

    pub fn edit_fill_ordered(&mut self) -> Option<f64> {
        let modal = self.edit.as_mut()?;
        modal.qty = modal.ordered_qty;
        Some(modal.qty)
    }

    pub fn close_edit(&mut self) {
        self.edit = None;
    }

    /// Replace the line at the edited position (never by code lookup).
    pub fn apply_set_qty(
        &mut self,
        line_index: usize,
        line: ReceivingLine,
        summary: ReceivingSummary,
    ) -> Result<(), ReceivingError> {
        let len = self.lines.len();
        let slot = self
            .lines
            .get_mut(line_index)
            .ok_or(ReceivingError::InvalidLineIndex {
                index: line_index,
                len,
            })?;
        *slot = line;
        self.summary = summary;
        if self
            .edit
            .as_ref()
            .is_some_and(|modal| modal.line_index == line_index)
        {
            self.edit = None;
        }
        self.focus_requested = true;
        Ok(())
    }

    pub fn edit_failed(&mut self, line_index: usize, error: &str) {
        match self.edit.as_mut() {
            Some(modal) if modal.line_index == line_index => {
                modal.error = Some(error.to_string());
                modal.submitting = false;
            }
            _ => self.action_failed("Úprava množstva zlyhala", error),
        }
    }

    // -- confirmations ------------------------------------------------------

    pub fn request_reset_all(&mut self) -> Result<&Confirmation, ReceivingError> {
        self.ensure_mutable()?;
        let confirmation = self.confirmation.insert(Confirmation::ResetAll {
            message: "Naozaj vynulovať všetky prijaté množstvá? Stratíte celý postup skenovania."
                .to_string(),
        });
        Ok(&*confirmation)
    }

    /// Gate in front of finalize, evaluated after [`begin_finalize`] once
    /// every earlier mutation has been applied. `Some` means the operator
    /// must confirm first: no request may be sent and the in-flight flag is
    /// released. `None` keeps the flag for the finalize request itself.
    ///
    /// [`begin_finalize`]: Self::begin_finalize
    pub fn settle_finalize_gate(&mut self) -> Result<Option<Confirmation>, ReceivingError> {
        if let Err(e) = self.ensure_mutable() {
            self.finalize_in_flight = false;
            return Err(e);
        }
        let Some(message) = finalize_confirmation_message(&self.summary) else {
            return Ok(None);
        };
        self.finalize_in_flight = false;
        let confirmation = Confirmation::Finalize {
            pending: self.summary.pending,
            partial: self.summary.partial,
            message,
        };
        self.confirmation = Some(confirmation.clone());
        Ok(Some(confirmation))
    }

    pub fn cancel_confirmation(&mut self) -> Option<Confirmation> {
        self.confirmation.take()
    }

    pub fn take_reset_confirmation(&mut self) -> Result<(), ReceivingError> {
        match self.confirmation {
            Some(Confirmation::ResetAll { .. }) => {
                self.confirmation = None;
                Ok(())
            }
            _ => Err(ReceivingError::NothingToConfirm),
        }
    }

    pub fn has_finalize_confirmation(&self) -> bool {
        matches!(self.confirmation, Some(Confirmation::Finalize { .. }))
    }

    // -- pause --------------------------------------------------------------

    pub fn begin_pause(&mut self) -> Result<(), ReceivingError> {
        self.ensure_mutable()?;
        if self.pause_in_flight {
            return Err(ReceivingError::Busy("Pause"));
        }
        self.pause_in_flight = true;
        self.blocking_error = None;
        Ok(())
    }

    pub fn apply_paused(&mut self, paused: PauseResult) {
        self.pause_in_flight = false;
        self.phase = Phase::Paused;
        self.edit = None;
        self.confirmation = None;
        let text = paused
            .message
            .clone()
            .unwrap_or_else(|| "Príjem bol pozastavený. Môžete pokračovať neskôr.".to_string());
        self.notice = Some(Notice::success(text));
        self.paused = Some(paused);
        self.navigation = Some(Navigation::InvoiceList {
            after: PAUSE_NAVIGATION_DELAY,
        });
    }

    pub fn pause_failed(&mut self, error: &str) {
        self.pause_in_flight = false;
        self.blocking_error = Some(format!("Pozastavenie zlyhalo: {error}"));
    }

    // -- finalize -----------------------------------------------------------

    pub fn begin_finalize(&mut self) -> Result<(), ReceivingError> {
        self.ensure_mutable()?;
        if self.finalize_in_flight {
            return Err(ReceivingError::Busy("Finalize"));
        }
        self.finalize_in_flight = true;
        self.blocking_error = None;
        Ok(())
    }

    pub fn apply_finalized(&mut self, finalized: FinalizeResult) {
        self.finalize_in_flight = false;
        self.phase = Phase::Finalized;
        self.edit = None;
        self.confirmation = None;
        let text = finalized.message.clone().unwrap_or_else(|| {
            format!(
                "Príjem dokončený: {} položiek, spolu {} ks",
                finalized.received_items_count,
                fmt_qty(finalized.total_received)
            )
        });
        self.notice = Some(Notice::success(text));
        self.finalized = Some(finalized);
        self.navigation = Some(Navigation::Dashboard {
            after: FINALIZE_NAVIGATION_DELAY,
        });
    }

    /// Finalize failed: the confirmation closes and the session stays active.
    pub fn finalize_failed(&mut self, error: &str) {
        self.finalize_in_flight = false;
        self.confirmation = None;
        self.blocking_error = Some(format!("Dokončenie príjmu zlyhalo: {error}"));
    }

    pub fn dismiss_blocking_error(&mut self) {
        self.blocking_error = None;
    }

    pub fn set_info(&mut self, text: impl Into<String>) {
        self.notice = Some(Notice::info(text));
    }
}
