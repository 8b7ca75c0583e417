//! Wire types of the receiving endpoints.
//!
//! The server is the source of truth for every status field. The only
//! client-side derivation is [`LineStatus::derive`], used for optimistic
//! hints, and [`ReceivingSummary::from_lines`], which counts server-assigned
//! statuses when an endpoint (resume) returns lines without a summary.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Lenient field decoding
// ---------------------------------------------------------------------------

/// Strings that may arrive as `null` or as a number (EAN columns read from CSV).
pub(crate) fn string_lenient<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    })
}

/// Quantities that may arrive as `null`, a number or a numeric string.
pub(crate) fn f64_lenient<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().replace(',', ".").parse().unwrap_or(0.0),
        _ => 0.0,
    })
}

// ---------------------------------------------------------------------------
// Statuses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineStatus {
    #[default]
    Pending,
    Partial,
    Matched,
    Overage,
}

impl LineStatus {
    /// Status implied by the quantities. Display hint only; the status
    /// carried by the server response always wins.
    pub fn derive(received_qty: f64, ordered_qty: f64) -> Self {
        if received_qty <= 0.0 {
            LineStatus::Pending
        } else if received_qty < ordered_qty {
            LineStatus::Partial
        } else if received_qty == ordered_qty {
            LineStatus::Matched
        } else {
            LineStatus::Overage
        }
    }

    pub fn is_complete(self) -> bool {
        matches!(self, LineStatus::Matched | LineStatus::Overage)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LineStatus::Pending => "pending",
            LineStatus::Partial => "partial",
            LineStatus::Matched => "matched",
            LineStatus::Overage => "overage",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Matched,
    Partial,
    Pending,
    Overage,
    /// Resolves to a line that no longer expects quantity, or (on older
    /// servers) to no line at all.
    Unexpected,
    /// The code matches no line of the invoice.
    #[serde(other)]
    Unknown,
}

impl ScanStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ScanStatus::Matched => "matched",
            ScanStatus::Partial => "partial",
            ScanStatus::Pending => "pending",
            ScanStatus::Overage => "overage",
            ScanStatus::Unexpected => "unexpected",
            ScanStatus::Unknown => "unknown",
        }
    }
}

// ---------------------------------------------------------------------------
// Lines and summary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReceivingLine {
    #[serde(default, deserialize_with = "string_lenient")]
    pub ean: String,
    #[serde(default, deserialize_with = "string_lenient")]
    pub scm: String,
    #[serde(default, deserialize_with = "string_lenient")]
    pub product_code: String,
    #[serde(default, deserialize_with = "string_lenient")]
    pub title: String,
    #[serde(default, deserialize_with = "f64_lenient")]
    pub ordered_qty: f64,
    #[serde(default, deserialize_with = "f64_lenient")]
    pub received_qty: f64,
    #[serde(default)]
    pub status: LineStatus,
}

impl ReceivingLine {
    /// Identity used to find the line a scan response refers to.
    pub fn same_identity(&self, other: &ReceivingLine) -> bool {
        self.ean.trim() == other.ean.trim()
            && self.scm.trim() == other.scm.trim()
            && self.product_code.trim() == other.product_code.trim()
    }

    /// Best human-readable code for the line (EAN, supplier code, product code).
    pub fn display_code(&self) -> &str {
        [&self.ean, &self.scm, &self.product_code]
            .into_iter()
            .map(|s| s.trim())
            .find(|s| !s.is_empty())
            .unwrap_or("")
    }

    pub fn remaining_qty(&self) -> f64 {
        (self.ordered_qty - self.received_qty).max(0.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceivingSummary {
    pub matched: u32,
    pub partial: u32,
    pub pending: u32,
    pub overage: u32,
    /// Count of unexpected scan events, not of lines.
    pub unexpected: u32,
}

impl ReceivingSummary {
    pub fn from_lines(lines: &[ReceivingLine], unexpected: u32) -> Self {
        let mut summary = ReceivingSummary {
            unexpected,
            ..Default::default()
        };
        for line in lines {
            match line.status {
                LineStatus::Matched => summary.matched += 1,
                LineStatus::Partial => summary.partial += 1,
                LineStatus::Pending => summary.pending += 1,
                LineStatus::Overage => summary.overage += 1,
            }
        }
        summary
    }

    pub fn line_total(&self) -> u32 {
        self.matched + self.partial + self.pending + self.overage
    }

    pub fn is_consistent_with(&self, lines: &[ReceivingLine]) -> bool {
        self.line_total() as usize == lines.len()
    }

    pub fn incomplete(&self) -> u32 {
        self.pending + self.partial
    }
}

// ---------------------------------------------------------------------------
// Endpoint responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionResult {
    pub session_id: String,
    #[serde(default)]
    pub invoice_no: String,
    #[serde(default)]
    pub lines: Vec<ReceivingLine>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub status: ScanStatus,
    #[serde(default)]
    pub line: Option<ReceivingLine>,
    /// Positional index of the affected line, when the server provides it.
    #[serde(default)]
    pub line_index: Option<usize>,
    #[serde(default)]
    pub summary: ReceivingSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarySnapshot {
    #[serde(default)]
    pub invoice_no: String,
    #[serde(default)]
    pub lines: Vec<ReceivingLine>,
    #[serde(default)]
    pub summary: ReceivingSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetQtyResult {
    pub line: ReceivingLine,
    #[serde(default)]
    pub summary: ReceivingSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptAllResult {
    #[serde(default)]
    pub updated_count: u32,
    #[serde(default)]
    pub lines: Vec<ReceivingLine>,
    #[serde(default)]
    pub summary: ReceivingSummary,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetAllResult {
    #[serde(default)]
    pub lines: Vec<ReceivingLine>,
    #[serde(default)]
    pub summary: ReceivingSummary,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceivingStats {
    pub total_lines: u32,
    pub received_complete: u32,
    pub received_partial: u32,
    pub received_overage: u32,
    pub not_received: u32,
    pub total_scans: u32,
    pub unexpected_scans: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PauseResult {
    #[serde(default)]
    pub invoice_no: String,
    #[serde(default)]
    pub session_id: String,
    pub paused_at: String,
    #[serde(default)]
    pub stats: ReceivingStats,
    #[serde(default)]
    pub message: Option<String>,
}

/// One record of the server-side scan log (scan, manual edit or bulk action).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanLogEntry {
    #[serde(default)]
    pub ts: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub qty: Option<f64>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub line_index: Option<usize>,
    #[serde(default)]
    pub old_qty: Option<f64>,
    #[serde(default)]
    pub new_qty: Option<f64>,
    #[serde(default)]
    pub note: Option<String>,
}

impl ScanLogEntry {
    pub fn is_unexpected(&self) -> bool {
        matches!(self.status.as_deref(), Some("unexpected") | Some("unknown"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeResult {
    pub session_id: String,
    #[serde(default)]
    pub invoice_no: String,
    #[serde(default)]
    pub lines: Vec<ReceivingLine>,
    #[serde(default)]
    pub scans: Vec<ScanLogEntry>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub resumed_at: Option<String>,
}

impl ResumeResult {
    pub fn summary(&self) -> ReceivingSummary {
        let unexpected = self.scans.iter().filter(|s| s.is_unexpected()).count() as u32;
        ReceivingSummary::from_lines(&self.lines, unexpected)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizeResult {
    #[serde(default)]
    pub invoice_no: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub completed_at: Option<String>,
    #[serde(default)]
    pub stats: ReceivingStats,
    #[serde(default)]
    pub total_ordered: f64,
    #[serde(default)]
    pub total_received: f64,
    #[serde(default)]
    pub received_items_count: u32,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ActiveSessionStats {
    pub matched: u32,
    pub partial: u32,
    pub pending: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveSessionInfo {
    pub session_id: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub is_paused: bool,
    #[serde(default)]
    pub paused_at: Option<String>,
    #[serde(default)]
    pub lines_count: u32,
    #[serde(default)]
    pub scans_count: u32,
    #[serde(default)]
    pub stats: ActiveSessionStats,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActiveSession {
    #[serde(default)]
    pub has_session: bool,
    #[serde(default)]
    pub session: Option<ActiveSessionInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReopenResult {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReceivingHistory {
    #[serde(default)]
    pub invoice_no: String,
    #[serde(default)]
    pub sessions: Vec<Value>,
    #[serde(default)]
    pub completed: Vec<Value>,
}
