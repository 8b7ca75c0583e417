//! Receiving session endpoints.

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};

use crate::api::{segment, ApiGateway};
use crate::error::ApiError;
use crate::receiving::model::{
    AcceptAllResult, ActiveSession, CreateSessionResult, FinalizeResult, PauseResult,
    ReceivingHistory, ReopenResult, ResetAllResult, ResumeResult, ScanResult, SetQtyResult,
    SummarySnapshot,
};

pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Server contract of a receiving session. The workflow only talks to this
/// trait, so it runs unchanged against HTTP or an in-memory double.
#[async_trait]
pub trait ReceivingApi: Send + Sync {
    async fn create_session(
        &self,
        supplier: &str,
        invoice_id: &str,
    ) -> Result<CreateSessionResult, ApiError>;

    /// Submit one scan. `idempotency_key` lets the server drop a replay of
    /// the same physical scan.
    async fn scan_code(
        &self,
        supplier: &str,
        session_id: &str,
        code: &str,
        qty: f64,
        idempotency_key: Option<&str>,
    ) -> Result<ScanResult, ApiError>;

    async fn get_summary(&self, supplier: &str, session_id: &str)
        -> Result<SummarySnapshot, ApiError>;

    async fn set_line_quantity(
        &self,
        supplier: &str,
        session_id: &str,
        line_index: usize,
        received_qty: f64,
        note: Option<&str>,
    ) -> Result<SetQtyResult, ApiError>;

    async fn accept_all_items(
        &self,
        supplier: &str,
        session_id: &str,
        only_pending: bool,
    ) -> Result<AcceptAllResult, ApiError>;

    async fn reset_all_items(
        &self,
        supplier: &str,
        session_id: &str,
    ) -> Result<ResetAllResult, ApiError>;

    async fn pause(&self, supplier: &str, session_id: &str) -> Result<PauseResult, ApiError>;

    async fn resume(&self, supplier: &str, session_id: &str) -> Result<ResumeResult, ApiError>;

    async fn finalize(
        &self,
        supplier: &str,
        session_id: &str,
        force: bool,
    ) -> Result<FinalizeResult, ApiError>;

    async fn active_session(
        &self,
        supplier: &str,
        invoice_no: &str,
    ) -> Result<ActiveSession, ApiError>;

    async fn reopen_invoice(
        &self,
        supplier: &str,
        invoice_no: &str,
    ) -> Result<ReopenResult, ApiError>;
}

fn session_path(supplier: &str, session_id: &str, action: &str) -> String {
    format!(
        "/suppliers/{}/receiving/sessions/{}/{action}",
        segment(supplier),
        segment(session_id)
    )
}

fn invoice_path(supplier: &str, invoice_no: &str, action: &str) -> String {
    format!(
        "/suppliers/{}/invoices/{}/{action}",
        segment(supplier),
        segment(invoice_no)
    )
}

/// Set-qty body; `note` is left out entirely when blank.
pub(crate) fn set_qty_body(line_index: usize, received_qty: f64, note: Option<&str>) -> Value {
    let mut body = json!({ "line_index": line_index, "received_qty": received_qty });
    if let Some(note) = note.map(str::trim).filter(|n| !n.is_empty()) {
        body["note"] = Value::String(note.to_string());
    }
    body
}

#[derive(Debug, Clone)]
pub struct ReceivingClient {
    api: ApiGateway,
}

impl ReceivingClient {
    pub fn new(api: ApiGateway) -> Self {
        Self { api }
    }

    /// Past sessions and completed receipts of one invoice.
    pub async fn history(
        &self,
        supplier: &str,
        invoice_no: &str,
    ) -> Result<ReceivingHistory, ApiError> {
        let path = format!(
            "/suppliers/{}/receiving/{}/history",
            segment(supplier),
            segment(invoice_no)
        );
        self.api.get_json(&path).await
    }
}

#[async_trait]
impl ReceivingApi for ReceivingClient {
    async fn create_session(
        &self,
        supplier: &str,
        invoice_id: &str,
    ) -> Result<CreateSessionResult, ApiError> {
        let path = format!("/suppliers/{}/receiving/sessions", segment(supplier));
        let body = json!({ "invoice_id": invoice_id });
        self.api.post_json(&path, Some(&body)).await
    }

    async fn scan_code(
        &self,
        supplier: &str,
        session_id: &str,
        code: &str,
        qty: f64,
        idempotency_key: Option<&str>,
    ) -> Result<ScanResult, ApiError> {
        let path = session_path(supplier, session_id, "scan");
        let body = json!({ "code": code, "qty": qty });
        let headers: Vec<(&str, String)> = idempotency_key
            .map(|key| vec![(IDEMPOTENCY_HEADER, key.to_string())])
            .unwrap_or_default();
        self.api
            .send_json(Method::POST, &path, Some(&body), &headers)
            .await
    }

    async fn get_summary(
        &self,
        supplier: &str,
        session_id: &str,
    ) -> Result<SummarySnapshot, ApiError> {
        self.api
            .get_json(&session_path(supplier, session_id, "summary"))
            .await
    }

    async fn set_line_quantity(
        &self,
        supplier: &str,
        session_id: &str,
        line_index: usize,
        received_qty: f64,
        note: Option<&str>,
    ) -> Result<SetQtyResult, ApiError> {
        let body = set_qty_body(line_index, received_qty, note);
        self.api
            .post_json(&session_path(supplier, session_id, "set-qty"), Some(&body))
            .await
    }

    async fn accept_all_items(
        &self,
        supplier: &str,
        session_id: &str,
        only_pending: bool,
    ) -> Result<AcceptAllResult, ApiError> {
        let body = json!({ "only_pending": only_pending });
        self.api
            .post_json(&session_path(supplier, session_id, "accept-all"), Some(&body))
            .await
    }

    async fn reset_all_items(
        &self,
        supplier: &str,
        session_id: &str,
    ) -> Result<ResetAllResult, ApiError> {
        self.api
            .post_empty(&session_path(supplier, session_id, "reset-all"))
            .await
    }

    async fn pause(&self, supplier: &str, session_id: &str) -> Result<PauseResult, ApiError> {
        self.api
            .post_empty(&session_path(supplier, session_id, "pause"))
            .await
    }

    async fn resume(&self, supplier: &str, session_id: &str) -> Result<ResumeResult, ApiError> {
        self.api
            .post_empty(&session_path(supplier, session_id, "resume"))
            .await
    }

    async fn finalize(
        &self,
        supplier: &str,
        session_id: &str,
        force: bool,
    ) -> Result<FinalizeResult, ApiError> {
        let body = json!({ "force": force });
        self.api
            .post_json(&session_path(supplier, session_id, "finalize"), Some(&body))
            .await
    }

    async fn active_session(
        &self,
        supplier: &str,
        invoice_no: &str,
    ) -> Result<ActiveSession, ApiError> {
        self.api
            .get_json(&invoice_path(supplier, invoice_no, "active-session"))
            .await
    }

    async fn reopen_invoice(
        &self,
        supplier: &str,
        invoice_no: &str,
    ) -> Result<ReopenResult, ApiError> {
        self.api
            .post_empty(&invoice_path(supplier, invoice_no, "reopen"))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_paths_are_encoded() {
        assert_eq!(
            session_path("paul-lange", "20260110093000", "set-qty"),
            "/suppliers/paul-lange/receiving/sessions/20260110093000/set-qty"
        );
        assert_eq!(
            invoice_path("paul-lange", "F 2026/1", "reopen"),
            "/suppliers/paul-lange/invoices/F%202026%2F1/reopen"
        );
    }

    #[test]
    fn set_qty_body_omits_blank_note() {
        let body = set_qty_body(2, 4.5, Some("   "));
        assert_eq!(body, json!({ "line_index": 2, "received_qty": 4.5 }));

        let body = set_qty_body(0, 1.0, Some(" damaged "));
        assert_eq!(body["note"], "damaged");

        assert!(set_qty_body(0, 1.0, None).get("note").is_none());
    }
}
