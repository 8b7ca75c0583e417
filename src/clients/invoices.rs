//! Invoice index, import pipeline and CSV preview endpoints.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Value};

use crate::api::{build_query, segment, ApiGateway};
use crate::error::ApiError;
use crate::receiving::model::string_lenient;

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum InvoiceStatus {
    #[default]
    New,
    InProgress,
    Processed,
    Other(String),
}

impl From<String> for InvoiceStatus {
    fn from(raw: String) -> Self {
        match raw.trim() {
            "" | "new" => InvoiceStatus::New,
            "in_progress" => InvoiceStatus::InProgress,
            "processed" => InvoiceStatus::Processed,
            _ => InvoiceStatus::Other(raw),
        }
    }
}

impl Serialize for InvoiceStatus {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for InvoiceStatus {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        Ok(Option::<String>::deserialize(d)?
            .map(InvoiceStatus::from)
            .unwrap_or_default())
    }
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &str {
        match self {
            InvoiceStatus::New => "new",
            InvoiceStatus::InProgress => "in_progress",
            InvoiceStatus::Processed => "processed",
            InvoiceStatus::Other(raw) => raw,
        }
    }
}

/// One row of `/suppliers/{s}/invoices/index`. Fields the console does not
/// interpret (stats, outputs, ...) are kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvoiceIndexEntry {
    #[serde(default, deserialize_with = "string_lenient")]
    pub supplier: String,
    #[serde(default, deserialize_with = "string_lenient")]
    pub invoice_id: String,
    #[serde(default, deserialize_with = "string_lenient")]
    pub number: String,
    #[serde(default)]
    pub status: InvoiceStatus,
    #[serde(default)]
    pub csv_path: Option<String>,
    #[serde(default)]
    pub rel_path: Option<String>,
    #[serde(default)]
    pub current_session_id: Option<String>,
    #[serde(default)]
    pub paused_at: Option<String>,
    #[serde(default)]
    pub history_count: u32,
    #[serde(default)]
    pub last_processed_at: Option<String>,
    #[serde(default)]
    pub processed_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl InvoiceIndexEntry {
    /// Path of the invoice CSV relative to the supplier root.
    pub fn relpath(&self) -> Option<&str> {
        self.rel_path
            .as_deref()
            .or(self.csv_path.as_deref())
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }

    /// Invoice number, falling back to the part after `supplier:` in the id.
    pub fn invoice_no(&self) -> &str {
        let number = self.number.trim();
        if !number.is_empty() {
            return number;
        }
        self.invoice_id
            .rsplit_once(':')
            .map(|(_, n)| n)
            .unwrap_or(&self.invoice_id)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvoiceIndex {
    #[serde(default)]
    pub supplier: String,
    #[serde(default)]
    pub count: u32,
    #[serde(default)]
    pub invoices: Vec<InvoiceIndexEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefreshResult {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub downloaded: u32,
    #[serde(default)]
    pub skipped: u32,
    #[serde(default)]
    pub failed: u32,
    #[serde(default)]
    pub pages: u32,
    #[serde(default)]
    pub errors: Vec<Value>,
    #[serde(default)]
    pub log_files: Vec<Value>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrepareStats {
    #[serde(default)]
    pub existing: u32,
    #[serde(default)]
    pub new: u32,
    #[serde(default)]
    pub unmatched: u32,
    #[serde(default)]
    pub invoice_items: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrepareResult {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub stats: PrepareStats,
    #[serde(default)]
    pub outputs: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CsvPreview {
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Vec<Value>>,
    #[serde(default)]
    pub total_columns: u32,
    #[serde(default)]
    pub preview_rows: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvoiceHistory {
    #[serde(default)]
    pub invoice: String,
    #[serde(default)]
    pub items: Vec<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CsvOutputs {
    #[serde(default)]
    pub files: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone)]
pub struct InvoicesClient {
    api: ApiGateway,
}

impl InvoicesClient {
    pub fn new(api: ApiGateway) -> Self {
        Self { api }
    }

    pub async fn index(&self, supplier: &str) -> Result<InvoiceIndex, ApiError> {
        let path = format!("/suppliers/{}/invoices/index", segment(supplier));
        self.api.get_json(&path).await
    }

    /// Download new invoices with the supplier's configured strategy.
    pub async fn refresh(
        &self,
        supplier: &str,
        months_back: Option<u32>,
    ) -> Result<RefreshResult, ApiError> {
        let path = build_query(
            &format!("/suppliers/{}/invoices/refresh", segment(supplier)),
            &[("months_back", months_back.map(|m| m.to_string()))],
        );
        self.api.post_empty(&path).await
    }

    pub async fn reindex(&self, supplier: &str) -> Result<Value, ApiError> {
        let path = format!("/suppliers/{}/invoices/reindex", segment(supplier));
        self.api.post_empty(&path).await
    }

    pub async fn history(
        &self,
        supplier: &str,
        invoice_no: &str,
    ) -> Result<InvoiceHistory, ApiError> {
        let path = format!(
            "/suppliers/{}/invoices/{}/history",
            segment(supplier),
            segment(invoice_no)
        );
        self.api.get_json(&path).await
    }

    pub async fn csv_outputs(
        &self,
        supplier: &str,
        invoice_no: &str,
    ) -> Result<CsvOutputs, ApiError> {
        let path = format!(
            "/suppliers/{}/invoices/{}/csv-outputs",
            segment(supplier),
            segment(invoice_no)
        );
        self.api.get_json(&path).await
    }

    /// `relpath` is relative to the data root (`suppliers/<s>/invoices/csv/...`).
    pub async fn preview_csv(&self, relpath: &str, max_rows: u32) -> Result<CsvPreview, ApiError> {
        let path = build_query(
            "/files/preview",
            &[
                ("relpath", Some(relpath.to_string())),
                ("max_rows", Some(max_rows.to_string())),
            ],
        );
        self.api.get_json(&path).await
    }

    /// Run the server import pipeline for one invoice.
    pub async fn prepare_run(
        &self,
        supplier: &str,
        shop: &str,
        invoice_relpath: &str,
        use_invoice_qty: bool,
    ) -> Result<PrepareResult, ApiError> {
        let body = json!({
            "supplier_ref": supplier,
            "shop_ref": shop,
            "invoice_relpath": invoice_relpath,
            "use_invoice_qty": use_invoice_qty,
        });
        self.api.post_json("/runs/prepare", Some(&body)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_entry_keeps_unknown_fields_and_statuses() {
        let entry: InvoiceIndexEntry = serde_json::from_value(json!({
            "supplier": "paul-lange",
            "invoice_id": "paul-lange:F2026010234",
            "number": "F2026010234",
            "csv_path": "invoices/csv/F2026010234.csv",
            "status": "archived",
            "stats": { "existing": 3 }
        }))
        .unwrap();
        assert_eq!(entry.status, InvoiceStatus::Other("archived".into()));
        assert_eq!(entry.relpath(), Some("invoices/csv/F2026010234.csv"));
        assert_eq!(entry.extra["stats"]["existing"], 3);

        let back = serde_json::to_value(&entry).unwrap();
        assert_eq!(back["status"], "archived");
        assert_eq!(back["stats"]["existing"], 3);
    }

    #[test]
    fn invoice_no_falls_back_to_invoice_id() {
        let entry = InvoiceIndexEntry {
            invoice_id: "paul-lange:F2026010234".into(),
            ..Default::default()
        };
        assert_eq!(entry.invoice_no(), "F2026010234");
    }

    #[test]
    fn missing_status_means_new() {
        let entry: InvoiceIndexEntry =
            serde_json::from_value(json!({ "number": "F1", "status": null })).unwrap();
        assert_eq!(entry.status, InvoiceStatus::New);
    }
}
