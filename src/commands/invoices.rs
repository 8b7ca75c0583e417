use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::clients::invoices::InvoiceStatus;
use crate::invoices_view::{receiving_action, InvoiceTable, SortOrder};
use crate::AppState;

use super::payload_object;

const DEFAULT_PREVIEW_ROWS: u32 = 50;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InvoicesLoadPayload {
    #[serde(default, alias = "supplier_code", alias = "supplierCode")]
    supplier: Option<String>,
    #[serde(default, alias = "months_back")]
    months_back: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InvoicesFilterPayload {
    #[serde(default, alias = "query", alias = "search")]
    text: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    sort: Option<String>,
    #[serde(default)]
    page: Option<usize>,
    #[serde(default, alias = "page_size")]
    page_size: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InvoicesSelectPayload {
    #[serde(default, alias = "invoice_id", alias = "id")]
    invoice_id: Option<String>,
    #[serde(default = "default_true")]
    selected: bool,
    #[serde(default, alias = "all_visible")]
    all: bool,
    #[serde(default)]
    clear: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InvoicesProcessPayload {
    #[serde(default, alias = "shop_ref", alias = "shop_code", alias = "shopCode")]
    shop: Option<String>,
    #[serde(default, alias = "use_invoice_qty")]
    use_invoice_qty: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InvoicesPreviewPayload {
    #[serde(
        alias = "invoice_id",
        alias = "invoiceId",
        alias = "invoice_no",
        alias = "invoiceNo"
    )]
    invoice: String,
    #[serde(default, alias = "max_rows")]
    max_rows: Option<u32>,
}

fn default_true() -> bool {
    true
}

fn parse_invoices_load_payload(arg0: Option<Value>) -> Result<InvoicesLoadPayload, String> {
    let mut parsed: InvoicesLoadPayload =
        serde_json::from_value(payload_object(arg0, "supplier"))
            .map_err(|e| format!("Invalid invoices payload: {e}"))?;
    parsed.supplier = parsed
        .supplier
        .take()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    Ok(parsed)
}

fn parse_invoices_filter_payload(arg0: Option<Value>) -> Result<InvoicesFilterPayload, String> {
    serde_json::from_value(payload_object(arg0, "text"))
        .map_err(|e| format!("Invalid invoice filter payload: {e}"))
}

fn parse_status_filter(raw: &str) -> Option<InvoiceStatus> {
    match raw.trim() {
        "" | "all" | "*" => None,
        other => Some(InvoiceStatus::from(other.to_string())),
    }
}

fn parse_sort(raw: &str) -> Result<SortOrder, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "asc" | "ascending" => Ok(SortOrder::Ascending),
        "desc" | "descending" => Ok(SortOrder::Descending),
        other => Err(format!("Unknown sort order: {other}")),
    }
}

fn parse_invoices_select_payload(arg0: Option<Value>) -> Result<InvoicesSelectPayload, String> {
    let parsed: InvoicesSelectPayload = serde_json::from_value(payload_object(arg0, "invoiceId"))
        .map_err(|e| format!("Invalid selection payload: {e}"))?;
    if parsed.invoice_id.is_none() && !parsed.all && !parsed.clear {
        return Err("Missing invoiceId".into());
    }
    Ok(parsed)
}

fn parse_invoices_process_payload(arg0: Option<Value>) -> Result<InvoicesProcessPayload, String> {
    serde_json::from_value(payload_object(arg0, "shop"))
        .map_err(|e| format!("Invalid process payload: {e}"))
}

fn parse_invoices_preview_payload(arg0: Option<Value>) -> Result<InvoicesPreviewPayload, String> {
    let mut parsed: InvoicesPreviewPayload =
        serde_json::from_value(payload_object(arg0, "invoice"))
            .map_err(|e| format!("Invalid preview payload: {e}"))?;
    parsed.invoice = parsed.invoice.trim().to_string();
    if parsed.invoice.is_empty() {
        return Err("Missing invoice".into());
    }
    Ok(parsed)
}

fn table_value(table: &InvoiceTable) -> Value {
    let page = table.current_page();
    let actions: Vec<Value> = page
        .rows
        .iter()
        .map(|entry| {
            json!({
                "invoice_id": entry.invoice_id,
                "receiving": receiving_action(entry),
            })
        })
        .collect();
    json!({
        "supplier": table.supplier(),
        "page": page,
        "actions": actions,
    })
}

async fn reload_entries(state: &AppState, supplier: &str) {
    match state.invoices.index(supplier).await {
        Ok(index) => {
            if let Some(table) = state.invoice_table.lock().await.as_mut() {
                if table.supplier() == supplier {
                    table.replace_entries(index.invoices);
                }
            }
        }
        Err(e) => warn!(supplier, error = %e, "invoice index reload failed"),
    }
}

pub async fn invoices_load(arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let payload = parse_invoices_load_payload(arg0)?;
    let supplier = payload
        .supplier
        .or_else(|| state.default_supplier())
        .ok_or("Missing supplier")?;
    let table = InvoiceTable::load(&state.invoices, &supplier)
        .await
        .map_err(|e| e.to_string())?;
    let value = table_value(&table);
    *state.invoice_table.lock().await = Some(table);
    Ok(value)
}

/// Download new invoices, then reload the index.
pub async fn invoices_refresh(arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let payload = parse_invoices_load_payload(arg0)?;
    let current = state
        .invoice_table
        .lock()
        .await
        .as_ref()
        .map(|t| t.supplier().to_string());
    let supplier = payload
        .supplier
        .or(current)
        .or_else(|| state.default_supplier())
        .ok_or("Missing supplier")?;
    let result = state
        .invoices
        .refresh(&supplier, payload.months_back)
        .await
        .map_err(|e| e.to_string())?;
    info!(
        supplier = %supplier,
        downloaded = result.downloaded,
        failed = result.failed,
        "invoices refreshed"
    );
    reload_entries(state, &supplier).await;
    let table = state
        .invoice_table
        .lock()
        .await
        .as_ref()
        .map(table_value)
        .unwrap_or(Value::Null);
    Ok(json!({ "refresh": result, "table": table }))
}

pub async fn invoices_filter(arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let payload = parse_invoices_filter_payload(arg0)?;
    let mut slot = state.invoice_table.lock().await;
    let table = slot.as_mut().ok_or("Invoice index is not loaded")?;
    if let Some(text) = payload.text.as_deref() {
        table.set_text_filter(text);
    }
    if let Some(status) = payload.status.as_deref() {
        table.set_status_filter(parse_status_filter(status));
    }
    if let Some(sort) = payload.sort.as_deref() {
        table.set_sort(parse_sort(sort)?);
    }
    if let Some(page_size) = payload.page_size {
        table.set_page_size(page_size);
    }
    if let Some(page) = payload.page {
        table.set_page(page);
    }
    Ok(table_value(table))
}

pub async fn invoices_select(arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let payload = parse_invoices_select_payload(arg0)?;
    let mut slot = state.invoice_table.lock().await;
    let table = slot.as_mut().ok_or("Invoice index is not loaded")?;
    if payload.clear {
        table.clear_selection();
    }
    if payload.all {
        table.select_visible();
    }
    if let Some(invoice_id) = payload.invoice_id.as_deref() {
        if !table.select(invoice_id.trim(), payload.selected) {
            return Err(format!("Unknown invoice: {invoice_id}"));
        }
    }
    Ok(table_value(table))
}

pub async fn invoices_process_selected(
    arg0: Option<Value>,
    state: &AppState,
) -> Result<Value, String> {
    let payload = parse_invoices_process_payload(arg0)?;
    let shop = payload
        .shop
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| state.default_shop())
        .ok_or("Missing shop")?;
    // Work on a copy so the table stays usable while the batch runs.
    let table = state
        .invoice_table
        .lock()
        .await
        .clone()
        .ok_or("Invoice index is not loaded")?;
    if table.selected_entries().is_empty() {
        return Err("No invoices selected".into());
    }
    let outcomes = table
        .process_selected(&state.invoices, &shop, payload.use_invoice_qty.unwrap_or(false))
        .await;
    let failed = outcomes.iter().filter(|o| !o.ok).count();
    info!(
        supplier = %table.supplier(),
        shop = %shop,
        processed = outcomes.len(),
        failed,
        "invoice batch finished"
    );
    state.events.emit(
        "invoices_processed",
        json!({ "supplier": table.supplier(), "outcomes": outcomes }),
    );
    reload_entries(state, table.supplier()).await;
    Ok(json!({ "outcomes": outcomes, "failed": failed }))
}

pub async fn invoices_preview(arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let payload = parse_invoices_preview_payload(arg0)?;
    let table = state
        .invoice_table
        .lock()
        .await
        .clone()
        .ok_or("Invoice index is not loaded")?;
    let entry = table
        .entry(&payload.invoice)
        .ok_or_else(|| format!("Unknown invoice: {}", payload.invoice))?;
    let preview = table
        .preview(
            &state.invoices,
            entry,
            payload.max_rows.unwrap_or(DEFAULT_PREVIEW_ROWS),
        )
        .await
        .map_err(|e| e.to_string())?;
    serde_json::to_value(preview).map_err(|e| e.to_string())
}

pub async fn invoices_history(arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let payload = parse_invoices_preview_payload(arg0)?;
    let supplier = state
        .invoice_table
        .lock()
        .await
        .as_ref()
        .map(|t| t.supplier().to_string())
        .or_else(|| state.default_supplier())
        .ok_or("Missing supplier")?;
    let invoice_no = payload
        .invoice
        .rsplit_once(':')
        .map(|(_, n)| n.to_string())
        .unwrap_or(payload.invoice);
    let history = state
        .invoices
        .history(&supplier, &invoice_no)
        .await
        .map_err(|e| e.to_string())?;
    let outputs = state
        .invoices
        .csv_outputs(&supplier, &invoice_no)
        .await
        .map_err(|e| e.to_string())?;
    Ok(json!({ "history": history, "outputs": outputs }))
}

pub async fn suppliers_list(_arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let suppliers = state
        .suppliers
        .list_suppliers()
        .await
        .map_err(|e| e.to_string())?;
    Ok(json!({ "suppliers": suppliers }))
}

pub async fn supplier_files(arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let obj = payload_object(arg0, "supplier");
    let supplier = crate::value_str(&obj, &["supplier", "supplierCode", "supplier_code"])
        .or_else(|| state.default_supplier())
        .ok_or("Missing supplier")?;
    let area = crate::value_str(&obj, &["area"]).unwrap_or_else(|| "invoices".to_string());
    let months_back = obj
        .get("monthsBack")
        .or_else(|| obj.get("months_back"))
        .and_then(Value::as_u64)
        .and_then(|m| u32::try_from(m).ok());
    let files = state
        .suppliers
        .list_files(&supplier, &area, months_back)
        .await
        .map_err(|e| e.to_string())?;
    serde_json::to_value(files).map_err(|e| e.to_string())
}

#[cfg(test)]
mod dto_tests {
    use super::*;

    #[test]
    fn parse_load_supports_string_and_object() {
        let s = parse_invoices_load_payload(Some(json!(" paul-lange "))).unwrap();
        assert_eq!(s.supplier.as_deref(), Some("paul-lange"));
        let o = parse_invoices_load_payload(Some(json!({ "supplierCode": "x", "months_back": 3 })))
            .unwrap();
        assert_eq!(o.supplier.as_deref(), Some("x"));
        assert_eq!(o.months_back, Some(3));
        assert_eq!(parse_invoices_load_payload(None).unwrap().supplier, None);
    }

    #[test]
    fn parse_filter_status_and_sort() {
        let p = parse_invoices_filter_payload(Some(json!({
            "search": "F2026",
            "status": "in_progress",
            "sort": "asc",
            "pageSize": 10
        })))
        .unwrap();
        assert_eq!(p.text.as_deref(), Some("F2026"));
        assert_eq!(p.page_size, Some(10));
        assert_eq!(
            parse_status_filter(p.status.as_deref().unwrap()),
            Some(InvoiceStatus::InProgress)
        );
        assert_eq!(parse_status_filter("all"), None);
        assert_eq!(parse_sort("ASC").unwrap(), SortOrder::Ascending);
        assert!(parse_sort("sideways").is_err());
    }

    #[test]
    fn parse_select_requires_target() {
        let one = parse_invoices_select_payload(Some(json!("paul-lange:F1"))).unwrap();
        assert_eq!(one.invoice_id.as_deref(), Some("paul-lange:F1"));
        assert!(one.selected);
        let off = parse_invoices_select_payload(Some(json!({ "id": "a", "selected": false })))
            .unwrap();
        assert!(!off.selected);
        assert!(parse_invoices_select_payload(Some(json!({ "all": true }))).unwrap().all);
        assert!(parse_invoices_select_payload(None).is_err());
    }

    #[test]
    fn parse_preview_and_process() {
        let p = parse_invoices_preview_payload(Some(json!({ "invoiceNo": "F1", "maxRows": 5 })))
            .unwrap();
        assert_eq!(p.invoice, "F1");
        assert_eq!(p.max_rows, Some(5));
        assert!(parse_invoices_preview_payload(Some(json!(" "))).is_err());

        let run = parse_invoices_process_payload(Some(json!({
            "shop_ref": "biketrek",
            "useInvoiceQty": true
        })))
        .unwrap();
        assert_eq!(run.shop.as_deref(), Some("biketrek"));
        assert_eq!(run.use_invoice_qty, Some(true));
    }
}
