use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::clients::invoices::{InvoiceIndexEntry, InvoiceStatus};
use crate::receiving::{ReceivingController, ReceivingWorkspace};
use crate::AppState;

use super::payload_object;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceivingOpenPayload {
    #[serde(default, alias = "supplier_code", alias = "supplierCode")]
    supplier: Option<String>,
    #[serde(default, alias = "invoice_no", alias = "invoice", alias = "number")]
    invoice_no: Option<String>,
    #[serde(default, alias = "invoice_id")]
    invoice_id: Option<String>,
    #[serde(default, alias = "session_id")]
    session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceivingScanPayload {
    #[serde(default, alias = "ean", alias = "value")]
    code: String,
    #[serde(default, alias = "quantity")]
    qty: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceivingSetQtyPayload {
    #[serde(alias = "line_index", alias = "index")]
    line_index: usize,
    #[serde(alias = "received_qty", alias = "qty", alias = "quantity")]
    received_qty: f64,
    #[serde(default)]
    note: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmPayload {
    #[serde(default, alias = "confirmed")]
    confirm: bool,
    #[serde(default, alias = "cancelled")]
    cancel: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceivingInvoicePayload {
    #[serde(default, alias = "supplier_code")]
    supplier: Option<String>,
    #[serde(alias = "invoice_no", alias = "invoice", alias = "number")]
    invoice_no: String,
}

fn parse_receiving_open_payload(arg0: Option<Value>) -> Result<ReceivingOpenPayload, String> {
    let payload = match arg0 {
        Some(Value::String(raw)) if raw.contains(':') => json!({ "invoiceId": raw }),
        Some(Value::String(raw)) => json!({ "invoiceNo": raw }),
        other => payload_object(other, "invoiceNo"),
    };
    let mut parsed: ReceivingOpenPayload = serde_json::from_value(payload)
        .map_err(|e| format!("Invalid receiving open payload: {e}"))?;
    let trim = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
    parsed.supplier = trim(parsed.supplier);
    parsed.invoice_no = trim(parsed.invoice_no);
    parsed.invoice_id = trim(parsed.invoice_id);
    parsed.session_id = trim(parsed.session_id);
    if parsed.supplier.is_none() {
        parsed.supplier = parsed
            .invoice_id
            .as_deref()
            .and_then(|id| id.split_once(':'))
            .map(|(s, _)| s.to_string())
            .filter(|s| !s.is_empty());
    }
    if parsed.invoice_no.is_none() {
        parsed.invoice_no = parsed
            .invoice_id
            .as_deref()
            .map(|id| id.rsplit_once(':').map(|(_, n)| n).unwrap_or(id).to_string());
    }
    if parsed.invoice_no.is_none() && parsed.session_id.is_none() {
        return Err("Missing invoiceNo or sessionId".into());
    }
    Ok(parsed)
}

fn parse_receiving_scan_payload(arg0: Option<Value>) -> Result<ReceivingScanPayload, String> {
    let payload = match arg0 {
        Some(Value::Number(n)) => json!({ "code": n.to_string() }),
        other => payload_object(other, "code"),
    };
    let mut parsed: ReceivingScanPayload =
        serde_json::from_value(payload).map_err(|e| format!("Invalid scan payload: {e}"))?;
    parsed.code = parsed.code.trim().to_string();
    Ok(parsed)
}

fn parse_receiving_set_qty_payload(arg0: Option<Value>) -> Result<ReceivingSetQtyPayload, String> {
    let payload = arg0.ok_or("Missing set-qty payload")?;
    let mut parsed: ReceivingSetQtyPayload = serde_json::from_value(payload)
        .map_err(|e| format!("Invalid set-qty payload: {e}"))?;
    parsed.note = parsed
        .note
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty());
    Ok(parsed)
}

fn parse_confirm_payload(arg0: Option<Value>) -> Result<ConfirmPayload, String> {
    match arg0 {
        Some(Value::Bool(confirm)) => Ok(ConfirmPayload {
            confirm,
            cancel: false,
        }),
        Some(Value::Object(obj)) => serde_json::from_value(Value::Object(obj))
            .map_err(|e| format!("Invalid confirmation payload: {e}")),
        _ => Ok(ConfirmPayload::default()),
    }
}

fn parse_only_pending(arg0: Option<Value>) -> bool {
    match arg0 {
        Some(Value::Bool(only_pending)) => only_pending,
        Some(obj @ Value::Object(_)) => obj
            .get("onlyPending")
            .or_else(|| obj.get("only_pending"))
            .and_then(Value::as_bool)
            .unwrap_or(true),
        _ => true,
    }
}

fn parse_receiving_invoice_payload(
    arg0: Option<Value>,
) -> Result<ReceivingInvoicePayload, String> {
    let payload = payload_object(arg0, "invoiceNo");
    let mut parsed: ReceivingInvoicePayload = serde_json::from_value(payload)
        .map_err(|e| format!("Invalid invoice payload: {e}"))?;
    parsed.invoice_no = parsed.invoice_no.trim().to_string();
    if parsed.invoice_no.is_empty() {
        return Err("Missing invoiceNo".into());
    }
    Ok(parsed)
}

fn state_value(workspace: &ReceivingWorkspace, controller: &ReceivingController) -> Value {
    let mut value = serde_json::to_value(workspace).unwrap_or_else(|_| json!({}));
    if let Some(obj) = value.as_object_mut() {
        obj.insert("has_session".into(), Value::Bool(true));
        obj.insert(
            "queue".into(),
            serde_json::to_value(controller.queue_status()).unwrap_or(Value::Null),
        );
    }
    value
}

fn with_state(mut result: Value, controller: &ReceivingController) -> Value {
    let state = state_value(&controller.snapshot(), controller);
    match result.as_object_mut() {
        Some(obj) => {
            obj.insert("state".into(), state);
            result
        }
        None => json!({ "result": result, "state": state }),
    }
}

async fn resolve_supplier(state: &AppState, explicit: Option<String>) -> Result<String, String> {
    if let Some(supplier) = explicit {
        return Ok(supplier);
    }
    if let Some(table) = state.invoice_table.lock().await.as_ref() {
        return Ok(table.supplier().to_string());
    }
    state
        .default_supplier()
        .ok_or_else(|| "Missing supplier".to_string())
}

pub async fn receiving_open(arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let payload = parse_receiving_open_payload(arg0)?;
    let supplier = resolve_supplier(state, payload.supplier.clone()).await?;

    let controller = match (&payload.session_id, &payload.invoice_no) {
        (Some(session_id), _) => ReceivingController::resume(
            state.receiving_api.clone(),
            state.events.clone(),
            &supplier,
            session_id,
        )
        .await
        .map_err(|e| e.to_string())?,
        (None, Some(invoice_no)) => {
            let known = state.invoice_table.lock().await.as_ref().and_then(|table| {
                (table.supplier() == supplier)
                    .then(|| table.entry(invoice_no).cloned())
                    .flatten()
            });
            let entry = known.unwrap_or_else(|| InvoiceIndexEntry {
                supplier: supplier.clone(),
                invoice_id: payload
                    .invoice_id
                    .clone()
                    .unwrap_or_else(|| format!("{supplier}:{invoice_no}")),
                number: invoice_no.clone(),
                status: InvoiceStatus::New,
                ..Default::default()
            });
            ReceivingController::open_invoice(
                state.receiving_api.clone(),
                state.events.clone(),
                &entry,
            )
            .await
            .map_err(|e| e.to_string())?
        }
        (None, None) => return Err("Missing invoiceNo or sessionId".into()),
    };

    info!(supplier = %supplier, session_id = ?controller.session_id(), "receiving opened");
    let value = state_value(&controller.snapshot(), &controller);
    state.replace_receiving(Some(controller)).await;
    Ok(value)
}

pub async fn receiving_scan(arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let payload = parse_receiving_scan_payload(arg0)?;
    let controller = state.receiving().await?;
    let outcome = controller
        .scan(&payload.code, payload.qty.unwrap_or(1.0))
        .await
        .map_err(|e| e.to_string())?;
    let result = match outcome {
        Some(outcome) => json!({ "ignored": false, "outcome": outcome }),
        None => json!({ "ignored": true }),
    };
    Ok(with_state(result, &controller))
}

pub async fn receiving_set_qty(arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let payload = parse_receiving_set_qty_payload(arg0)?;
    let controller = state.receiving().await?;
    controller
        .set_line_quantity(payload.line_index, payload.received_qty, payload.note.as_deref())
        .await
        .map_err(|e| e.to_string())?;
    Ok(with_state(json!({ "success": true }), &controller))
}

pub async fn receiving_accept_all(arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let only_pending = parse_only_pending(arg0);
    let controller = state.receiving().await?;
    let updated_count = controller
        .accept_all(only_pending)
        .await
        .map_err(|e| e.to_string())?;
    Ok(with_state(
        json!({ "updated_count": updated_count }),
        &controller,
    ))
}

/// First call (no `confirm`) returns the prompt; `{ confirm: true }` resets.
pub async fn receiving_reset_all(arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let payload = parse_confirm_payload(arg0)?;
    let controller = state.receiving().await?;
    if payload.cancel {
        controller.cancel_confirmation();
        return Ok(with_state(json!({ "cancelled": true }), &controller));
    }
    if !payload.confirm {
        let confirmation = controller.request_reset_all().map_err(|e| e.to_string())?;
        return Ok(with_state(
            json!({ "needs_confirmation": true, "confirmation": confirmation }),
            &controller,
        ));
    }
    controller
        .confirm_reset_all()
        .await
        .map_err(|e| e.to_string())?;
    Ok(with_state(json!({ "success": true }), &controller))
}

pub async fn receiving_pause(_arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let controller = state.receiving().await?;
    let result = controller.pause().await.map_err(|e| e.to_string())?;
    Ok(with_state(json!({ "result": result }), &controller))
}

/// Without `confirm` this finalizes only when nothing is incomplete and
/// otherwise returns the confirmation prompt.
pub async fn receiving_finalize(arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let payload = parse_confirm_payload(arg0)?;
    let controller = state.receiving().await?;
    if payload.cancel {
        controller.cancel_confirmation();
        return Ok(with_state(json!({ "cancelled": true }), &controller));
    }
    let gate = if payload.confirm {
        let result = controller
            .confirm_finalize()
            .await
            .map_err(|e| e.to_string())?;
        json!({ "kind": "finalized", "result": result })
    } else {
        let gate = controller
            .request_finalize()
            .await
            .map_err(|e| e.to_string())?;
        serde_json::to_value(gate).map_err(|e| e.to_string())?
    };
    Ok(with_state(gate, &controller))
}

pub async fn receiving_state(_arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let current = state.receiving.lock().await.clone();
    Ok(match current {
        Some(controller) => state_value(&controller.snapshot(), &controller),
        None => json!({ "has_session": false }),
    })
}

pub async fn receiving_dismiss_error(
    _arg0: Option<Value>,
    state: &AppState,
) -> Result<Value, String> {
    let controller = state.receiving().await?;
    controller.dismiss_error();
    Ok(state_value(&controller.snapshot(), &controller))
}

pub async fn receiving_close(_arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    state.replace_receiving(None).await;
    Ok(json!({ "has_session": false }))
}

pub async fn receiving_reopen(arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let payload = parse_receiving_invoice_payload(arg0)?;
    let supplier = resolve_supplier(state, payload.supplier).await?;
    let result = state
        .receiving_api
        .reopen_invoice(&supplier, &payload.invoice_no)
        .await
        .map_err(|e| e.to_string())?;
    info!(supplier = %supplier, invoice = %payload.invoice_no, "invoice reopened");
    state.events.emit(
        "receiving_reopened",
        json!({ "supplier": supplier, "invoice_no": payload.invoice_no }),
    );
    serde_json::to_value(result).map_err(|e| e.to_string())
}

pub async fn receiving_history(arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let payload = parse_receiving_invoice_payload(arg0)?;
    let supplier = resolve_supplier(state, payload.supplier).await?;
    let history = state
        .receiving_history
        .history(&supplier, &payload.invoice_no)
        .await
        .map_err(|e| e.to_string())?;
    serde_json::to_value(history).map_err(|e| e.to_string())
}
