use std::path::PathBuf;

use serde_json::{json, Value};
use tracing::{info, warn};

use crate::{diagnostics, AppState};

use super::payload_object;

const DEFAULT_RECENT_LOGS: u32 = 20;

fn parse_diagnostics_export_payload(
    arg0: Option<Value>,
) -> (diagnostics::DiagnosticsExportOptions, Option<PathBuf>) {
    let mut options = diagnostics::DiagnosticsExportOptions::default();
    let mut output_dir = None;

    match arg0 {
        Some(Value::Bool(include_logs)) => {
            options.include_logs = include_logs;
        }
        Some(Value::String(dir)) if !dir.trim().is_empty() => {
            output_dir = Some(PathBuf::from(dir.trim()));
        }
        Some(Value::Object(obj)) => {
            if let Some(include_logs) = obj
                .get("includeLogs")
                .or_else(|| obj.get("include_logs"))
                .or_else(|| obj.get("logs"))
                .and_then(|v| v.as_bool())
            {
                options.include_logs = include_logs;
            }
            if let Some(redact_sensitive) = obj
                .get("redactSensitive")
                .or_else(|| obj.get("redact_sensitive"))
                .or_else(|| obj.get("redacted"))
                .and_then(|v| v.as_bool())
            {
                options.redact_sensitive = redact_sensitive;
            }
            output_dir = crate::value_str(
                &Value::Object(obj),
                &["path", "outputDir", "output_dir", "exportPath", "export_path"],
            )
            .map(PathBuf::from);
        }
        _ => {}
    }

    (options, output_dir)
}

#[derive(Debug, Default)]
struct DashboardPayload {
    date_from: Option<String>,
    date_to: Option<String>,
    limit: u32,
    supplier: Option<String>,
}

fn parse_dashboard_payload(arg0: Option<Value>) -> DashboardPayload {
    let obj = payload_object(arg0, "supplier");
    DashboardPayload {
        date_from: crate::value_str(&obj, &["dateFrom", "date_from", "from"]),
        date_to: crate::value_str(&obj, &["dateTo", "date_to", "to"]),
        limit: obj
            .get("limit")
            .and_then(Value::as_u64)
            .and_then(|l| u32::try_from(l).ok())
            .filter(|l| *l > 0)
            .unwrap_or(DEFAULT_RECENT_LOGS),
        supplier: crate::value_str(&obj, &["supplier", "supplierCode", "supplier_code"]),
    }
}

fn section<T: serde::Serialize, E: std::fmt::Display>(name: &str, result: Result<T, E>) -> Value {
    match result {
        Ok(value) => serde_json::to_value(value).unwrap_or(Value::Null),
        Err(e) => {
            warn!(section = name, error = %e, "dashboard section failed");
            json!({ "error": e.to_string() })
        }
    }
}

/// Health, invoice stats and recent logs fetched together. A failing
/// section carries `{ error }` instead of failing the whole overview.
pub async fn dashboard_overview(arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let payload = parse_dashboard_payload(arg0);
    let (health, stats, logs) = tokio::join!(
        state.dashboard.health(),
        state
            .dashboard
            .invoice_stats(payload.date_from.as_deref(), payload.date_to.as_deref()),
        state
            .dashboard
            .recent_logs(payload.limit, payload.supplier.as_deref()),
    );
    let api_ok = health.as_ref().map(|h| h.is_ok()).unwrap_or(false);
    Ok(json!({
        "api_ok": api_ok,
        "api_base": state.settings.api.base_url,
        "health": section("health", health),
        "stats": section("stats", stats),
        "recent_logs": section("recent_logs", logs),
    }))
}

pub async fn diagnostics_requests(
    _arg0: Option<Value>,
    state: &AppState,
) -> Result<Value, String> {
    Ok(json!({
        "capacity": state.requests.capacity(),
        "stats": state.requests.stats(),
        "events": state.requests.snapshot(),
    }))
}

pub async fn diagnostics_clear(_arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    state.requests.clear();
    info!("request log cleared");
    Ok(json!({ "success": true }))
}

pub async fn diagnostics_export(arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let (options, output_dir) = parse_diagnostics_export_payload(arg0);
    let output_dir = output_dir.unwrap_or_else(|| {
        diagnostics::log_dir(&state.settings)
            .parent()
            .map(|p| p.join("diagnostics"))
            .unwrap_or_else(|| PathBuf::from("diagnostics"))
    });
    let settings = state.settings.clone();
    let requests = state.requests.clone();
    let path = tokio::task::spawn_blocking(move || {
        diagnostics::export_diagnostics(&settings, &requests, &output_dir, options)
    })
    .await
    .map_err(|e| format!("Diagnostics export task failed: {e}"))??;
    info!(path = %path, "diagnostics exported");
    Ok(json!({ "success": true, "path": path }))
}

pub async fn about(_arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let mut info = diagnostics::about_info();
    if let Some(obj) = info.as_object_mut() {
        obj.insert("apiBase".into(), json!(state.settings.api.base_url));
        obj.insert(
            "logDir".into(),
            json!(diagnostics::log_dir(&state.settings)),
        );
    }
    Ok(info)
}
