//! Command surface for the console UI.
//!
//! Every handler takes the raw first argument the UI sent (`arg0`: a bare
//! string, a number, a bool or an object with snake_case or camelCase keys)
//! and returns `Result<Value, String>`; errors are display strings.

use serde_json::Value;
use tracing::debug;

use crate::AppState;

pub mod config;
pub mod diagnostics;
pub mod invoices;
pub mod receiving;

/// Normalise `arg0` into an object: a bare string becomes `{ key: s }`.
pub(crate) fn payload_object(arg0: Option<Value>, key: &str) -> Value {
    match arg0 {
        Some(Value::Object(obj)) => Value::Object(obj),
        Some(Value::String(s)) => {
            let mut obj = serde_json::Map::new();
            obj.insert(key.to_string(), Value::String(s));
            Value::Object(obj)
        }
        _ => Value::Object(serde_json::Map::new()),
    }
}

pub const COMMANDS: &[&str] = &[
    "receiving_open",
    "receiving_scan",
    "receiving_set_qty",
    "receiving_accept_all",
    "receiving_reset_all",
    "receiving_pause",
    "receiving_finalize",
    "receiving_state",
    "receiving_dismiss_error",
    "receiving_close",
    "receiving_reopen",
    "receiving_history",
    "config_load",
    "config_set_field",
    "config_set_raw",
    "config_revert",
    "config_save",
    "supplier_form_load",
    "supplier_form_save",
    "suppliers_list",
    "supplier_files",
    "invoices_load",
    "invoices_refresh",
    "invoices_filter",
    "invoices_select",
    "invoices_process_selected",
    "invoices_preview",
    "invoices_history",
    "dashboard_overview",
    "diagnostics_requests",
    "diagnostics_clear",
    "diagnostics_export",
    "about",
];

/// Route a command by name, the way a webview bridge would.
pub async fn invoke(state: &AppState, command: &str, arg0: Option<Value>) -> Result<Value, String> {
    debug!(command, "invoke");
    match command {
        "receiving_open" => receiving::receiving_open(arg0, state).await,
        "receiving_scan" => receiving::receiving_scan(arg0, state).await,
        "receiving_set_qty" => receiving::receiving_set_qty(arg0, state).await,
        "receiving_accept_all" => receiving::receiving_accept_all(arg0, state).await,
        "receiving_reset_all" => receiving::receiving_reset_all(arg0, state).await,
        "receiving_pause" => receiving::receiving_pause(arg0, state).await,
        "receiving_finalize" => receiving::receiving_finalize(arg0, state).await,
        "receiving_state" => receiving::receiving_state(arg0, state).await,
        "receiving_dismiss_error" => receiving::receiving_dismiss_error(arg0, state).await,
        "receiving_close" => receiving::receiving_close(arg0, state).await,
        "receiving_reopen" => receiving::receiving_reopen(arg0, state).await,
        "receiving_history" => receiving::receiving_history(arg0, state).await,
        "config_load" => config::config_load(arg0, state).await,
        "config_set_field" => config::config_set_field(arg0, state).await,
        "config_set_raw" => config::config_set_raw(arg0, state).await,
        "config_revert" => config::config_revert(arg0, state).await,
        "config_save" => config::config_save(arg0, state).await,
        "supplier_form_load" => config::supplier_form_load(arg0, state).await,
        "supplier_form_save" => config::supplier_form_save(arg0, state).await,
        "suppliers_list" => invoices::suppliers_list(arg0, state).await,
        "supplier_files" => invoices::supplier_files(arg0, state).await,
        "invoices_load" => invoices::invoices_load(arg0, state).await,
        "invoices_refresh" => invoices::invoices_refresh(arg0, state).await,
        "invoices_filter" => invoices::invoices_filter(arg0, state).await,
        "invoices_select" => invoices::invoices_select(arg0, state).await,
        "invoices_process_selected" => invoices::invoices_process_selected(arg0, state).await,
        "invoices_preview" => invoices::invoices_preview(arg0, state).await,
        "invoices_history" => invoices::invoices_history(arg0, state).await,
        "dashboard_overview" => diagnostics::dashboard_overview(arg0, state).await,
        "diagnostics_requests" => diagnostics::diagnostics_requests(arg0, state).await,
        "diagnostics_clear" => diagnostics::diagnostics_clear(arg0, state).await,
        "diagnostics_export" => diagnostics::diagnostics_export(arg0, state).await,
        "about" => diagnostics::about(arg0, state).await,
        other => Err(format!("Unknown command: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receiving::fake::FakeReceivingApi;
    use crate::settings::Settings;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn payload_object_wraps_strings() {
        assert_eq!(payload_object(Some(json!("F1")), "invoice"), json!({ "invoice": "F1" }));
        assert_eq!(payload_object(Some(json!({ "a": 1 })), "x"), json!({ "a": 1 }));
        assert_eq!(payload_object(Some(json!(true)), "x"), json!({}));
        assert_eq!(payload_object(None, "x"), json!({}));
    }

    #[tokio::test]
    async fn invoke_routes_and_rejects_unknown() {
        let api = Arc::new(FakeReceivingApi::with_invoice("F1", &[1.0]));
        let state = AppState::with_receiving_api(Settings::default(), api).unwrap();
        let about = invoke(&state, "about", None).await.unwrap();
        assert!(about.get("version").is_some());
        assert_eq!(
            invoke(&state, "receiving_state", None).await.unwrap()["has_session"],
            false
        );
        assert!(invoke(&state, "print_receipt", None)
            .await
            .unwrap_err()
            .contains("Unknown command"));
    }

    #[tokio::test]
    async fn diagnostics_clear_empties_request_log() {
        let api = Arc::new(FakeReceivingApi::with_invoice("F1", &[1.0]));
        let state = AppState::with_receiving_api(Settings::default(), api).unwrap();
        invoke(&state, "diagnostics_clear", None).await.unwrap();
        let requests = invoke(&state, "diagnostics_requests", None).await.unwrap();
        assert_eq!(requests["events"], json!([]));
        assert_eq!(requests["capacity"], 200);
    }
}
