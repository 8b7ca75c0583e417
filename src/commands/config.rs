use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::config_forms::{ConfigEditor, ConfigTarget, SupplierFlatForm};
use crate::AppState;

use super::payload_object;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigLoadPayload {
    #[serde(default, alias = "target", alias = "type")]
    kind: String,
    #[serde(
        default,
        alias = "supplier",
        alias = "shop",
        alias = "supplier_code",
        alias = "shop_code"
    )]
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigSetFieldPayload {
    #[serde(alias = "pointer", alias = "field", alias = "key")]
    path: String,
    #[serde(default)]
    value: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SupplierFormSavePayload {
    #[serde(default, alias = "supplier_code", alias = "supplierCode", alias = "code")]
    supplier: Option<String>,
    form: SupplierFlatForm,
}

fn parse_config_load_payload(arg0: Option<Value>) -> Result<ConfigTarget, String> {
    let payload = match arg0 {
        // "console", "supplier:paul-lange", "shop:biketrek"
        Some(Value::String(raw)) => {
            let (kind, code) = raw.split_once(':').unwrap_or((raw.as_str(), ""));
            json!({ "kind": kind, "code": code })
        }
        other => payload_object(other, "kind"),
    };
    let parsed: ConfigLoadPayload = serde_json::from_value(payload)
        .map_err(|e| format!("Invalid config payload: {e}"))?;
    ConfigTarget::parse(&parsed.kind, parsed.code.as_deref())
}

fn parse_config_set_field_payload(arg0: Option<Value>) -> Result<ConfigSetFieldPayload, String> {
    let payload = arg0.ok_or("Missing config field payload")?;
    let mut parsed: ConfigSetFieldPayload = serde_json::from_value(payload)
        .map_err(|e| format!("Invalid config field payload: {e}"))?;
    parsed.path = parsed.path.trim().to_string();
    if parsed.path.is_empty() {
        return Err("Missing path".into());
    }
    Ok(parsed)
}

fn parse_config_raw_payload(arg0: Option<Value>) -> Result<String, String> {
    match arg0 {
        Some(Value::String(text)) => Ok(text),
        Some(Value::Object(obj)) => obj
            .get("text")
            .or_else(|| obj.get("raw"))
            .or_else(|| obj.get("json"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| "Missing raw JSON text".to_string()),
        _ => Err("Missing raw JSON text".into()),
    }
}

fn editor_value(editor: &ConfigEditor) -> Value {
    json!({
        "target": editor.target(),
        "document": editor.document(),
        "raw": editor.raw_text(),
        "dirty": editor.is_dirty(),
    })
}

pub async fn config_load(arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let target = parse_config_load_payload(arg0)?;
    let editor = ConfigEditor::load(&state.configs, target)
        .await
        .map_err(|e| e.to_string())?;
    let value = editor_value(&editor);
    *state.config_editor.lock().await = Some(editor);
    Ok(value)
}

pub async fn config_set_field(arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let payload = parse_config_set_field_payload(arg0)?;
    let mut slot = state.config_editor.lock().await;
    let editor = slot.as_mut().ok_or("No configuration is loaded")?;
    editor
        .set_field(&payload.path, payload.value)
        .map_err(|e| e.to_string())?;
    Ok(editor_value(editor))
}

pub async fn config_set_raw(arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let text = parse_config_raw_payload(arg0)?;
    let mut slot = state.config_editor.lock().await;
    let editor = slot.as_mut().ok_or("No configuration is loaded")?;
    editor.set_raw_text(&text).map_err(|e| e.to_string())?;
    Ok(editor_value(editor))
}

pub async fn config_revert(_arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let mut slot = state.config_editor.lock().await;
    let editor = slot.as_mut().ok_or("No configuration is loaded")?;
    editor.revert();
    Ok(editor_value(editor))
}

pub async fn config_save(_arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let mut slot = state.config_editor.lock().await;
    let editor = slot.as_mut().ok_or("No configuration is loaded")?;
    editor
        .save(&state.configs)
        .await
        .map_err(|e| e.to_string())?;
    state
        .events
        .emit("config_saved", json!({ "target": editor.target() }));
    Ok(editor_value(editor))
}

fn form_supplier(state: &AppState, explicit: Option<String>) -> Result<String, String> {
    explicit
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| state.default_supplier())
        .ok_or_else(|| "Missing supplier".to_string())
}

pub async fn supplier_form_load(arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let explicit = crate::payload_arg0_as_string(
        arg0,
        &["supplier", "supplierCode", "supplier_code", "code"],
    );
    let supplier = form_supplier(state, explicit)?;
    let document = state
        .configs
        .get_supplier_config(&supplier)
        .await
        .map_err(|e| e.to_string())?;
    let form = SupplierFlatForm::from_nested(&document);
    Ok(json!({ "supplier": supplier, "form": form }))
}

/// Merge the flat form into the current server document and PUT it back.
pub async fn supplier_form_save(arg0: Option<Value>, state: &AppState) -> Result<Value, String> {
    let payload = arg0.ok_or("Missing supplier form payload")?;
    let parsed: SupplierFormSavePayload = serde_json::from_value(payload)
        .map_err(|e| format!("Invalid supplier form payload: {e}"))?;
    let supplier = form_supplier(state, parsed.supplier)?;
    let base = state
        .configs
        .get_supplier_config(&supplier)
        .await
        .map_err(|e| e.to_string())?;
    let document = parsed.form.apply_to(&base);
    let saved = state
        .configs
        .put_supplier_config(&supplier, &document)
        .await
        .map_err(|e| e.to_string())?;
    info!(supplier = %supplier, "supplier form saved");
    state.events.emit(
        "config_saved",
        json!({ "target": ConfigTarget::Supplier(supplier.clone()) }),
    );
    Ok(json!({
        "supplier": supplier,
        "form": SupplierFlatForm::from_nested(&saved),
        "document": saved,
    }))
}

#[cfg(test)]
mod dto_tests {
    use super::*;

    #[test]
    fn parse_config_target_from_string_and_object() {
        assert_eq!(
            parse_config_load_payload(Some(json!("console"))).unwrap(),
            ConfigTarget::Console
        );
        assert_eq!(
            parse_config_load_payload(Some(json!("supplier:paul-lange"))).unwrap(),
            ConfigTarget::Supplier("paul-lange".into())
        );
        assert_eq!(
            parse_config_load_payload(Some(json!({ "target": "shop", "shop": "biketrek" })))
                .unwrap(),
            ConfigTarget::Shop("biketrek".into())
        );
        assert!(parse_config_load_payload(Some(json!("shop"))).is_err());
    }

    #[test]
    fn parse_set_field_and_raw() {
        let field = parse_config_set_field_payload(Some(json!({
            "pointer": " /invoices/layout ",
            "value": "flat"
        })))
        .unwrap();
        assert_eq!(field.path, "/invoices/layout");
        assert_eq!(field.value, json!("flat"));
        assert!(parse_config_set_field_payload(Some(json!({ "path": " " }))).is_err());

        assert_eq!(parse_config_raw_payload(Some(json!("{}"))).unwrap(), "{}");
        assert_eq!(
            parse_config_raw_payload(Some(json!({ "raw": "{\"a\":1}" }))).unwrap(),
            "{\"a\":1}"
        );
        assert!(parse_config_raw_payload(None).is_err());
    }

    #[test]
    fn supplier_form_payload_accepts_partial_form() {
        let parsed: SupplierFormSavePayload = serde_json::from_value(json!({
            "supplierCode": "paul-lange",
            "form": { "feed_url": "https://example.invalid/feed.xml" }
        }))
        .unwrap();
        assert_eq!(parsed.supplier.as_deref(), Some("paul-lange"));
        assert_eq!(parsed.form.feed_url, "https://example.invalid/feed.xml");
        assert_eq!(parsed.form.months_back_default, None);
    }
}
