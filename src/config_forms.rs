//! Configuration editors for supplier, shop and console documents.
//!
//! [`ConfigEditor`] keeps the loaded document and the working copy side by
//! side so the structured view and the raw JSON view edit the same value.
//! [`SupplierFlatForm`] is the plain form over the canonical supplier shape.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info};

use crate::clients::ConfigClient;
use crate::error::ApiError;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigEditError {
    #[error("Invalid field path: {0}")]
    InvalidPath(String),

    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Configuration root must be a JSON object")]
    NotAnObject,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "code", rename_all = "snake_case")]
pub enum ConfigTarget {
    Supplier(String),
    Shop(String),
    Console,
}

impl ConfigTarget {
    /// Parse `("supplier", "paul-lange")`, `("shop", "biketrek")` or `("console", _)`.
    pub fn parse(kind: &str, code: Option<&str>) -> Result<Self, String> {
        let code = code.map(str::trim).filter(|c| !c.is_empty());
        match kind.trim().to_ascii_lowercase().as_str() {
            "supplier" | "suppliers" => code
                .map(|c| ConfigTarget::Supplier(c.to_string()))
                .ok_or_else(|| "Missing supplier code".to_string()),
            "shop" | "shops" => code
                .map(|c| ConfigTarget::Shop(c.to_string()))
                .ok_or_else(|| "Missing shop code".to_string()),
            "console" => Ok(ConfigTarget::Console),
            other => Err(format!("Unknown config target: {other}")),
        }
    }

    pub fn label(&self) -> String {
        match self {
            ConfigTarget::Supplier(code) => format!("supplier:{code}"),
            ConfigTarget::Shop(code) => format!("shop:{code}"),
            ConfigTarget::Console => "console".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

/// Split `/a/b~1c` (JSON pointer) or `a.b` (dotted) into path tokens.
fn path_tokens(path: &str) -> Result<Vec<String>, ConfigEditError> {
    let path = path.trim();
    let tokens: Vec<String> = if let Some(pointer) = path.strip_prefix('/') {
        pointer
            .split('/')
            .map(|t| t.replace("~1", "/").replace("~0", "~"))
            .collect()
    } else {
        path.split('.').map(str::to_string).collect()
    };
    if tokens.is_empty() || tokens.iter().any(|t| t.is_empty()) {
        return Err(ConfigEditError::InvalidPath(path.to_string()));
    }
    Ok(tokens)
}

fn get_path<'a>(root: &'a Value, tokens: &[&str]) -> Option<&'a Value> {
    tokens.iter().try_fold(root, |cur, token| match cur {
        Value::Object(map) => map.get(*token),
        Value::Array(items) => token.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Set `value` at `tokens`, creating intermediate objects. Non-container
/// intermediates are replaced by objects; arrays are only indexed in range.
fn set_path(root: &mut Value, tokens: &[&str], value: Value) -> Result<(), ConfigEditError> {
    let Some((last, parents)) = tokens.split_last() else {
        return Err(ConfigEditError::InvalidPath(String::new()));
    };
    let mut cur = root;
    for token in parents {
        let node = cur;
        cur = match node {
            Value::Array(items) => {
                let index = token
                    .parse::<usize>()
                    .ok()
                    .filter(|i| *i < items.len())
                    .ok_or_else(|| ConfigEditError::InvalidPath(tokens.join("/")))?;
                &mut items[index]
            }
            other => {
                if !other.is_object() {
                    *other = Value::Object(Map::new());
                }
                other
                    .as_object_mut()
                    .ok_or_else(|| ConfigEditError::InvalidPath(tokens.join("/")))?
                    .entry(token.to_string())
                    .or_insert_with(|| Value::Object(Map::new()))
            }
        };
    }
    match cur {
        Value::Array(items) => {
            let index = last
                .parse::<usize>()
                .ok()
                .filter(|i| *i < items.len())
                .ok_or_else(|| ConfigEditError::InvalidPath(tokens.join("/")))?;
            items[index] = value;
        }
        other => {
            if !other.is_object() {
                *other = Value::Object(Map::new());
            }
            if let Some(map) = other.as_object_mut() {
                map.insert(last.to_string(), value);
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Editor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ConfigEditor {
    target: ConfigTarget,
    original: Value,
    document: Value,
}

impl ConfigEditor {
    pub fn from_document(target: ConfigTarget, document: Value) -> Self {
        let document = if document.is_object() {
            document
        } else {
            Value::Object(Map::new())
        };
        Self {
            target,
            original: document.clone(),
            document,
        }
    }

    pub async fn load(client: &ConfigClient, target: ConfigTarget) -> Result<Self, ApiError> {
        let document = match &target {
            ConfigTarget::Supplier(code) => client.get_supplier_config(code).await?,
            ConfigTarget::Shop(code) => client.get_shop_config(code).await?,
            ConfigTarget::Console => client.get_console_config().await?,
        };
        debug!(target = %target.label(), "config loaded");
        Ok(Self::from_document(target, document))
    }

    pub fn target(&self) -> &ConfigTarget {
        &self.target
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    pub fn get_field(&self, path: &str) -> Option<&Value> {
        let tokens = path_tokens(path).ok()?;
        let refs: Vec<&str> = tokens.iter().map(String::as_str).collect();
        get_path(&self.document, &refs)
    }

    pub fn set_field(&mut self, path: &str, value: Value) -> Result<(), ConfigEditError> {
        let tokens = path_tokens(path)?;
        let refs: Vec<&str> = tokens.iter().map(String::as_str).collect();
        let mut next = self.document.clone();
        set_path(&mut next, &refs, value)?;
        self.document = next;
        Ok(())
    }

    pub fn raw_text(&self) -> String {
        serde_json::to_string_pretty(&self.document).unwrap_or_else(|_| "{}".to_string())
    }

    /// Replace the working copy from raw JSON. On error the document is
    /// left untouched.
    pub fn set_raw_text(&mut self, text: &str) -> Result<(), ConfigEditError> {
        let parsed: Value = serde_json::from_str(text)
            .map_err(|e| ConfigEditError::InvalidJson(e.to_string()))?;
        if !parsed.is_object() {
            return Err(ConfigEditError::NotAnObject);
        }
        self.document = parsed;
        Ok(())
    }

    pub fn replace_document(&mut self, document: Value) -> Result<(), ConfigEditError> {
        if !document.is_object() {
            return Err(ConfigEditError::NotAnObject);
        }
        self.document = document;
        Ok(())
    }

    pub fn is_dirty(&self) -> bool {
        self.document != self.original
    }

    pub fn revert(&mut self) {
        self.document = self.original.clone();
    }

    /// Persist the working copy. The server echo (normalised document)
    /// becomes both the new original and the working copy.
    pub async fn save(&mut self, client: &ConfigClient) -> Result<&Value, ApiError> {
        let echo = match &self.target {
            ConfigTarget::Supplier(code) => client.put_supplier_config(code, &self.document).await?,
            ConfigTarget::Shop(code) => client.put_shop_config(code, &self.document).await?,
            ConfigTarget::Console => client.save_console_config(&self.document).await?,
        };
        self.mark_saved(echo);
        info!(target = %self.target.label(), "config saved");
        Ok(&self.document)
    }

    fn mark_saved(&mut self, echo: Value) {
        if echo.is_object() {
            self.document = echo;
        }
        self.original = self.document.clone();
    }
}

// ---------------------------------------------------------------------------
// Supplier flat form
// ---------------------------------------------------------------------------

const PRODUCTS: &[&str] = &["feeds", "sources", "products"];
const LOGIN: &[&str] = &["invoices", "download", "web", "login"];

const LOGIN_STRING_KEYS: &[&str] = &[
    "mode",
    "login_url",
    "user_field",
    "pass_field",
    "username",
    "password",
    "cookie",
    "basic_user",
    "basic_pass",
    "token",
    "header_name",
];

/// Top-level keys of older supplier documents that the form migrates into
/// the nested shape on save.
const LEGACY_KEYS: &[&str] = &[
    "feed_url",
    "feed_current_key",
    "layout",
    "default_months_window",
    "invoice_download_strategy",
    "product_code_prefix",
    "price_coefficients",
    "mode",
    "login_url",
    "user_field",
    "pass_field",
    "username",
    "password",
    "cookie",
    "insecure_all",
    "basic_user",
    "basic_pass",
    "token",
    "header_name",
];

fn joined<'a>(prefix: &[&'a str], rest: &[&'a str]) -> Vec<&'a str> {
    prefix.iter().chain(rest.iter()).copied().collect()
}

fn str_at(doc: &Value, tokens: &[&str]) -> Option<String> {
    match get_path(doc, tokens)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Plain view of the nested supplier configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupplierFlatForm {
    pub feed_current_key: String,
    pub feed_mode: String,
    pub feed_local_path: String,
    pub feed_url: String,
    pub feed_method: String,
    pub feed_auth_mode: String,
    pub layout: String,
    pub months_back_default: Option<i64>,
    pub download_strategy: String,
    pub web_base_url: String,
    pub web_notes: String,
    pub login_mode: String,
    pub login_url: String,
    pub user_field: String,
    pub pass_field: String,
    pub username: String,
    pub password: String,
    pub cookie: String,
    pub insecure_all: Option<bool>,
    pub basic_user: String,
    pub basic_pass: String,
    pub token: String,
    pub header_name: String,
    pub product_code_prefix: String,
    pub price_coefficients: Map<String, Value>,
}

impl SupplierFlatForm {
    pub fn from_nested(doc: &Value) -> Self {
        let nested_or_legacy = |tokens: &[&str], legacy: &str| -> String {
            str_at(doc, tokens)
                .filter(|s| !s.is_empty())
                .or_else(|| str_at(doc, &[legacy]))
                .unwrap_or_default()
        };
        let login = |key: &str| -> String {
            str_at(doc, &joined(LOGIN, &[key]))
                .filter(|s| !s.is_empty())
                .or_else(|| str_at(doc, &[key]))
                .unwrap_or_default()
        };

        Self {
            feed_current_key: nested_or_legacy(&["feeds", "current_key"], "feed_current_key"),
            feed_mode: str_at(doc, &joined(PRODUCTS, &["mode"])).unwrap_or_default(),
            feed_local_path: str_at(doc, &joined(PRODUCTS, &["local_path"])).unwrap_or_default(),
            feed_url: nested_or_legacy(&joined(PRODUCTS, &["remote", "url"]), "feed_url"),
            feed_method: str_at(doc, &joined(PRODUCTS, &["remote", "method"])).unwrap_or_default(),
            feed_auth_mode: str_at(doc, &joined(PRODUCTS, &["remote", "auth", "mode"]))
                .unwrap_or_default(),
            layout: nested_or_legacy(&["invoices", "layout"], "layout"),
            months_back_default: get_path(doc, &["invoices", "months_back_default"])
                .or_else(|| doc.get("default_months_window"))
                .and_then(Value::as_i64),
            download_strategy: nested_or_legacy(
                &["invoices", "download", "strategy"],
                "invoice_download_strategy",
            ),
            web_base_url: str_at(doc, &["invoices", "download", "web", "base_url"])
                .unwrap_or_default(),
            web_notes: str_at(doc, &["invoices", "download", "web", "notes"]).unwrap_or_default(),
            login_mode: login("mode"),
            login_url: login("login_url"),
            user_field: login("user_field"),
            pass_field: login("pass_field"),
            username: login("username"),
            password: login("password"),
            cookie: login("cookie"),
            insecure_all: get_path(doc, &joined(LOGIN, &["insecure_all"]))
                .or_else(|| doc.get("insecure_all"))
                .and_then(Value::as_bool),
            basic_user: login("basic_user"),
            basic_pass: login("basic_pass"),
            token: login("token"),
            header_name: login("header_name"),
            product_code_prefix: nested_or_legacy(
                &["adapter_settings", "product_code_prefix"],
                "product_code_prefix",
            ),
            price_coefficients: get_path(doc, &["adapter_settings", "price_coefficients"])
                .or_else(|| doc.get("price_coefficients"))
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
        }
    }

    fn login_value(&self, key: &str) -> &str {
        match key {
            "mode" => &self.login_mode,
            "login_url" => &self.login_url,
            "user_field" => &self.user_field,
            "pass_field" => &self.pass_field,
            "username" => &self.username,
            "password" => &self.password,
            "cookie" => &self.cookie,
            "basic_user" => &self.basic_user,
            "basic_pass" => &self.basic_pass,
            "token" => &self.token,
            "header_name" => &self.header_name,
            _ => "",
        }
    }

    /// Write the form back into `base`. Keys the form does not cover are
    /// kept; covered legacy top-level keys are dropped.
    pub fn apply_to(&self, base: &Value) -> Value {
        let mut out = match base {
            Value::Object(map) => Value::Object(map.clone()),
            _ => Value::Object(Map::new()),
        };

        put_str(&mut out, &["feeds", "current_key"], &self.feed_current_key);
        put_str(&mut out, &joined(PRODUCTS, &["mode"]), &self.feed_mode);
        put_str(&mut out, &joined(PRODUCTS, &["local_path"]), &self.feed_local_path);
        put_str(&mut out, &joined(PRODUCTS, &["remote", "url"]), &self.feed_url);
        put_str(&mut out, &joined(PRODUCTS, &["remote", "method"]), &self.feed_method);
        put_str(
            &mut out,
            &joined(PRODUCTS, &["remote", "auth", "mode"]),
            &self.feed_auth_mode,
        );
        put_str(&mut out, &["invoices", "layout"], &self.layout);
        if let Some(months) = self.months_back_default {
            put(&mut out, &["invoices", "months_back_default"], Value::from(months));
        }
        put_str(&mut out, &["invoices", "download", "strategy"], &self.download_strategy);
        put_str(&mut out, &["invoices", "download", "web", "base_url"], &self.web_base_url);
        put_str(&mut out, &["invoices", "download", "web", "notes"], &self.web_notes);
        for key in LOGIN_STRING_KEYS {
            put_str(&mut out, &joined(LOGIN, &[key]), self.login_value(key));
        }
        if let Some(insecure) = self.insecure_all {
            put(&mut out, &joined(LOGIN, &["insecure_all"]), Value::Bool(insecure));
        }
        put_str(
            &mut out,
            &["adapter_settings", "product_code_prefix"],
            &self.product_code_prefix,
        );
        let coefficients = ["adapter_settings", "price_coefficients"];
        if !self.price_coefficients.is_empty() || get_path(&out, &coefficients).is_some() {
            put(
                &mut out,
                &coefficients,
                Value::Object(self.price_coefficients.clone()),
            );
        }

        if let Some(map) = out.as_object_mut() {
            for key in LEGACY_KEYS {
                map.remove(*key);
            }
        }
        out
    }
}

/// Write `value` at an object path. Any node on the way that is not an
/// object (`"feeds": []`, a stray string) is replaced by one, so the edit
/// always lands.
fn put(doc: &mut Value, tokens: &[&str], value: Value) {
    let Some((first, rest)) = tokens.split_first() else {
        return;
    };
    if !doc.is_object() {
        *doc = Value::Object(Map::new());
    }
    if let Value::Object(map) = doc {
        if rest.is_empty() {
            map.insert(first.to_string(), value);
        } else {
            let child = map.entry(first.to_string()).or_insert(Value::Null);
            put(child, rest, value);
        }
    }
}

/// Empty strings only overwrite an existing non-empty string, so untouched
/// absent or null fields stay as they were.
fn put_str(doc: &mut Value, tokens: &[&str], value: &str) {
    if value.is_empty() {
        match get_path(doc, tokens) {
            Some(Value::String(current)) if !current.is_empty() => {}
            _ => return,
        }
    }
    put(doc, tokens, Value::String(value.to_string()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn canonical() -> Value {
        json!({
            "feeds": {
                "current_key": "products",
                "sources": {
                    "products": {
                        "mode": "remote",
                        "local_path": null,
                        "remote": {
                            "url": "https://vo.paul-lange-oslany.sk/feed.xml",
                            "method": "GET",
                            "headers": {},
                            "params": {},
                            "auth": { "mode": "none" }
                        }
                    },
                    "stock": { "mode": "remote", "local_path": null }
                }
            },
            "invoices": {
                "layout": "flat",
                "months_back_default": 3,
                "download": {
                    "strategy": "paul-lange-web",
                    "web": {
                        "login": {
                            "mode": "form",
                            "login_url": "https://vo.paul-lange-oslany.sk/index.php?cmd=default&id=login",
                            "user_field": "login",
                            "pass_field": "password",
                            "username": "biketrek",
                            "password": "secret"
                        },
                        "base_url": "",
                        "notes": ""
                    }
                }
            },
            "adapter_settings": {
                "product_code_prefix": "PL-",
                "price_coefficients": { "retail": 1.35 }
            },
            "custom": { "kept": true }
        })
    }

    #[test]
    fn nested_flat_nested_is_identity() {
        let doc = canonical();
        let form = SupplierFlatForm::from_nested(&doc);
        assert_eq!(form.feed_url, "https://vo.paul-lange-oslany.sk/feed.xml");
        assert_eq!(form.login_mode, "form");
        assert_eq!(form.months_back_default, Some(3));
        assert_eq!(form.product_code_prefix, "PL-");
        assert_eq!(form.apply_to(&doc), doc);
    }

    #[test]
    fn apply_to_writes_edits_and_preserves_unknown_keys() {
        let doc = canonical();
        let mut form = SupplierFlatForm::from_nested(&doc);
        form.feed_url = "https://example.invalid/new.xml".into();
        form.months_back_default = Some(6);
        form.token = "abc".into();
        form.password.clear();

        let out = form.apply_to(&doc);
        assert_eq!(
            out["feeds"]["sources"]["products"]["remote"]["url"],
            "https://example.invalid/new.xml"
        );
        assert_eq!(out["invoices"]["months_back_default"], 6);
        assert_eq!(out["invoices"]["download"]["web"]["login"]["token"], "abc");
        assert_eq!(out["invoices"]["download"]["web"]["login"]["password"], "");
        assert_eq!(out["custom"]["kept"], true);
        assert!(out["feeds"]["sources"]["stock"].is_object());
        assert!(out["feeds"]["sources"]["products"]["local_path"].is_null());
    }

    #[test]
    fn legacy_flat_keys_are_read_and_migrated() {
        let legacy = json!({
            "feed_url": "https://legacy.invalid/feed.xml",
            "layout": "by-month",
            "default_months_window": 4,
            "invoice_download_strategy": "manual",
            "username": "shop",
            "product_code_prefix": "NF-",
            "notes": "free text"
        });
        let form = SupplierFlatForm::from_nested(&legacy);
        assert_eq!(form.feed_url, "https://legacy.invalid/feed.xml");
        assert_eq!(form.layout, "by-month");
        assert_eq!(form.months_back_default, Some(4));
        assert_eq!(form.username, "shop");

        let out = form.apply_to(&legacy);
        assert!(out.get("feed_url").is_none());
        assert!(out.get("username").is_none());
        assert_eq!(out["notes"], "free text");
        assert_eq!(out["invoices"]["download"]["strategy"], "manual");
        assert_eq!(out["adapter_settings"]["product_code_prefix"], "NF-");
    }

    #[test]
    fn editor_set_field_creates_intermediate_objects() {
        let mut editor = ConfigEditor::from_document(ConfigTarget::Console, json!({ "theme": "dark" }));
        assert!(!editor.is_dirty());
        editor
            .set_field("/receiving/scan~1gun/beep", json!(true))
            .unwrap();
        editor.set_field("api.timeout", json!(30)).unwrap();
        assert_eq!(editor.document()["receiving"]["scan/gun"]["beep"], true);
        assert_eq!(editor.get_field("api.timeout"), Some(&json!(30)));
        assert!(editor.is_dirty());
        editor.revert();
        assert!(!editor.is_dirty());
    }

    #[test]
    fn editor_rejects_bad_paths_and_out_of_range_indexes() {
        let mut editor = ConfigEditor::from_document(
            ConfigTarget::Shop("biketrek".into()),
            json!({ "columns": ["a", "b"] }),
        );
        assert!(editor.set_field("", json!(1)).is_err());
        assert!(editor.set_field("a..b", json!(1)).is_err());
        assert!(editor.set_field("/columns/5", json!("x")).is_err());
        editor.set_field("/columns/1", json!("z")).unwrap();
        assert_eq!(editor.document()["columns"], json!(["a", "z"]));
    }

    #[test]
    fn raw_text_round_trip_and_rejection() {
        let mut editor =
            ConfigEditor::from_document(ConfigTarget::Supplier("paul-lange".into()), canonical());
        let before = editor.document().clone();
        assert!(matches!(
            editor.set_raw_text("{ not json"),
            Err(ConfigEditError::InvalidJson(_))
        ));
        assert_eq!(editor.set_raw_text("[1, 2]"), Err(ConfigEditError::NotAnObject));
        assert_eq!(editor.document(), &before);

        let text = editor.raw_text();
        editor.set_raw_text(&text).unwrap();
        assert!(!editor.is_dirty());
    }

    #[test]
    fn saved_echo_becomes_new_baseline() {
        let mut editor = ConfigEditor::from_document(ConfigTarget::Console, json!({}));
        editor.set_field("language", json!("sk")).unwrap();
        editor.mark_saved(json!({ "language": "sk", "version": 2 }));
        assert!(!editor.is_dirty());
        assert_eq!(editor.document()["version"], 2);

        editor.set_field("language", json!("en")).unwrap();
        editor.mark_saved(Value::Null);
        assert!(!editor.is_dirty());
        assert_eq!(editor.document()["language"], "en");
    }

    #[test]
    fn target_parsing() {
        assert_eq!(
            ConfigTarget::parse("supplier", Some(" paul-lange ")).unwrap(),
            ConfigTarget::Supplier("paul-lange".into())
        );
        assert_eq!(ConfigTarget::parse("console", None).unwrap(), ConfigTarget::Console);
        assert!(ConfigTarget::parse("shop", Some("")).is_err());
        assert!(ConfigTarget::parse("printer", None).is_err());
    }

    #[test]
    fn apply_to_replaces_misshapen_containers() {
        let base = json!({
            "feeds": [],
            "invoices": { "layout": "flat", "download": "paul-lange-web" },
            "custom": [1, 2]
        });
        let mut form = SupplierFlatForm::from_nested(&base);
        form.feed_url = "https://example.invalid/feed.xml".into();
        form.download_strategy = "manual".into();
        form.months_back_default = Some(2);

        let out = form.apply_to(&base);
        assert_eq!(
            get_path(&out, &["feeds", "sources", "products", "remote", "url"]),
            Some(&json!("https://example.invalid/feed.xml"))
        );
        assert_eq!(out["invoices"]["download"]["strategy"], "manual");
        assert_eq!(out["invoices"]["layout"], "flat");
        assert_eq!(out["invoices"]["months_back_default"], 2);
        assert_eq!(out["custom"], json!([1, 2]));
    }
}
