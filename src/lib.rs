//! Inventory Hub console backend.
//!
//! Typed clients for the Inventory Hub REST API, the receiving-session
//! workflow and the command surface a UI (webview bridge or the terminal
//! console in `main.rs`) drives. Command names are snake_case and take a
//! loosely-shaped JSON payload, e.g. `receiving_scan("8585000000001")` or
//! `receiving_scan({ "code": "...", "qty": 2 })`.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub mod api;
pub mod clients;
pub mod commands;
pub mod config_forms;
pub mod diagnostics;
pub mod error;
pub mod events;
pub mod invoices_view;
pub mod receiving;
pub mod settings;

use api::ApiGateway;
use clients::{
    ConfigClient, DashboardClient, InvoicesClient, ReceivingApi, ReceivingClient, SuppliersClient,
};
use config_forms::ConfigEditor;
use diagnostics::RequestLog;
use error::ApiError;
use events::EventBus;
use invoices_view::InvoiceTable;
use receiving::ReceivingController;
use settings::Settings;

pub(crate) fn value_str(v: &serde_json::Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(s) = v.get(*key).and_then(|x| x.as_str()) {
            let trimmed = s.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

pub(crate) fn payload_arg0_as_string(
    arg0: Option<serde_json::Value>,
    keys: &[&str],
) -> Option<String> {
    match arg0 {
        Some(serde_json::Value::String(s)) => {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        }
        Some(serde_json::Value::Object(obj)) => {
            let payload = serde_json::Value::Object(obj);
            value_str(&payload, keys)
        }
        _ => None,
    }
}

/// Shared state behind every command.
pub struct AppState {
    pub settings: Settings,
    pub requests: RequestLog,
    pub events: EventBus,
    pub receiving_api: Arc<dyn ReceivingApi>,
    pub receiving_history: ReceivingClient,
    pub suppliers: SuppliersClient,
    pub configs: ConfigClient,
    pub invoices: InvoicesClient,
    pub dashboard: DashboardClient,
    pub receiving: Mutex<Option<Arc<ReceivingController>>>,
    pub config_editor: Mutex<Option<ConfigEditor>>,
    pub invoice_table: Mutex<Option<InvoiceTable>>,
}

impl AppState {
    pub fn new(settings: Settings) -> Result<Self, ApiError> {
        let requests = RequestLog::new(settings.diagnostics.capacity);
        let gateway = ApiGateway::new(&settings, requests.clone())?;
        let receiving_api: Arc<dyn ReceivingApi> = Arc::new(ReceivingClient::new(gateway.clone()));
        Ok(Self::assemble(settings, requests, gateway, receiving_api))
    }

    /// Same as [`AppState::new`] but drives receiving through `receiving_api`.
    pub fn with_receiving_api(
        settings: Settings,
        receiving_api: Arc<dyn ReceivingApi>,
    ) -> Result<Self, ApiError> {
        let requests = RequestLog::new(settings.diagnostics.capacity);
        let gateway = ApiGateway::new(&settings, requests.clone())?;
        Ok(Self::assemble(settings, requests, gateway, receiving_api))
    }

    fn assemble(
        settings: Settings,
        requests: RequestLog,
        gateway: ApiGateway,
        receiving_api: Arc<dyn ReceivingApi>,
    ) -> Self {
        Self {
            receiving_history: ReceivingClient::new(gateway.clone()),
            suppliers: SuppliersClient::new(gateway.clone()),
            configs: ConfigClient::new(gateway.clone()),
            invoices: InvoicesClient::new(gateway.clone()),
            dashboard: DashboardClient::new(gateway),
            settings,
            requests,
            events: EventBus::new(),
            receiving_api,
            receiving: Mutex::new(None),
            config_editor: Mutex::new(None),
            invoice_table: Mutex::new(None),
        }
    }

    /// The open receiving session, if any.
    pub async fn receiving(&self) -> Result<Arc<ReceivingController>, String> {
        self.receiving
            .lock()
            .await
            .clone()
            .ok_or_else(|| error::ReceivingError::NoSession.to_string())
    }

    /// Install `controller` as the open session, shutting down the previous one.
    pub async fn replace_receiving(&self, controller: Option<ReceivingController>) {
        let previous = {
            let mut slot = self.receiving.lock().await;
            std::mem::replace(&mut *slot, controller.map(Arc::new))
        };
        if let Some(previous) = previous {
            match Arc::try_unwrap(previous) {
                Ok(previous) => previous.shutdown().await,
                Err(_) => info!("previous receiving session still referenced; dropping"),
            }
        }
    }

    pub fn default_supplier(&self) -> Option<String> {
        self.settings
            .console
            .default_supplier
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    pub fn default_shop(&self) -> Option<String> {
        self.settings
            .console
            .default_shop
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }
}

/// Console + daily rolling file logging. The returned guard flushes the
/// file writer when dropped, so keep it alive until exit.
pub fn init_logging(settings: &Settings) -> WorkerGuard {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{},inventory_hub_console=debug", settings.logging.level))
    });

    let log_dir = diagnostics::log_dir(settings);
    diagnostics::prune_old_logs(&log_dir);
    std::fs::create_dir_all(&log_dir).ok();

    let file_appender = tracing_appender::rolling::daily(&log_dir, diagnostics::LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = if settings.logging.json {
        fmt::layer()
            .json()
            .with_writer(non_blocking)
            .with_target(true)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed()
    };
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();

    info!(
        "Starting Inventory Hub console v{} (logs in {})",
        env!("CARGO_PKG_VERSION"),
        log_dir.display()
    );
    guard
}
