use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::{build_query, ApiGateway};
use crate::error::ApiError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthStatus {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub database: Option<Value>,
}

impl HealthStatus {
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecentLogs {
    #[serde(default)]
    pub items: Vec<Value>,
}

#[derive(Debug, Clone)]
pub struct DashboardClient {
    api: ApiGateway,
}

impl DashboardClient {
    pub fn new(api: ApiGateway) -> Self {
        Self { api }
    }

    pub async fn health(&self) -> Result<HealthStatus, ApiError> {
        self.api.get_json("/health").await
    }

    pub async fn invoice_stats(
        &self,
        date_from: Option<&str>,
        date_to: Option<&str>,
    ) -> Result<Value, ApiError> {
        let path = build_query(
            "/invoices/stats",
            &[
                ("date_from", date_from.map(str::to_string)),
                ("date_to", date_to.map(str::to_string)),
            ],
        );
        self.api.get_value(&path).await
    }

    pub async fn recent_logs(
        &self,
        limit: u32,
        supplier: Option<&str>,
    ) -> Result<RecentLogs, ApiError> {
        let path = build_query(
            "/logs/recent",
            &[
                ("limit", Some(limit.to_string())),
                ("supplier", supplier.map(str::to_string)),
            ],
        );
        self.api.get_json(&path).await
    }
}
