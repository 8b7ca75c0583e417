//! Supplier, shop and console configuration documents.
//!
//! Documents stay untyped: the editors work on arbitrary JSON and the server
//! normalises whatever it receives.

use reqwest::Method;
use serde_json::Value;

use crate::api::{segment, ApiGateway};
use crate::error::ApiError;

pub const CONSOLE_CONFIG_PATH: &str = "/configs/console";

pub fn supplier_config_path(supplier: &str) -> String {
    format!("/suppliers/{}/config", segment(supplier))
}

pub fn shop_config_path(shop: &str) -> String {
    format!("/shops/{}/config", segment(shop))
}

#[derive(Debug, Clone)]
pub struct ConfigClient {
    api: ApiGateway,
}

impl ConfigClient {
    pub fn new(api: ApiGateway) -> Self {
        Self { api }
    }

    pub async fn get_supplier_config(&self, supplier: &str) -> Result<Value, ApiError> {
        self.api.get_value(&supplier_config_path(supplier)).await
    }

    pub async fn put_supplier_config(
        &self,
        supplier: &str,
        config: &Value,
    ) -> Result<Value, ApiError> {
        self.api
            .request(Method::PUT, &supplier_config_path(supplier), Some(config), &[])
            .await
    }

    pub async fn get_shop_config(&self, shop: &str) -> Result<Value, ApiError> {
        self.api.get_value(&shop_config_path(shop)).await
    }

    pub async fn put_shop_config(&self, shop: &str, config: &Value) -> Result<Value, ApiError> {
        self.api
            .request(Method::PUT, &shop_config_path(shop), Some(config), &[])
            .await
    }

    pub async fn get_console_config(&self) -> Result<Value, ApiError> {
        self.api.get_value(CONSOLE_CONFIG_PATH).await
    }

    pub async fn save_console_config(&self, config: &Value) -> Result<Value, ApiError> {
        self.api
            .request(Method::POST, CONSOLE_CONFIG_PATH, Some(config), &[])
            .await
    }
}
