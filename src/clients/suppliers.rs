use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::{build_query, segment, ApiGateway};
use crate::error::ApiError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SupplierInfo {
    #[serde(default)]
    pub supplier_code: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub adapter: String,
    #[serde(default)]
    pub base_path: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SupplierFiles {
    #[serde(default)]
    pub files: Vec<Value>,
}

#[derive(Debug, Clone)]
pub struct SuppliersClient {
    api: ApiGateway,
}

impl SuppliersClient {
    pub fn new(api: ApiGateway) -> Self {
        Self { api }
    }

    pub async fn list_suppliers(&self) -> Result<Vec<SupplierInfo>, ApiError> {
        self.api.get_json("/suppliers").await
    }

    /// Files of one storage area (`invoices_csv`, `feeds_xml`, `logs`, ...).
    pub async fn list_files(
        &self,
        supplier: &str,
        area: &str,
        months_back: Option<u32>,
    ) -> Result<SupplierFiles, ApiError> {
        let path = build_query(
            &format!("/suppliers/{}/files", segment(supplier)),
            &[
                ("area", Some(area.to_string())),
                ("months_back", months_back.map(|m| m.to_string())),
            ],
        );
        self.api.get_json(&path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn supplier_info_tolerates_missing_fields() {
        let info: SupplierInfo = serde_json::from_value(json!({
            "supplier_code": "paul-lange",
            "name": "Paul Lange",
            "config_json": null
        }))
        .unwrap();
        assert_eq!(info.supplier_code, "paul-lange");
        assert!(info.adapter.is_empty());
    }
}
