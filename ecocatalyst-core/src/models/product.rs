use std::fmt;

use serde::{Deserialize, Serialize};

use super::footprint::Location;
use crate::cache::{Entity, Frozen};

/// Catalogue product. Products are shared by every user and read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub barcode: String,
    pub name: String,
    #[serde(default)]
    pub brand: String,
    #[serde(default)]
    pub category: String,
    /// 0-100
    #[serde(default)]
    pub sustainability_score: f64,
    /// kg CO2e
    #[serde(default)]
    pub carbon_footprint: f64,
    /// liters
    #[serde(default)]
    pub water_usage: f64,
    #[serde(default)]
    pub recyclable: bool,
    #[serde(default)]
    pub biodegradable: bool,
    #[serde(default)]
    pub packaging: String,
    #[serde(default)]
    pub ingredients: Vec<String>,
    #[serde(default)]
    pub certifications: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}

impl fmt::Display for Product {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.brand.is_empty() {
            write!(f, "{} ({})", self.name, self.barcode)
        } else {
            write!(f, "{} by {} ({})", self.name, self.brand, self.barcode)
        }
    }
}

impl Entity for Product {
    const KIND: &'static str = "Product";
    type Patch = Frozen;

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductScan {
    pub id: String,
    pub product_id: String,
    pub user_id: String,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

impl Entity for ProductScan {
    const KIND: &'static str = "Product scan";
    type Patch = Frozen;

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn owner_id(&self) -> Option<&str> {
        Some(&self.user_id)
    }
}

/// A more sustainable replacement, stored under `alternatives/<productId>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlternativeProduct {
    pub id: String,
    pub original_product_id: String,
    pub alternative_product_id: String,
    /// Percentage improvement
    #[serde(default)]
    pub sustainability_improvement: f64,
    #[serde(default)]
    pub reason: String,
}

impl Entity for AlternativeProduct {
    const KIND: &'static str = "Alternative product";
    type Patch = Frozen;

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_product_defaults_missing_fields() {
        let product: Product = serde_json::from_value(json!({
            "id": "p1",
            "barcode": "0123456789012",
            "name": "Bamboo Toothbrush",
            "sustainabilityScore": 88
        }))
        .unwrap();
        assert_eq!(product.sustainability_score, 88.0);
        assert!(product.ingredients.is_empty());
        assert_eq!(product.to_string(), "Bamboo Toothbrush (0123456789012)");
    }

    #[test]
    fn test_scan_owner() {
        let scan = ProductScan {
            id: "s1".into(),
            product_id: "p1".into(),
            user_id: "anonymous".into(),
            timestamp: 1,
            location: None,
        };
        assert_eq!(scan.owner_id(), Some("anonymous"));
        let value = serde_json::to_value(&scan).unwrap();
        assert_eq!(value["productId"], "p1");
    }
}
