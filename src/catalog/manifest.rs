use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Raw catalog document as published by the content store.
///
/// Field names follow the wire format (camelCase); items are read-only from
/// this subsystem's perspective and mutated only by the editing workflow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub sections: BTreeMap<String, ManifestSection>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManifestSection {
    /// Section name in the primary language
    #[serde(default)]
    pub ar: String,
    /// Section name in the secondary language
    #[serde(default)]
    pub en: String,
    #[serde(default)]
    pub items: Vec<CatalogItem>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogItem {
    pub id: String,
    #[serde(default)]
    pub ar_name: String,
    #[serde(default)]
    pub en_name: Option<String>,
    /// Free-form display price; may be absent
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub description_ar: Option<String>,
    #[serde(default)]
    pub description_en: Option<String>,
    #[serde(default)]
    pub badge: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
}

impl CatalogItem {
    /// Primary-language description with secondary-language fallback.
    pub fn description(&self) -> &str {
        self.description_ar
            .as_deref()
            .filter(|d| !d.is_empty())
            .or(self.description_en.as_deref())
            .unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wire_format() {
        let raw = r#"{
            "sections": {
                "cold_drinks": {
                    "ar": "مشروبات باردة",
                    "en": "Cold Drinks",
                    "items": [
                        {
                            "id": "iced-latte",
                            "arName": "ايسد لاتيه",
                            "enName": "Iced Latte",
                            "price": "25",
                            "descriptionAr": "حليب بارد مع اسبريسو.",
                            "descriptionEn": "Cold milk with espresso.",
                            "images": ["iced-latte-1.jpg"]
                        }
                    ]
                }
            }
        }"#;

        let manifest: Manifest = serde_json::from_str(raw).unwrap();
        let section = &manifest.sections["cold_drinks"];
        assert_eq!(section.en, "Cold Drinks");
        let item = &section.items[0];
        assert_eq!(item.id, "iced-latte");
        assert_eq!(item.en_name.as_deref(), Some("Iced Latte"));
        assert_eq!(item.description(), "حليب بارد مع اسبريسو.");
    }

    #[test]
    fn description_falls_back_to_secondary_language() {
        let item = CatalogItem {
            id: "espresso".into(),
            description_en: Some("Rich, concentrated coffee shot.".into()),
            ..Default::default()
        };
        assert_eq!(item.description(), "Rich, concentrated coffee shot.");
    }

    #[test]
    fn tolerates_missing_optional_fields() {
        let raw = r#"{"sections":{"sweets":{"items":[{"id":"kunafa","arName":"كنافة"}]}}}"#;
        let manifest: Manifest = serde_json::from_str(raw).unwrap();
        let item = &manifest.sections["sweets"].items[0];
        assert!(item.price.is_none());
        assert!(item.images.is_empty());
    }
}
