use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use super::manifest::Manifest;

/// Size bounds applied when compacting the catalog into a digest.
#[derive(Debug, Clone, Copy)]
pub struct DigestLimits {
    pub max_items_per_section: usize,
    pub description_chars: usize,
}

impl Default for DigestLimits {
    fn default() -> Self {
        Self {
            max_items_per_section: 200,
            description_chars: 120,
        }
    }
}

/// Compacted, size-bounded projection of the catalog, built for inclusion in
/// model prompts and used as the grounding reference by the output validator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogDigest {
    pub sections: BTreeMap<String, DigestSection>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DigestSection {
    pub ar: String,
    pub en: String,
    pub items: Vec<DigestItem>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DigestItem {
    pub id: String,
    pub ar_name: String,
    pub price: String,
    pub desc: String,
    pub badge: String,
    pub images: Vec<String>,
}

impl CatalogDigest {
    pub fn from_manifest(manifest: &Manifest, limits: DigestLimits) -> Self {
        let mut sections = BTreeMap::new();
        for (key, section) in &manifest.sections {
            let items = section
                .items
                .iter()
                .take(limits.max_items_per_section)
                .map(|item| DigestItem {
                    id: item.id.clone(),
                    ar_name: item.ar_name.clone(),
                    price: item.price.clone().unwrap_or_default(),
                    desc: truncate_chars(item.description(), limits.description_chars),
                    badge: item.badge.clone().unwrap_or_default(),
                    images: item.images.clone(),
                })
                .collect();
            sections.insert(
                key.clone(),
                DigestSection {
                    ar: if section.ar.is_empty() {
                        key.clone()
                    } else {
                        section.ar.clone()
                    },
                    en: if section.en.is_empty() {
                        key.clone()
                    } else {
                        section.en.clone()
                    },
                    items,
                },
            );
        }
        Self { sections }
    }

    pub fn is_empty(&self) -> bool {
        self.sections.values().all(|s| s.items.is_empty())
    }

    pub fn item_count(&self) -> usize {
        self.sections.values().map(|s| s.items.len()).sum()
    }

    /// Looks up an item by section key and identifier.
    pub fn lookup(&self, section: &str, id: &str) -> Option<&DigestItem> {
        self.sections
            .get(section)
            .and_then(|s| s.items.iter().find(|item| item.id == id))
    }

    /// Searches all sections for an identifier, returning the owning section
    /// key alongside the item. Used when model output omits or misstates the
    /// section.
    pub fn find_item(&self, id: &str) -> Option<(&str, &DigestItem)> {
        self.sections.iter().find_map(|(key, section)| {
            section
                .items
                .iter()
                .find(|item| item.id == id)
                .map(|item| (key.as_str(), item))
        })
    }

    /// Finds an item whose display name matches (case-insensitive, trimmed).
    pub fn find_by_name(&self, name: &str) -> Option<(&str, &DigestItem)> {
        let needle = name.trim();
        self.sections.iter().find_map(|(key, section)| {
            section
                .items
                .iter()
                .find(|item| item.ar_name.eq_ignore_ascii_case(needle) || item.ar_name == needle)
                .map(|item| (key.as_str(), item))
        })
    }

    /// Projection for prompt inclusion: optionally keep only the given
    /// section keys, and always drop items already suggested this session.
    pub fn excerpt(
        &self,
        section_keys: Option<&[&str]>,
        exclude_names: &HashSet<String>,
    ) -> CatalogDigest {
        let mut sections = BTreeMap::new();
        for (key, section) in &self.sections {
            if let Some(keys) = section_keys {
                if !keys.contains(&key.as_str()) {
                    continue;
                }
            }
            let items: Vec<DigestItem> = section
                .items
                .iter()
                .filter(|item| !exclude_names.contains(&item.ar_name))
                .cloned()
                .collect();
            if !items.is_empty() {
                sections.insert(
                    key.clone(),
                    DigestSection {
                        ar: section.ar.clone(),
                        en: section.en.clone(),
                        items,
                    },
                );
            }
        }
        CatalogDigest { sections }
    }
}

fn truncate_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::manifest::{CatalogItem, ManifestSection};

    fn sample_manifest() -> Manifest {
        let mut manifest = Manifest::default();
        manifest.sections.insert(
            "cold_drinks".into(),
            ManifestSection {
                ar: "مشروبات باردة".into(),
                en: "Cold Drinks".into(),
                items: vec![
                    CatalogItem {
                        id: "iced-latte".into(),
                        ar_name: "ايسد لاتيه".into(),
                        price: Some("25".into()),
                        description_ar: Some("حليب بارد مع اسبريسو ومكعبات ثلج.".into()),
                        ..Default::default()
                    },
                    CatalogItem {
                        id: "cold-brew".into(),
                        ar_name: "كولد برو".into(),
                        description_en: Some("Slow-steeped cold coffee.".into()),
                        ..Default::default()
                    },
                ],
            },
        );
        manifest.sections.insert(
            "hot_drinks".into(),
            ManifestSection {
                en: "Hot Drinks".into(),
                items: vec![CatalogItem {
                    id: "cappuccino".into(),
                    ar_name: "كابتشينو".into(),
                    ..Default::default()
                }],
                ..Default::default()
            },
        );
        manifest
    }

    #[test]
    fn caps_items_per_section() {
        let mut manifest = Manifest::default();
        let items = (0..10)
            .map(|i| CatalogItem {
                id: format!("item-{}", i),
                ar_name: format!("صنف {}", i),
                ..Default::default()
            })
            .collect();
        manifest.sections.insert(
            "sweets".into(),
            ManifestSection {
                items,
                ..Default::default()
            },
        );

        let digest = CatalogDigest::from_manifest(
            &manifest,
            DigestLimits {
                max_items_per_section: 3,
                description_chars: 120,
            },
        );
        assert_eq!(digest.sections["sweets"].items.len(), 3);
    }

    #[test]
    fn truncates_descriptions_on_char_boundaries() {
        let mut manifest = Manifest::default();
        manifest.sections.insert(
            "sweets".into(),
            ManifestSection {
                items: vec![CatalogItem {
                    id: "kunafa".into(),
                    ar_name: "كنافة".into(),
                    description_ar: Some("شعيرية كنافة مع جبنة أو قشطة وسكر مذوب".into()),
                    ..Default::default()
                }],
                ..Default::default()
            },
        );

        let digest = CatalogDigest::from_manifest(
            &manifest,
            DigestLimits {
                max_items_per_section: 200,
                description_chars: 10,
            },
        );
        let desc = &digest.sections["sweets"].items[0].desc;
        assert_eq!(desc.chars().count(), 10);
    }

    #[test]
    fn lookup_and_cross_section_search() {
        let digest = CatalogDigest::from_manifest(&sample_manifest(), DigestLimits::default());

        assert!(digest.lookup("cold_drinks", "iced-latte").is_some());
        assert!(digest.lookup("hot_drinks", "iced-latte").is_none());

        let (section, item) = digest.find_item("cappuccino").unwrap();
        assert_eq!(section, "hot_drinks");
        assert_eq!(item.ar_name, "كابتشينو");
    }

    #[test]
    fn excerpt_filters_sections_and_excludes_suggested() {
        let digest = CatalogDigest::from_manifest(&sample_manifest(), DigestLimits::default());
        let mut exclude = HashSet::new();
        exclude.insert("ايسد لاتيه".to_string());

        let excerpt = digest.excerpt(Some(&["cold_drinks"]), &exclude);
        assert!(!excerpt.sections.contains_key("hot_drinks"));
        let cold = &excerpt.sections["cold_drinks"];
        assert_eq!(cold.items.len(), 1);
        assert_eq!(cold.items[0].id, "cold-brew");
    }

    #[test]
    fn missing_price_becomes_empty_string() {
        let digest = CatalogDigest::from_manifest(&sample_manifest(), DigestLimits::default());
        assert_eq!(digest.lookup("cold_drinks", "cold-brew").unwrap().price, "");
        assert_eq!(
            digest.lookup("cold_drinks", "iced-latte").unwrap().price,
            "25"
        );
    }
}
