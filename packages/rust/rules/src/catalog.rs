//! Tool category definitions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Category name → tool identifier patterns.
///
/// A tool belongs to a category when one of the category's patterns occurs
/// in its identifier, compared case-insensitively. A tool may belong to more
/// than one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolCatalog {
    categories: BTreeMap<String, Vec<String>>,
}

impl ToolCatalog {
    pub fn new(categories: BTreeMap<String, Vec<String>>) -> Self {
        Self { categories }
    }

    /// Categories the tool belongs to, in name order.
    pub fn categorize(&self, tool_id: &str) -> Vec<&str> {
        let id = tool_id.to_lowercase();
        self.categories
            .iter()
            .filter(|(_, patterns)| {
                patterns
                    .iter()
                    .any(|p| !p.is_empty() && id.contains(&p.to_lowercase()))
            })
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn category_names(&self) -> impl Iterator<Item = &str> {
        self.categories.keys().map(String::as_str)
    }
}

impl Default for ToolCatalog {
    fn default() -> Self {
        let table: &[(&str, &[&str])] = &[
            (
                "gundrill",
                &[
                    "GUH-1865", "GUH-3032", "GUH-3033", "GUH-3035", "GUH-5639", "GUH-5640",
                    "GUH-5641", "GUH-5688", "GUH-5691", "GUH-49298", "TUN-AF", "TOO-AF",
                ],
            ),
            (
                "endmill_finish",
                &["FRA-P15250", "FRA-P15251", "FRA-P15254", "FRA-P8521"],
            ),
            ("endmill_roughing", &["GUH-6736", "GUH-6961", "FRA-P8420"]),
            ("jjtools", &["JJ"]),
            ("tgt", &["TGT"]),
            (
                "xfeed",
                &["FRA-X7600", "FRA-X7604", "FRA-X7620", "FRA-X7624"],
            ),
            ("cleaning", &["G12R6-tisztito_H63Z12L120X"]),
            (
                "touchprobe",
                &[
                    "DMG-TAP75_H63-Renishaw-taszter-HSC75",
                    "DMG-TAP85_H63TASZTER-DMU85",
                    "DMG-TAP100P_H63TASZTER-DMU100P",
                    "DMG-TAP100P4_H63-Renishaw-taszter-DMU100P4",
                ],
            ),
        ];

        let categories = table
            .iter()
            .map(|(name, ids)| {
                (
                    name.to_string(),
                    ids.iter().map(|id| id.to_string()).collect(),
                )
            })
            .collect();

        Self { categories }
    }
}
