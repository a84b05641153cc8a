//! Schema Catalog
//!
//! Static description of the queryable views, loaded once at startup from a JSON
//! document. This is the single source of truth for table and column names: the
//! translator and the safety validator check against it, never against the live
//! database, so validation stays deterministic and works offline.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Failed to read catalog file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse catalog: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid catalog: {0}")]
    Invalid(String),
}

/// Semantic type tag of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticType {
    Region,
    Locality,
    Candidate,
    Party,
    VoteCount,
    Percentage,
    Count,
    Flag,
    Text,
}

impl SemanticType {
    /// Columns whose values name things a user can refer to in a question
    pub fn is_entity(&self) -> bool {
        matches!(
            self,
            SemanticType::Region | SemanticType::Locality | SemanticType::Candidate | SemanticType::Party
        )
    }

    /// Human label used in clarification options
    pub fn label(&self) -> &'static str {
        match self {
            SemanticType::Region => "Region",
            SemanticType::Locality => "Constituency",
            SemanticType::Candidate => "Candidate",
            SemanticType::Party => "Party",
            SemanticType::VoteCount => "Votes",
            SemanticType::Percentage => "Percentage",
            SemanticType::Count => "Count",
            SemanticType::Flag => "Flag",
            SemanticType::Text => "Text",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDescriptor {
    pub name: String,
    pub semantic_type: SemanticType,
    pub description: String,
    /// Words that point at this column in a question ("commune", "région", ...)
    #[serde(default)]
    pub synonyms: Vec<String>,
    /// Known values for low-cardinality columns
    #[serde(default)]
    pub samples: Vec<String>,
    /// Canonical value -> alternative spellings
    #[serde(default)]
    pub value_aliases: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub columns: Vec<ColumnDescriptor>,
}

impl TableDescriptor {
    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetStatistics {
    #[serde(default)]
    pub total_seats: Option<u32>,
    #[serde(default)]
    pub total_parties: Option<u32>,
    #[serde(default)]
    pub total_candidacies: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub statistics: DatasetStatistics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecuritySettings {
    /// LIMIT added to open-ended queries
    #[serde(default = "default_auto_limit")]
    pub auto_limit: u32,
    #[serde(default = "default_max_rows")]
    pub max_rows: u32,
    #[serde(default)]
    pub allowed_functions: Vec<String>,
    #[serde(default)]
    pub forbidden_keywords: Vec<String>,
}

fn default_auto_limit() -> u32 {
    50
}

fn default_max_rows() -> u32 {
    200
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            auto_limit: default_auto_limit(),
            max_rows: default_max_rows(),
            allowed_functions: Vec::new(),
            forbidden_keywords: Vec::new(),
        }
    }
}

/// The loaded schema descriptor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaCatalog {
    pub database: DatasetInfo,
    #[serde(default)]
    pub security: SecuritySettings,
    pub tables: Vec<TableDescriptor>,
}

impl SchemaCatalog {
    /// Load and validate the catalog document from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, CatalogError> {
        let catalog: SchemaCatalog = serde_json::from_str(raw)?;
        catalog.check()?;
        debug!(
            "Catalog '{}' loaded with {} tables",
            catalog.database.name,
            catalog.tables.len()
        );
        Ok(catalog)
    }

    fn check(&self) -> Result<(), CatalogError> {
        if self.tables.is_empty() {
            return Err(CatalogError::Invalid("catalog declares no tables".to_string()));
        }

        let mut seen_tables = HashSet::new();
        for table in &self.tables {
            if !is_plain_identifier(&table.name) {
                return Err(CatalogError::Invalid(format!(
                    "table name '{}' is not a plain identifier",
                    table.name
                )));
            }
            if !seen_tables.insert(table.name.to_ascii_lowercase()) {
                return Err(CatalogError::Invalid(format!("duplicate table '{}'", table.name)));
            }
            if table.columns.is_empty() {
                return Err(CatalogError::Invalid(format!("table '{}' has no columns", table.name)));
            }

            let mut seen_columns = HashSet::new();
            for column in &table.columns {
                if !is_plain_identifier(&column.name) {
                    return Err(CatalogError::Invalid(format!(
                        "column name '{}.{}' is not a plain identifier",
                        table.name, column.name
                    )));
                }
                if !seen_columns.insert(column.name.to_ascii_lowercase()) {
                    return Err(CatalogError::Invalid(format!(
                        "duplicate column '{}.{}'",
                        table.name, column.name
                    )));
                }
                for canonical in column.value_aliases.keys() {
                    if !column.samples.iter().any(|s| s == canonical) {
                        return Err(CatalogError::Invalid(format!(
                            "alias target '{}' is not a sample of {}.{}",
                            canonical, table.name, column.name
                        )));
                    }
                }
            }
        }

        if self.security.auto_limit == 0 || self.security.max_rows == 0 {
            return Err(CatalogError::Invalid("row limits must be positive".to_string()));
        }

        Ok(())
    }

    pub fn table(&self, name: &str) -> Option<&TableDescriptor> {
        self.tables.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.table(name).is_some()
    }

    /// Columns that carry known values, with their owning table
    pub fn entity_columns(&self) -> impl Iterator<Item = (&TableDescriptor, &ColumnDescriptor)> {
        self.tables.iter().flat_map(|t| {
            t.columns
                .iter()
                .filter(|c| c.semantic_type.is_entity() && !c.samples.is_empty())
                .map(move |c| (t, c))
        })
    }

    /// Add values read from the live data to a column's known values, keeping the
    /// catalog order first. Returns how many were new.
    pub fn merge_values(&mut self, table: &str, column: &str, values: Vec<String>) -> usize {
        let descriptor = self
            .tables
            .iter_mut()
            .find(|t| t.name.eq_ignore_ascii_case(table))
            .and_then(|t| t.columns.iter_mut().find(|c| c.name.eq_ignore_ascii_case(column)));
        let Some(descriptor) = descriptor else {
            return 0;
        };

        let mut known: HashSet<String> = descriptor.samples.iter().cloned().collect();
        let before = descriptor.samples.len();
        for value in values {
            let value = value.trim().to_string();
            if !value.is_empty() && known.insert(value.clone()) {
                descriptor.samples.push(value);
            }
        }
        descriptor.samples.len() - before
    }

    /// Semantic type of a column name, looked up across all tables
    pub fn semantic_type_of(&self, column: &str) -> Option<SemanticType> {
        self.tables
            .iter()
            .find_map(|t| t.column(column))
            .map(|c| c.semantic_type)
    }

    pub fn is_function_allowed(&self, name: &str) -> bool {
        self.security
            .allowed_functions
            .iter()
            .any(|f| f.eq_ignore_ascii_case(name))
    }

    /// Stable fingerprint of the queryable surface (tables and columns)
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();

        let mut entries: Vec<String> = self
            .tables
            .iter()
            .flat_map(|t| {
                t.columns
                    .iter()
                    .map(move |c| format!("{}.{}:{:?}", t.name, c.name, c.semantic_type))
            })
            .collect();
        entries.sort();

        for entry in &entries {
            hasher.update(entry.as_bytes());
        }
        for f in &self.security.allowed_functions {
            hasher.update(format!("fn:{}", f.to_ascii_lowercase()).as_bytes());
        }

        format!("{:x}", hasher.finalize())
    }
}

fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Catalog shipped with the repository, for tests across the crate
#[cfg(test)]
pub(crate) fn test_catalog() -> SchemaCatalog {
    SchemaCatalog::from_json(include_str!("../../catalog/election_2025.json"))
        .expect("bundled catalog must be valid")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundled_catalog_loads() {
        let catalog = test_catalog();
        assert_eq!(catalog.database.name, "election_ci_2025");
        assert!(catalog.has_table("vw_results_clean"));
        assert!(catalog.has_table("VW_RESULTS_CLEAN"));
        assert!(!catalog.has_table("results"));
        assert_eq!(catalog.security.auto_limit, 50);
    }

    #[test]
    fn test_entity_columns_only_cover_sampled_entities() {
        let catalog = test_catalog();
        let names: Vec<&str> = catalog.entity_columns().map(|(_, c)| c.name.as_str()).collect();
        assert_eq!(names, vec!["region", "circonscription", "candidat", "parti_standardized"]);
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let a = test_catalog();
        let b = test_catalog();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }

    #[test]
    fn test_rejects_alias_without_sample() {
        let raw = r#"{
            "database": {"name": "t"},
            "tables": [{"name": "t", "columns": [{
                "name": "parti", "semanticType": "party", "description": "",
                "samples": ["A"], "valueAliases": {"B": ["BEE"]}
            }]}]
        }"#;
        assert!(matches!(SchemaCatalog::from_json(raw), Err(CatalogError::Invalid(_))));
    }

    #[test]
    fn test_rejects_non_identifier_names() {
        let raw = r#"{
            "database": {"name": "t"},
            "tables": [{"name": "bad name", "columns": [
                {"name": "x", "semanticType": "text", "description": ""}
            ]}]
        }"#;
        assert!(SchemaCatalog::from_json(raw).is_err());
    }

    #[test]
    fn test_merge_values_adds_only_new_ones() {
        let mut catalog = test_catalog();
        let before = catalog.fingerprint();
        let added = catalog.merge_values(
            "vw_results_clean",
            "circonscription",
            vec![
                "ABENGOUROU, COMMUNE".to_string(),
                "COCODY, COMMUNE".to_string(),
                "  ".to_string(),
            ],
        );
        assert_eq!(added, 1);
        let column = catalog.table("vw_results_clean").unwrap().column("circonscription").unwrap();
        assert_eq!(column.samples.first().map(String::as_str), Some("ABOBO, COMMUNE"));
        assert_eq!(column.samples.last().map(String::as_str), Some("ABENGOUROU, COMMUNE"));
        assert_eq!(catalog.fingerprint(), before);
        assert_eq!(catalog.merge_values("vw_results_clean", "nope", vec!["X".to_string()]), 0);
    }

    #[test]
    fn test_function_allow_list_is_case_insensitive() {
        let catalog = test_catalog();
        assert!(catalog.is_function_allowed("SUM"));
        assert!(!catalog.is_function_allowed("pg_read_file"));
    }
}
