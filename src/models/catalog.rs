//! Catalog DTOs

use crate::catalog::{DatasetStatistics, SchemaCatalog, SemanticType};
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnSummary {
    pub name: String,
    pub semantic_type: SemanticType,
    pub description: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSummary {
    pub name: String,
    pub description: String,
    pub columns: Vec<ColumnSummary>,
}

/// Queryable surface of the catalog, without samples or aliases
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogResponse {
    pub database: String,
    pub description: String,
    pub fingerprint: String,
    pub statistics: DatasetStatistics,
    pub tables: Vec<TableSummary>,
}

impl From<&SchemaCatalog> for CatalogResponse {
    fn from(catalog: &SchemaCatalog) -> Self {
        Self {
            database: catalog.database.name.clone(),
            description: catalog.database.description.clone(),
            fingerprint: catalog.fingerprint(),
            statistics: catalog.database.statistics.clone(),
            tables: catalog
                .tables
                .iter()
                .map(|t| TableSummary {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    columns: t
                        .columns
                        .iter()
                        .map(|c| ColumnSummary {
                            name: c.name.clone(),
                            semantic_type: c.semantic_type,
                            description: c.description.clone(),
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}
