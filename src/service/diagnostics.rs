use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{Level, event};

use super::MatrixDataService;
use crate::config::MatrixConfig;
use crate::core::record::record_field_names;
use crate::core::{MatrixError, Record, Result};
use crate::query::QueryDescriptor;

/// What the extractor made of one sampled junction record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JunctionSample {
    pub id: Option<String>,
    pub field_names: Vec<String>,
    pub row_id: Option<String>,
    /// Extraction strategy that produced `row_id`.
    pub row_source: Option<&'static str>,
    pub column_id: Option<String>,
    pub column_source: Option<&'static str>,
}

impl JunctionSample {
    pub fn is_complete(&self) -> bool {
        self.row_id.is_some() && self.column_id.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JunctionDiagnostics {
    pub entity_name: String,
    pub physical_entity: String,
    /// Physical names the extractor looked for.
    pub row_field: String,
    pub column_field: String,
    pub sample_count: usize,
    pub rows_resolved: usize,
    pub columns_resolved: usize,
    /// Lookup-shaped fields seen in the samples.
    pub candidate_fields: Vec<String>,
    pub samples: Vec<JunctionSample>,
    pub recommendations: Vec<String>,
}

impl JunctionDiagnostics {
    pub fn is_healthy(&self) -> bool {
        self.recommendations.is_empty()
    }
}

impl MatrixDataService {
    /// Samples junction records of any state and reports how the configured
    /// row and column fields resolve against them. Read-only.
    pub async fn diagnose_junction_field_mapping(
        &self,
        config: &MatrixConfig,
        sample_size: usize,
    ) -> Result<JunctionDiagnostics> {
        self.begin(config)?;
        self.tracker
            .track("diagnose_junction_mapping", async {
                let descriptor = QueryDescriptor::new(&config.junction_entity_name)
                    .attribute(&config.junction_id_field)
                    .all_attributes()
                    .page(0, sample_size.max(1));
                let query = self.queries.build(&descriptor)?;
                let page = self.fetch_uncached(&query, "diagnose_junctions").await?;
                Ok::<_, MatrixError>(self.diagnose(config, &query.entity, &page.records))
            })
            .await
    }

    fn diagnose(&self, config: &MatrixConfig, physical_entity: &str, records: &[Record]) -> JunctionDiagnostics {
        let junction = config.junction_entity_name.as_str();
        let row_field = self.naming.resolve_field(junction, &config.junction_row_field);
        let column_field = self.naming.resolve_field(junction, &config.junction_column_field);

        let samples: Vec<JunctionSample> = records
            .iter()
            .map(|record| {
                let row = self.extractor.extract_with_source(record, &row_field);
                let column = self.extractor.extract_with_source(record, &column_field);
                JunctionSample {
                    id: self.extract(record, junction, &config.junction_id_field),
                    field_names: record_field_names(record),
                    row_source: row.as_ref().map(|(_, source)| *source),
                    row_id: row.map(|(id, _)| id),
                    column_source: column.as_ref().map(|(_, source)| *source),
                    column_id: column.map(|(id, _)| id),
                }
            })
            .collect();

        let candidate_fields: Vec<String> = samples
            .iter()
            .flat_map(|s| s.field_names.iter())
            .filter(|name| is_lookup_shaped(name))
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let sample_count = samples.len();
        let rows_resolved = samples.iter().filter(|s| s.row_id.is_some()).count();
        let columns_resolved = samples.iter().filter(|s| s.column_id.is_some()).count();
        let complete = samples.iter().filter(|s| s.is_complete()).count();

        let mut recommendations = Vec::new();
        if sample_count == 0 {
            recommendations.push(format!(
                "No junction records found: check the junction entity name '{}'",
                config.junction_entity_name
            ));
        } else {
            let mut unresolved = Vec::new();
            if rows_resolved * 2 < sample_count {
                unresolved.push(format!("junctionRowField '{}'", config.junction_row_field));
            }
            if columns_resolved * 2 < sample_count {
                unresolved.push(format!("junctionColumnField '{}'", config.junction_column_field));
            }

            if !unresolved.is_empty() {
                let candidates = if candidate_fields.is_empty() {
                    "none".to_string()
                } else {
                    candidate_fields.join(", ")
                };
                recommendations.push(format!(
                    "Missing field mapping: {} did not resolve in most of the {} sampled records; candidate lookup fields: {}",
                    unresolved.join(" and "),
                    sample_count,
                    candidates
                ));
            } else if complete < sample_count {
                recommendations.push(format!(
                    "{} of {} sampled junction records lack a row or column link and are dropped during loading",
                    sample_count - complete,
                    sample_count
                ));
            }
        }

        event!(
            Level::INFO,
            entity = %config.junction_entity_name,
            samples = sample_count,
            rows_resolved,
            columns_resolved,
            recommendations = recommendations.len(),
            "junction field mapping diagnosed"
        );

        JunctionDiagnostics {
            entity_name: config.junction_entity_name.clone(),
            physical_entity: physical_entity.to_string(),
            row_field,
            column_field,
            sample_count,
            rows_resolved,
            columns_resolved,
            candidate_fields,
            samples,
            recommendations,
        }
    }
}

fn is_lookup_shaped(name: &str) -> bool {
    (name.starts_with('_') && name.ends_with("_value")) || name.to_ascii_lowercase().ends_with("@odata.bind")
}
