use serde::{Deserialize, Serialize};

use crate::core::{MatrixError, Result};
use crate::query::is_valid_identifier;

/// Names describing one matrix: the row entity, the column entity and the
/// junction entity linking them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatrixConfig {
    pub row_entity_name: String,
    pub column_entity_name: String,
    pub junction_entity_name: String,

    pub row_id_field: String,
    pub column_id_field: String,
    pub junction_id_field: String,

    pub row_display_field: String,
    pub column_display_field: String,

    /// Junction lookup pointing at the row.
    pub junction_row_field: String,
    /// Junction lookup pointing at the column.
    pub junction_column_field: String,

    #[serde(default)]
    pub row_parent_field: Option<String>,
    #[serde(default)]
    pub column_parent_field: Option<String>,
    /// Column lookup to the column version it supersedes.
    #[serde(default)]
    pub column_parent_attr_field: Option<String>,
    #[serde(default)]
    pub column_version_field: Option<String>,
    #[serde(default)]
    pub column_status_field: Option<String>,

    #[serde(default)]
    pub debug_mode: Option<bool>,
    /// Hosting record the matrix is opened from, when any.
    #[serde(default)]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub entity_name: Option<String>,
}

impl MatrixConfig {
    /// Config with the conventional `<entity>id` / `name` field layout.
    pub fn new(row_entity: &str, column_entity: &str, junction_entity: &str) -> Self {
        Self {
            row_entity_name: row_entity.to_string(),
            column_entity_name: column_entity.to_string(),
            junction_entity_name: junction_entity.to_string(),
            row_id_field: format!("{}id", row_entity),
            column_id_field: format!("{}id", column_entity),
            junction_id_field: format!("{}id", junction_entity),
            row_display_field: "name".to_string(),
            column_display_field: "name".to_string(),
            junction_row_field: row_entity.to_string(),
            junction_column_field: column_entity.to_string(),
            row_parent_field: None,
            column_parent_field: None,
            column_parent_attr_field: None,
            column_version_field: None,
            column_status_field: None,
            debug_mode: None,
            entity_id: None,
            entity_name: None,
        }
    }

    pub fn junction_fields(mut self, row_field: &str, column_field: &str) -> Self {
        self.junction_row_field = row_field.to_string();
        self.junction_column_field = column_field.to_string();
        self
    }

    pub fn display_fields(mut self, row_field: &str, column_field: &str) -> Self {
        self.row_display_field = row_field.to_string();
        self.column_display_field = column_field.to_string();
        self
    }

    pub fn parent_fields(mut self, row_parent: Option<&str>, column_parent: Option<&str>) -> Self {
        self.row_parent_field = row_parent.map(str::to_string);
        self.column_parent_field = column_parent.map(str::to_string);
        self
    }

    pub fn version_fields(mut self, parent_attr: &str, version: &str) -> Self {
        self.column_parent_attr_field = Some(parent_attr.to_string());
        self.column_version_field = Some(version.to_string());
        self
    }

    pub fn status_field(mut self, field: &str) -> Self {
        self.column_status_field = Some(field.to_string());
        self
    }

    pub fn debug(mut self, enabled: bool) -> Self {
        self.debug_mode = Some(enabled);
        self
    }

    pub fn is_debug(&self) -> bool {
        self.debug_mode.unwrap_or(false)
    }

    /// Checks every required name is present and every configured name is a
    /// valid identifier. Runs before any platform call.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("rowEntityName", &self.row_entity_name),
            ("columnEntityName", &self.column_entity_name),
            ("junctionEntityName", &self.junction_entity_name),
            ("rowIdField", &self.row_id_field),
            ("columnIdField", &self.column_id_field),
            ("junctionIdField", &self.junction_id_field),
            ("rowDisplayField", &self.row_display_field),
            ("columnDisplayField", &self.column_display_field),
            ("junctionRowField", &self.junction_row_field),
            ("junctionColumnField", &self.junction_column_field),
        ];
        let optional = [
            ("rowParentField", &self.row_parent_field),
            ("columnParentField", &self.column_parent_field),
            ("columnParentAttrField", &self.column_parent_attr_field),
            ("columnVersionField", &self.column_version_field),
            ("columnStatusField", &self.column_status_field),
            ("entityName", &self.entity_name),
        ];

        let mut problems = Vec::new();
        for (name, value) in required {
            if value.trim().is_empty() {
                problems.push(format!("{} is required", name));
            } else if !is_valid_identifier(value) {
                problems.push(format!("{} '{}' is not a valid identifier", name, value));
            }
        }
        for (name, value) in optional {
            if let Some(value) = value {
                if !is_valid_identifier(value) {
                    problems.push(format!("{} '{}' is not a valid identifier", name, value));
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(MatrixError::Configuration(problems.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conventional_config_is_valid() {
        let config = MatrixConfig::new("question", "study", "question_study");
        assert_eq!(config.row_id_field, "questionid");
        assert_eq!(config.junction_id_field, "question_studyid");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_required_field() {
        let mut config = MatrixConfig::new("question", "study", "question_study");
        config.junction_row_field.clear();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, MatrixError::Configuration(ref msg) if msg.contains("junctionRowField is required")));
    }

    #[test]
    fn test_malformed_names_are_all_reported() {
        let config = MatrixConfig::new("question", "study", "question_study")
            .junction_fields("question-ref", "study ref")
            .version_fields("parent)", "version");
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("junctionRowField 'question-ref'"));
        assert!(err.contains("junctionColumnField 'study ref'"));
        assert!(err.contains("columnParentAttrField 'parent)'"));
    }

    #[test]
    fn test_deserialize_camel_case() {
        let config: MatrixConfig = serde_json::from_str(
            r#"{
                "rowEntityName": "question",
                "columnEntityName": "study",
                "junctionEntityName": "question_study",
                "rowIdField": "questionid",
                "columnIdField": "studyid",
                "junctionIdField": "question_studyid",
                "rowDisplayField": "name",
                "columnDisplayField": "title",
                "junctionRowField": "question",
                "junctionColumnField": "study",
                "columnVersionField": "version",
                "debugMode": true
            }"#,
        )
        .unwrap();
        assert_eq!(config.column_display_field, "title");
        assert_eq!(config.column_version_field.as_deref(), Some("version"));
        assert!(config.column_parent_attr_field.is_none());
        assert!(config.is_debug());
    }
}
