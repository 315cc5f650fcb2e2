use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use std::fmt;

use crate::version::VersionChainAnalysis;

/// Lifecycle status carried by column records. Only drafts accept edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    Draft,
    Published,
    Retired,
    Other(i64),
}

impl StatusCode {
    pub const DRAFT_VALUE: i64 = 1;
    pub const PUBLISHED_VALUE: i64 = 2;
    pub const RETIRED_VALUE: i64 = 3;

    pub fn from_code(code: i64) -> Self {
        match code {
            Self::DRAFT_VALUE => Self::Draft,
            Self::PUBLISHED_VALUE => Self::Published,
            Self::RETIRED_VALUE => Self::Retired,
            other => Self::Other(other),
        }
    }

    /// Accepts either the numeric option value or its label.
    pub fn from_json(value: &JsonValue) -> Option<Self> {
        match value {
            JsonValue::Number(n) => n.as_i64().map(Self::from_code),
            JsonValue::String(s) => {
                if let Ok(code) = s.trim().parse::<i64>() {
                    return Some(Self::from_code(code));
                }
                match s.trim().to_ascii_lowercase().as_str() {
                    "draft" => Some(Self::Draft),
                    "published" | "active" => Some(Self::Published),
                    "retired" | "archived" => Some(Self::Retired),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            Self::Draft => Self::DRAFT_VALUE,
            Self::Published => Self::PUBLISHED_VALUE,
            Self::Retired => Self::RETIRED_VALUE,
            Self::Other(code) => *code,
        }
    }

    pub fn permits_mutation(&self) -> bool {
        matches!(self, Self::Draft)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Draft => write!(f, "draft"),
            Self::Published => write!(f, "published"),
            Self::Retired => write!(f, "retired"),
            Self::Other(code) => write!(f, "status({})", code),
        }
    }
}

/// One entry of the matrix's row axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowEntity {
    pub id: String,
    pub display_name: String,
    pub entity_name: String,
    pub parent_id: Option<String>,
    pub status_code: Option<StatusCode>,
}

/// One entry of the matrix's column axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnEntity {
    pub id: String,
    pub display_name: String,
    pub entity_name: String,
    pub parent_id: Option<String>,
    pub status_code: Option<StatusCode>,
    /// Link to the column this one supersedes.
    pub version_parent_id: Option<String>,
    pub version_number: Option<i64>,
}

impl ColumnEntity {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>, entity_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            entity_name: entity_name.into(),
            parent_id: None,
            status_code: None,
            version_parent_id: None,
            version_number: None,
        }
    }

    pub fn with_version(mut self, parent: Option<&str>, number: Option<i64>) -> Self {
        self.version_parent_id = parent.map(str::to_string);
        self.version_number = number;
        self
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status_code = Some(status);
        self
    }

    /// Columns without a status are not gated.
    pub fn is_interactable(&self) -> bool {
        self.status_code.is_none_or(|status| status.permits_mutation())
    }
}

impl RowEntity {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>, entity_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            entity_name: entity_name.into(),
            parent_id: None,
            status_code: None,
        }
    }
}

/// An existing assignment between one row and one column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JunctionRecord {
    pub id: String,
    pub row_id: String,
    pub column_id: String,
    pub entity_name: String,
}

impl JunctionRecord {
    pub fn is_valid(&self) -> bool {
        !self.id.is_empty() && !self.row_id.is_empty() && !self.column_id.is_empty()
    }
}

/// UI-facing view of one (row, column) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellState {
    pub row_id: String,
    pub column_id: String,
    pub is_assigned: bool,
    pub is_modified: bool,
    pub has_conflict: bool,
    pub is_interactable: bool,
    junction_id: Option<String>,
}

impl CellState {
    pub fn assigned(
        row_id: impl Into<String>,
        column_id: impl Into<String>,
        junction_id: impl Into<String>,
        is_interactable: bool,
    ) -> Self {
        Self {
            row_id: row_id.into(),
            column_id: column_id.into(),
            is_assigned: true,
            is_modified: false,
            has_conflict: false,
            is_interactable,
            junction_id: Some(junction_id.into()),
        }
    }

    pub fn unassigned(row_id: impl Into<String>, column_id: impl Into<String>, is_interactable: bool) -> Self {
        Self {
            row_id: row_id.into(),
            column_id: column_id.into(),
            is_assigned: false,
            is_modified: false,
            has_conflict: false,
            is_interactable,
            junction_id: None,
        }
    }

    pub fn junction_id(&self) -> Option<&str> {
        self.junction_id.as_deref()
    }

    pub fn mark_modified(mut self) -> Self {
        self.is_modified = true;
        self
    }

    pub fn mark_conflict(mut self) -> Self {
        self.has_conflict = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JunctionCreate {
    pub row_id: String,
    pub column_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JunctionUpdate {
    pub id: String,
    pub row_id: String,
    pub column_id: String,
}

/// Diff between the loaded matrix and the pending edits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOperation {
    pub creates: Vec<JunctionCreate>,
    pub updates: Vec<JunctionUpdate>,
    pub deletes: Vec<String>,
}

impl BatchOperation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(mut self, row_id: impl Into<String>, column_id: impl Into<String>) -> Self {
        self.creates.push(JunctionCreate {
            row_id: row_id.into(),
            column_id: column_id.into(),
        });
        self
    }

    pub fn update(mut self, id: impl Into<String>, row_id: impl Into<String>, column_id: impl Into<String>) -> Self {
        self.updates.push(JunctionUpdate {
            id: id.into(),
            row_id: row_id.into(),
            column_id: column_id.into(),
        });
        self
    }

    pub fn delete(mut self, id: impl Into<String>) -> Self {
        self.deletes.push(id.into());
        self
    }

    pub fn len(&self) -> usize {
        self.creates.len() + self.updates.len() + self.deletes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A page of one axis, returned by the pagination calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityPage<T> {
    pub items: Vec<T>,
    pub offset: usize,
    /// Records the platform returned for this window, before any filtering.
    #[serde(default)]
    pub fetched: usize,
    pub total_count: usize,
    pub has_more: bool,
}

impl<T> EntityPage<T> {
    /// Offset of the following window. Hidden versions still advance it.
    pub fn next_offset(&self) -> usize {
        self.offset + self.fetched.max(self.items.len())
    }
}

/// Everything one initial load produces.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatrixData {
    pub rows: Vec<RowEntity>,
    pub columns: Vec<ColumnEntity>,
    pub junctions: Vec<JunctionRecord>,
    pub total_row_count: usize,
    pub total_column_count: usize,
    pub has_more_rows: bool,
    pub has_more_columns: bool,
    pub can_edit: bool,
    /// Columns as returned by the platform, before version filtering.
    pub raw_columns: Vec<ColumnEntity>,
    pub hidden_column_count: usize,
    pub version_analysis: Option<VersionChainAnalysis>,
}

impl MatrixData {
    pub fn cell_state(&self, row_id: &str, column_id: &str) -> CellState {
        let interactable = self.can_edit
            && self
                .columns
                .iter()
                .find(|c| c.id == column_id)
                .is_some_and(ColumnEntity::is_interactable);

        match self
            .junctions
            .iter()
            .find(|j| j.row_id == row_id && j.column_id == column_id)
        {
            Some(junction) => CellState::assigned(row_id, column_id, junction.id.clone(), interactable),
            None => CellState::unassigned(row_id, column_id, interactable),
        }
    }

    pub fn row_ids(&self) -> HashSet<&str> {
        self.rows.iter().map(|r| r.id.as_str()).collect()
    }

    pub fn column_ids(&self) -> HashSet<&str> {
        self.columns.iter().map(|c| c.id.as_str()).collect()
    }
}
