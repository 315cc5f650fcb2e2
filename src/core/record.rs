//! Loosely-typed platform records and field extraction.
//!
//! The platform returns the same logical field under different shapes
//! depending on the field kind and the API surface that produced it:
//! a plain attribute, a `_field_value` lookup, an `@odata.bind` navigation
//! reference or a nested object. `FieldExtractor` tries an ordered list of
//! strategies and returns the first non-empty match.

use serde_json::{Map, Value as JsonValue};

pub type Record = Map<String, JsonValue>;

/// One way of reading a logical field out of a raw record.
pub trait ExtractionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn extract(&self, record: &Record, field: &str) -> Option<String>;
}

/// `{"field": "value"}`
#[derive(Debug, Clone, Default)]
pub struct DirectField;

impl ExtractionStrategy for DirectField {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn extract(&self, record: &Record, field: &str) -> Option<String> {
        record.get(field).and_then(scalar_to_string)
    }
}

/// `{"_field_value": "value"}`
#[derive(Debug, Clone, Default)]
pub struct LookupValueField;

impl ExtractionStrategy for LookupValueField {
    fn name(&self) -> &'static str {
        "lookup_value"
    }

    fn extract(&self, record: &Record, field: &str) -> Option<String> {
        record
            .get(&lookup_value_key(field))
            .and_then(scalar_to_string)
    }
}

/// `{"Field@odata.bind": "/entityset(value)"}`, key matched case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct NavigationBindField;

impl ExtractionStrategy for NavigationBindField {
    fn name(&self) -> &'static str {
        "navigation_bind"
    }

    fn extract(&self, record: &Record, field: &str) -> Option<String> {
        let wanted = format!("{}@odata.bind", field.to_ascii_lowercase());
        record
            .iter()
            .find(|(key, _)| key.to_ascii_lowercase() == wanted)
            .and_then(|(_, value)| value.as_str())
            .and_then(parse_bind_reference)
    }
}

/// `{"field": {"id": "value"}}`
#[derive(Debug, Clone, Default)]
pub struct NestedObjectField;

impl ExtractionStrategy for NestedObjectField {
    fn name(&self) -> &'static str {
        "nested_object"
    }

    fn extract(&self, record: &Record, field: &str) -> Option<String> {
        let nested = record.get(field)?.as_object()?;
        ["id", "Id", "ID"]
            .iter()
            .find_map(|key| nested.get(*key).and_then(scalar_to_string))
    }
}

/// Ordered strategy chain. The first strategy that yields a value wins.
pub struct FieldExtractor {
    strategies: Vec<Box<dyn ExtractionStrategy>>,
}

impl FieldExtractor {
    pub fn new() -> Self {
        Self {
            strategies: vec![
                Box::new(DirectField),
                Box::new(LookupValueField),
                Box::new(NavigationBindField),
                Box::new(NestedObjectField),
            ],
        }
    }

    pub fn with_strategies(strategies: Vec<Box<dyn ExtractionStrategy>>) -> Self {
        Self { strategies }
    }

    /// Appends a strategy after the built-in ones.
    pub fn push(&mut self, strategy: Box<dyn ExtractionStrategy>) {
        self.strategies.push(strategy);
    }

    pub fn extract(&self, record: &Record, field: &str) -> Option<String> {
        self.extract_with_source(record, field).map(|(value, _)| value)
    }

    /// Like `extract`, also naming the strategy that matched.
    pub fn extract_with_source(&self, record: &Record, field: &str) -> Option<(String, &'static str)> {
        self.strategies
            .iter()
            .find_map(|s| s.extract(record, field).map(|v| (v, s.name())))
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }
}

impl Default for FieldExtractor {
    fn default() -> Self {
        Self::new()
    }
}

pub fn lookup_value_key(field: &str) -> String {
    format!("_{}_value", field)
}

/// Sorted field names, used by diagnostics.
pub fn record_field_names(record: &Record) -> Vec<String> {
    let mut names: Vec<String> = record.keys().cloned().collect();
    names.sort();
    names
}

fn scalar_to_string(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// `/studies(1234)` or `studies(1234)` -> `1234`
fn parse_bind_reference(reference: &str) -> Option<String> {
    let open = reference.rfind('(')?;
    let close = reference.rfind(')')?;
    if close <= open + 1 {
        return None;
    }
    let id = reference[open + 1..close]
        .trim()
        .trim_matches(|c| c == '\'' || c == '{' || c == '}');
    (!id.is_empty()).then(|| id.to_string())
}
