//! Logical query descriptors
//!
//! Type-safe description of one platform read. Rendering into fetch XML
//! happens in `builder.rs`.

use serde::Serialize;
use std::fmt;

/// Platform state attribute shared by every entity.
pub const STATE_FIELD: &str = "statecode";
pub const STATUS_REASON_FIELD: &str = "statuscode";
pub const ACTIVE_STATE: i64 = 0;
pub const INACTIVE_STATE: i64 = 1;
/// Status reasons paired with the two states.
pub const ACTIVE_STATUS_REASON: i64 = 1;
pub const INACTIVE_STATUS_REASON: i64 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum FilterValue {
    Text(String),
    Integer(i64),
    Bool(bool),
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => write!(f, "{}", s),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Bool(b) => write!(f, "{}", if *b { 1 } else { 0 }),
        }
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&String> for FilterValue {
    fn from(value: &String) -> Self {
        Self::Text(value.clone())
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ConditionOperator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    In,
    Null,
    NotNull,
}

impl ConditionOperator {
    pub fn fetch_name(&self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Gt => "gt",
            Self::Ge => "ge",
            Self::Lt => "lt",
            Self::Le => "le",
            Self::In => "in",
            Self::Null => "null",
            Self::NotNull => "not-null",
        }
    }

    /// Number of values the operator expects; `None` means one or more.
    pub fn arity(&self) -> Option<usize> {
        match self {
            Self::In => None,
            Self::Null | Self::NotNull => Some(0),
            _ => Some(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Filter {
    pub field: String,
    pub operator: ConditionOperator,
    pub values: Vec<FilterValue>,
}

impl Filter {
    fn single(field: &str, operator: ConditionOperator, value: FilterValue) -> Self {
        Self {
            field: field.to_string(),
            operator,
            values: vec![value],
        }
    }

    pub fn eq(field: &str, value: impl Into<FilterValue>) -> Self {
        Self::single(field, ConditionOperator::Eq, value.into())
    }

    pub fn ne(field: &str, value: impl Into<FilterValue>) -> Self {
        Self::single(field, ConditionOperator::Ne, value.into())
    }

    pub fn gt(field: &str, value: impl Into<FilterValue>) -> Self {
        Self::single(field, ConditionOperator::Gt, value.into())
    }

    pub fn ge(field: &str, value: impl Into<FilterValue>) -> Self {
        Self::single(field, ConditionOperator::Ge, value.into())
    }

    pub fn lt(field: &str, value: impl Into<FilterValue>) -> Self {
        Self::single(field, ConditionOperator::Lt, value.into())
    }

    pub fn le(field: &str, value: impl Into<FilterValue>) -> Self {
        Self::single(field, ConditionOperator::Le, value.into())
    }

    pub fn in_list<I, V>(field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<FilterValue>,
    {
        Self {
            field: field.to_string(),
            operator: ConditionOperator::In,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_null(field: &str) -> Self {
        Self {
            field: field.to_string(),
            operator: ConditionOperator::Null,
            values: Vec::new(),
        }
    }

    pub fn not_null(field: &str) -> Self {
        Self {
            field: field.to_string(),
            operator: ConditionOperator::NotNull,
            values: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Order {
    pub field: String,
    pub descending: bool,
}

/// Restricts a query to the children of one parent record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ParentScope {
    pub field: String,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct QueryDescriptor {
    pub entity: String,
    pub attributes: Vec<String>,
    /// Return every column; `attributes` is then ignored by the renderer.
    pub all_attributes: bool,
    pub filters: Vec<Filter>,
    pub orders: Vec<Order>,
    pub parent: Option<ParentScope>,
    pub offset: usize,
    pub page_size: Option<usize>,
    pub count_only: bool,
    pub active_only: bool,
}

impl QueryDescriptor {
    pub fn new(entity: &str) -> Self {
        Self {
            entity: entity.to_string(),
            attributes: Vec::new(),
            all_attributes: false,
            filters: Vec::new(),
            orders: Vec::new(),
            parent: None,
            offset: 0,
            page_size: None,
            count_only: false,
            active_only: false,
        }
    }

    pub fn attribute(mut self, field: &str) -> Self {
        if !self.attributes.iter().any(|a| a == field) {
            self.attributes.push(field.to_string());
        }
        self
    }

    pub fn attributes<'a>(mut self, fields: impl IntoIterator<Item = &'a str>) -> Self {
        for field in fields {
            self = self.attribute(field);
        }
        self
    }

    pub fn all_attributes(mut self) -> Self {
        self.all_attributes = true;
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by(mut self, field: &str, descending: bool) -> Self {
        self.orders.push(Order {
            field: field.to_string(),
            descending,
        });
        self
    }

    pub fn parent(mut self, field: &str, id: &str) -> Self {
        self.parent = Some(ParentScope {
            field: field.to_string(),
            id: id.to_string(),
        });
        self
    }

    pub fn page(mut self, offset: usize, page_size: usize) -> Self {
        self.offset = offset;
        self.page_size = Some(page_size);
        self
    }

    pub fn active_only(mut self) -> Self {
        self.active_only = true;
        self
    }

    /// Aggregate count over the same entity and filters, without paging.
    pub fn to_count(&self) -> Self {
        Self {
            entity: self.entity.clone(),
            attributes: self.attributes.iter().take(1).cloned().collect(),
            all_attributes: false,
            filters: self.filters.clone(),
            orders: Vec::new(),
            parent: self.parent.clone(),
            offset: 0,
            page_size: None,
            count_only: true,
            active_only: self.active_only,
        }
    }

    /// Filters including the implicit state and parent conditions.
    pub fn effective_filters(&self) -> Vec<Filter> {
        let mut filters = Vec::with_capacity(self.filters.len() + 2);
        if self.active_only {
            filters.push(Filter::eq(STATE_FIELD, ACTIVE_STATE));
        }
        if let Some(parent) = &self.parent {
            filters.push(Filter::eq(&parent.field, parent.id.as_str()));
        }
        filters.extend(self.filters.iter().cloned());
        filters
    }

    /// Every identifier embedded in the query text.
    pub fn identifiers(&self) -> Vec<&str> {
        let mut names = vec![self.entity.as_str()];
        names.extend(self.attributes.iter().map(String::as_str));
        names.extend(self.filters.iter().map(|f| f.field.as_str()));
        names.extend(self.orders.iter().map(|o| o.field.as_str()));
        if let Some(parent) = &self.parent {
            names.push(parent.field.as_str());
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_filters_order() {
        let descriptor = QueryDescriptor::new("study")
            .parent("projectid", "p-1")
            .filter(Filter::ne("name", "x"))
            .active_only();

        let filters = descriptor.effective_filters();
        assert_eq!(filters.len(), 3);
        assert_eq!(filters[0], Filter::eq(STATE_FIELD, ACTIVE_STATE));
        assert_eq!(filters[1], Filter::eq("projectid", "p-1"));
        assert_eq!(filters[2].operator, ConditionOperator::Ne);
    }

    #[test]
    fn test_to_count_drops_paging_and_order() {
        let descriptor = QueryDescriptor::new("study")
            .attributes(["studyid", "name"])
            .order_by("name", false)
            .page(100, 50);
        let count = descriptor.to_count();
        assert!(count.count_only);
        assert_eq!(count.page_size, None);
        assert_eq!(count.offset, 0);
        assert!(count.orders.is_empty());
        assert_eq!(count.attributes, vec!["studyid".to_string()]);
    }

    #[test]
    fn test_attribute_dedup() {
        let descriptor = QueryDescriptor::new("study").attributes(["name", "name", "studyid"]);
        assert_eq!(descriptor.attributes.len(), 2);
    }

    #[test]
    fn test_filter_value_display() {
        assert_eq!(FilterValue::from(true).to_string(), "1");
        assert_eq!(FilterValue::from(7).to_string(), "7");
        assert_eq!(FilterValue::from("abc").to_string(), "abc");
    }
}
