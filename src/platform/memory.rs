//! In-process record platform
//!
//! Evaluates resolved query descriptors against records held in memory. Used
//! by the command-line tool and by tests, which also rely on its call counters
//! and failure injection.

use async_trait::async_trait;
use serde_json::{Value as JsonValue, json};
use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use super::{PlatformError, RecordPage, RecordPlatform};
use crate::core::Record;
use crate::query::{
    ACTIVE_STATE, ACTIVE_STATUS_REASON, BuiltQuery, ConditionOperator, Filter, Order, QueryDescriptor,
    STATE_FIELD, STATUS_REASON_FIELD,
};

const BIND_SUFFIX: &str = "@odata.bind";

struct FailureRule {
    operation: String,
    entity: Option<String>,
    /// Record id, or any field value of a record being created.
    target: Option<String>,
    error: PlatformError,
}

impl FailureRule {
    fn matches(&self, operation: &str, entity: &str, target: &[String]) -> bool {
        self.operation == operation
            && self.entity.as_deref().is_none_or(|e| e.eq_ignore_ascii_case(entity))
            && self
                .target
                .as_deref()
                .is_none_or(|t| target.iter().any(|v| v.eq_ignore_ascii_case(t)))
    }
}

pub struct InMemoryPlatform {
    tables: Mutex<HashMap<String, Vec<Record>>>,
    calls: Mutex<HashMap<String, usize>>,
    failures: Mutex<Vec<FailureRule>>,
    writable: AtomicBool,
    report_totals: AtomicBool,
}

impl InMemoryPlatform {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            failures: Mutex::new(Vec::new()),
            writable: AtomicBool::new(true),
            report_totals: AtomicBool::new(true),
        }
    }

    /// Stores a record without counting a call. Missing id and state fields
    /// are filled in; returns the record id.
    pub fn insert(&self, entity: &str, record: Record) -> String {
        let entity = entity.to_ascii_lowercase();
        let mut record = normalize_binds(record);
        let id_field = id_field(&entity);

        let id = match record.get(&id_field).and_then(scalar) {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4().to_string();
                record.insert(id_field, JsonValue::String(id.clone()));
                id
            }
        };
        record.entry(STATE_FIELD).or_insert(json!(ACTIVE_STATE));
        record
            .entry(STATUS_REASON_FIELD)
            .or_insert(json!(ACTIVE_STATUS_REASON));

        lock(&self.tables).entry(entity).or_default().push(record);
        id
    }

    pub fn record(&self, entity: &str, id: &str) -> Option<Record> {
        let tables = lock(&self.tables);
        let table = tables.get(&entity.to_ascii_lowercase())?;
        let id_field = id_field(entity);
        table.iter().find(|r| has_id(r, &id_field, id)).cloned()
    }

    pub fn records(&self, entity: &str) -> Vec<Record> {
        lock(&self.tables)
            .get(&entity.to_ascii_lowercase())
            .cloned()
            .unwrap_or_default()
    }

    pub fn call_count(&self, operation: &str) -> usize {
        lock(&self.calls).get(operation).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        lock(&self.calls).values().sum()
    }

    pub fn reset_calls(&self) {
        lock(&self.calls).clear();
    }

    /// Makes every matching call fail with `error` until `clear_failures`.
    pub fn fail_on(&self, operation: &str, entity: Option<&str>, target: Option<&str>, error: PlatformError) {
        lock(&self.failures).push(FailureRule {
            operation: operation.to_string(),
            entity: entity.map(str::to_string),
            target: target.map(str::to_string),
            error,
        });
    }

    pub fn clear_failures(&self) {
        lock(&self.failures).clear();
    }

    pub fn set_writable(&self, writable: bool) {
        self.writable.store(writable, Ordering::Relaxed);
    }

    /// When off, pages come back without a total and callers must count.
    pub fn set_report_totals(&self, report: bool) {
        self.report_totals.store(report, Ordering::Relaxed);
    }

    fn enter(&self, operation: &str, entity: &str, target: &[String]) -> Result<(), PlatformError> {
        *lock(&self.calls).entry(operation.to_string()).or_insert(0) += 1;
        match lock(&self.failures)
            .iter()
            .find(|rule| rule.matches(operation, entity, target))
        {
            Some(rule) => Err(rule.error.clone()),
            None => Ok(()),
        }
    }

    fn ensure_writable(&self, entity: &str) -> Result<(), PlatformError> {
        if self.writable.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(PlatformError::new(format!("no write privilege on {}", entity)).with_status(403))
        }
    }
}

impl Default for InMemoryPlatform {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordPlatform for InMemoryPlatform {
    async fn retrieve_multiple(&self, query: &BuiltQuery) -> Result<RecordPage, PlatformError> {
        let descriptor = &query.descriptor;
        self.enter("retrieve_multiple", &descriptor.entity, &[])?;

        let filters = descriptor.effective_filters();
        let mut matched: Vec<Record> = lock(&self.tables)
            .get(&descriptor.entity)
            .map(|table| {
                table
                    .iter()
                    .filter(|record| filters.iter().all(|f| condition_holds(record, f)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let total = matched.len();
        let reported = self.report_totals.load(Ordering::Relaxed).then_some(total);

        if descriptor.count_only {
            let mut record = Record::new();
            record.insert("total".to_string(), json!(total));
            return Ok(RecordPage {
                records: vec![record],
                total_count: reported,
                more_records: false,
            });
        }

        matched.sort_by(|a, b| compare_records(a, b, &descriptor.orders));

        let (records, more_records) = match descriptor.page_size {
            Some(size) => {
                let page: Vec<Record> = matched.into_iter().skip(descriptor.offset).take(size).collect();
                (page, descriptor.offset + size < total)
            }
            None => (matched, false),
        };
        let records = records
            .into_iter()
            .map(|record| project(record, descriptor))
            .collect();

        Ok(RecordPage {
            records,
            total_count: reported,
            more_records,
        })
    }

    async fn retrieve(&self, entity: &str, id: &str) -> Result<Record, PlatformError> {
        self.enter("retrieve", entity, &[id.to_string()])?;
        self.record(entity, id)
            .ok_or_else(|| PlatformError::not_found(entity, id))
    }

    async fn create(&self, entity: &str, record: Record) -> Result<String, PlatformError> {
        let values: Vec<String> = record
            .values()
            .filter_map(scalar)
            .map(|v| bind_target(&v).map(str::to_string).unwrap_or(v))
            .collect();
        self.enter("create", entity, &values)?;
        self.ensure_writable(entity)?;
        Ok(self.insert(entity, record))
    }

    async fn update(&self, entity: &str, id: &str, record: Record) -> Result<(), PlatformError> {
        self.enter("update", entity, &[id.to_string()])?;
        self.ensure_writable(entity)?;

        let id_field = id_field(entity);
        let mut tables = lock(&self.tables);
        let existing = tables
            .get_mut(&entity.to_ascii_lowercase())
            .and_then(|table| table.iter_mut().find(|r| has_id(r, &id_field, id)))
            .ok_or_else(|| PlatformError::not_found(entity, id))?;

        for (key, value) in normalize_binds(record) {
            existing.insert(key, value);
        }
        Ok(())
    }

    async fn delete(&self, entity: &str, id: &str) -> Result<(), PlatformError> {
        self.enter("delete", entity, &[id.to_string()])?;
        self.ensure_writable(entity)?;

        let id_field = id_field(entity);
        let mut tables = lock(&self.tables);
        let table = tables
            .get_mut(&entity.to_ascii_lowercase())
            .ok_or_else(|| PlatformError::not_found(entity, id))?;
        let before = table.len();
        table.retain(|r| !has_id(r, &id_field, id));
        if table.len() == before {
            return Err(PlatformError::not_found(entity, id));
        }
        Ok(())
    }

    async fn can_write(&self, entity: &str) -> Result<bool, PlatformError> {
        self.enter("can_write", entity, &[])?;
        Ok(self.writable.load(Ordering::Relaxed))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn id_field(entity: &str) -> String {
    format!("{}id", entity.to_ascii_lowercase())
}

fn has_id(record: &Record, id_field: &str, id: &str) -> bool {
    record
        .get(id_field)
        .and_then(scalar)
        .is_some_and(|v| v.eq_ignore_ascii_case(id))
}

/// `Name@odata.bind: "/set(id)"` becomes `_name_value: "id"`.
fn normalize_binds(record: Record) -> Record {
    record
        .into_iter()
        .map(|(key, value)| {
            let lower = key.to_ascii_lowercase();
            match lower.strip_suffix(BIND_SUFFIX) {
                Some(name) => {
                    let id = value
                        .as_str()
                        .and_then(bind_target)
                        .map(JsonValue::from)
                        .unwrap_or(JsonValue::Null);
                    (format!("_{}_value", name), id)
                }
                None => (key, value),
            }
        })
        .collect()
}

fn bind_target(reference: &str) -> Option<&str> {
    let start = reference.rfind('(')?;
    let end = reference.rfind(')')?;
    (end > start + 1).then(|| &reference[start + 1..end])
}

fn scalar(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) if !s.is_empty() => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
        _ => None,
    }
}

/// Reads a field directly or through its `_field_value` lookup form.
fn field_value(record: &Record, field: &str) -> Option<String> {
    record
        .get(field)
        .and_then(scalar)
        .or_else(|| record.get(&format!("_{}_value", field)).and_then(scalar))
}

/// Keeps the requested columns, their `_x_value` lookup forms and the
/// primary id, the way the remote platform answers a column list.
fn project(record: Record, descriptor: &QueryDescriptor) -> Record {
    if descriptor.all_attributes || descriptor.attributes.is_empty() {
        return record;
    }
    let id_field = id_field(&descriptor.entity);
    record
        .into_iter()
        .filter(|(key, _)| {
            key.eq_ignore_ascii_case(&id_field)
                || descriptor.attributes.iter().any(|attribute| {
                    key.eq_ignore_ascii_case(attribute)
                        || key.eq_ignore_ascii_case(&format!("_{}_value", attribute))
                })
        })
        .collect()
}

fn compare_values(left: &str, right: &str) -> CmpOrdering {
    match (left.parse::<f64>(), right.parse::<f64>()) {
        (Ok(l), Ok(r)) => l.partial_cmp(&r).unwrap_or(CmpOrdering::Equal),
        _ => left.to_ascii_lowercase().cmp(&right.to_ascii_lowercase()),
    }
}

fn condition_holds(record: &Record, filter: &Filter) -> bool {
    let value = field_value(record, &filter.field);
    let first = filter.values.first().map(|v| v.to_string());
    let compare = |expected: &[CmpOrdering]| match (&value, &first) {
        (Some(v), Some(f)) => expected.contains(&compare_values(v, f)),
        _ => false,
    };

    match filter.operator {
        ConditionOperator::Null => value.is_none(),
        ConditionOperator::NotNull => value.is_some(),
        ConditionOperator::In => value.as_deref().is_some_and(|v| {
            filter
                .values
                .iter()
                .any(|candidate| compare_values(v, &candidate.to_string()) == CmpOrdering::Equal)
        }),
        ConditionOperator::Eq => compare(&[CmpOrdering::Equal]),
        ConditionOperator::Ne => !compare(&[CmpOrdering::Equal]),
        ConditionOperator::Gt => compare(&[CmpOrdering::Greater]),
        ConditionOperator::Ge => compare(&[CmpOrdering::Greater, CmpOrdering::Equal]),
        ConditionOperator::Lt => compare(&[CmpOrdering::Less]),
        ConditionOperator::Le => compare(&[CmpOrdering::Less, CmpOrdering::Equal]),
    }
}

fn compare_records(a: &Record, b: &Record, orders: &[Order]) -> CmpOrdering {
    for order in orders {
        let ordering = match (field_value(a, &order.field), field_value(b, &order.field)) {
            (Some(l), Some(r)) => compare_values(&l, &r),
            (None, Some(_)) => CmpOrdering::Less,
            (Some(_), None) => CmpOrdering::Greater,
            (None, None) => CmpOrdering::Equal,
        };
        let ordering = if order.descending { ordering.reverse() } else { ordering };
        if ordering != CmpOrdering::Equal {
            return ordering;
        }
    }
    CmpOrdering::Equal
}
