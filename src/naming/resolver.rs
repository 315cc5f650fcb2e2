use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::config::ServiceOptions;
use crate::query::is_valid_identifier;

/// Platform attributes that never carry a publisher prefix.
const SYSTEM_FIELDS: &[&str] = &[
    "statecode",
    "statuscode",
    "createdon",
    "modifiedon",
    "createdby",
    "modifiedby",
    "ownerid",
    "versionnumber",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum NameKind {
    Entity,
    EntitySet,
    Field,
    Schema,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct NameKey {
    kind: NameKind,
    entity: String,
    field: String,
}

impl NameKey {
    fn entity(kind: NameKind, entity: &str) -> Self {
        Self {
            kind,
            entity: entity.to_string(),
            field: String::new(),
        }
    }

    fn field(kind: NameKind, entity: &str, field: &str) -> Self {
        Self {
            kind,
            entity: entity.to_string(),
            field: field.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NamingStats {
    pub schema_names_cache: usize,
    pub validation_cache: usize,
    pub overrides: usize,
}

/// Maps logical entity/field names to the platform's physical names.
///
/// Every computed name is memoized for the lifetime of the resolver. Manual
/// overrides win over computed names and survive `clear_cache`.
pub struct NamingResolver {
    prefix: Option<String>,
    names: Mutex<HashMap<NameKey, String>>,
    validation: Mutex<HashMap<String, bool>>,
    field_overrides: Mutex<HashMap<(String, String), String>>,
    entity_set_overrides: Mutex<HashMap<String, String>>,
}

impl NamingResolver {
    pub fn new(prefix: Option<&str>) -> Self {
        Self {
            prefix: prefix
                .map(|p| p.trim().to_ascii_lowercase())
                .filter(|p| !p.is_empty()),
            names: Mutex::new(HashMap::new()),
            validation: Mutex::new(HashMap::new()),
            field_overrides: Mutex::new(HashMap::new()),
            entity_set_overrides: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_options(options: &ServiceOptions) -> Self {
        Self::new(options.publisher_prefix.as_deref())
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn resolve_entity(&self, entity: &str) -> String {
        self.memoized(NameKey::entity(NameKind::Entity, entity), || {
            self.apply_prefix(entity)
        })
    }

    pub fn resolve_field(&self, entity: &str, field: &str) -> String {
        if let Some(name) = self.field_override(entity, field) {
            return name.to_ascii_lowercase();
        }
        self.memoized(NameKey::field(NameKind::Field, entity, field), || {
            if is_system_field(field) {
                field.to_ascii_lowercase()
            } else {
                self.apply_prefix(field)
            }
        })
    }

    /// Navigation (schema) name used in `@odata.bind` keys: the prefix stays
    /// lower-case and every underscore-separated segment is capitalised.
    pub fn schema_name(&self, entity: &str, field: &str) -> String {
        if let Some(name) = self.field_override(entity, field) {
            return name;
        }
        self.memoized(NameKey::field(NameKind::Schema, entity, field), || {
            let physical = self.resolve_field(entity, field);
            let (prefix, rest) = match &self.prefix {
                Some(p) if physical.starts_with(p.as_str()) => physical.split_at(p.len()),
                _ => ("", physical.as_str()),
            };
            let cased: Vec<String> = rest.split('_').map(capitalize).collect();
            format!("{}{}", prefix, cased.join("_"))
        })
    }

    /// Plural collection name used in web API paths.
    pub fn entity_set_name(&self, entity: &str) -> String {
        if let Some(name) = self.lock_entity_sets().get(entity).cloned() {
            return name;
        }
        self.memoized(NameKey::entity(NameKind::EntitySet, entity), || {
            pluralize(&self.resolve_entity(entity))
        })
    }

    pub fn lookup_value_field(&self, entity: &str, field: &str) -> String {
        format!("_{}_value", self.resolve_field(entity, field))
    }

    pub fn bind_key(&self, entity: &str, field: &str) -> String {
        format!("{}@odata.bind", self.schema_name(entity, field))
    }

    pub fn bind_value(&self, target_entity: &str, id: &str) -> String {
        format!("/{}({})", self.entity_set_name(target_entity), id)
    }

    /// Overrides the physical name of one field; only that entry is evicted.
    pub fn set_override(&self, entity: &str, field: &str, physical_name: &str) {
        lock(&self.field_overrides).insert(
            (entity.to_string(), field.to_string()),
            physical_name.to_string(),
        );
        let mut names = lock(&self.names);
        names.remove(&NameKey::field(NameKind::Field, entity, field));
        names.remove(&NameKey::field(NameKind::Schema, entity, field));
    }

    /// Overrides the collection name of an entity with an irregular plural.
    pub fn set_entity_set_override(&self, entity: &str, set_name: &str) {
        self.lock_entity_sets()
            .insert(entity.to_string(), set_name.to_string());
        lock(&self.names).remove(&NameKey::entity(NameKind::EntitySet, entity));
    }

    pub fn is_valid_identifier(&self, name: &str) -> bool {
        if let Some(valid) = lock(&self.validation).get(name) {
            return *valid;
        }
        let valid = is_valid_identifier(name);
        lock(&self.validation).insert(name.to_string(), valid);
        valid
    }

    /// Empties the memo tables. Overrides are kept.
    pub fn clear_cache(&self) {
        lock(&self.names).clear();
        lock(&self.validation).clear();
    }

    pub fn stats(&self) -> NamingStats {
        NamingStats {
            schema_names_cache: lock(&self.names).len(),
            validation_cache: lock(&self.validation).len(),
            overrides: lock(&self.field_overrides).len() + self.lock_entity_sets().len(),
        }
    }

    fn field_override(&self, entity: &str, field: &str) -> Option<String> {
        lock(&self.field_overrides)
            .get(&(entity.to_string(), field.to_string()))
            .cloned()
    }

    fn lock_entity_sets(&self) -> MutexGuard<'_, HashMap<String, String>> {
        lock(&self.entity_set_overrides)
    }

    fn memoized(&self, key: NameKey, compute: impl FnOnce() -> String) -> String {
        if let Some(name) = lock(&self.names).get(&key) {
            return name.clone();
        }
        // Computed outside the lock: schema names recurse into resolve_field.
        let name = compute();
        lock(&self.names).insert(key, name.clone());
        name
    }

    fn apply_prefix(&self, name: &str) -> String {
        let lower = name.to_ascii_lowercase();
        match &self.prefix {
            Some(prefix) if !lower.starts_with(prefix.as_str()) => format!("{}{}", prefix, lower),
            _ => lower,
        }
    }
}

impl Default for NamingResolver {
    fn default() -> Self {
        Self::new(None)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn is_system_field(field: &str) -> bool {
    SYSTEM_FIELDS.iter().any(|f| f.eq_ignore_ascii_case(field))
}

fn capitalize(segment: &str) -> String {
    let mut chars = segment.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

fn pluralize(name: &str) -> String {
    let consonant_y = name.ends_with('y')
        && !name
            .chars()
            .rev()
            .nth(1)
            .is_some_and(|c| "aeiou".contains(c));
    if consonant_y {
        format!("{}ies", &name[..name.len() - 1])
    } else if ["s", "x", "z", "ch", "sh"].iter().any(|end| name.ends_with(end)) {
        format!("{}es", name)
    } else {
        format!("{}s", name)
    }
}
