//! Query Validator
//!
//! Checks descriptors and their rendered text before dispatch.
//! Uses the Chain of Responsibility pattern: every rule appends its findings,
//! so one pass reports all problems at once.

use regex::Regex;
use serde::Serialize;

use super::descriptor::{ConditionOperator, QueryDescriptor};

lazy_static::lazy_static! {
    static ref IDENTIFIER: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

/// Letters, digits and underscores, not starting with a digit.
pub fn is_valid_identifier(name: &str) -> bool {
    name.len() <= 128 && IDENTIFIER.is_match(name)
}

/// Outcome of validating one query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryValidation {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

impl QueryValidation {
    fn from_errors(errors: Vec<String>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
        }
    }
}

/// Trait for validation rules (Chain of Responsibility pattern)
pub trait QueryRule: Send + Sync {
    fn check(&self, descriptor: &QueryDescriptor, rendered: &str, errors: &mut Vec<String>);
}

/// Every embedded entity/field name must match the identifier grammar
#[derive(Debug, Clone, Default)]
pub struct IdentifierRule;

impl QueryRule for IdentifierRule {
    fn check(&self, descriptor: &QueryDescriptor, _rendered: &str, errors: &mut Vec<String>) {
        for name in descriptor.identifiers() {
            if !is_valid_identifier(name) {
                errors.push(format!("'{}' is not a valid identifier", name));
            }
        }
    }
}

/// Page windows must be expressible as platform pages
#[derive(Debug, Clone, Default)]
pub struct PagingRule;

impl QueryRule for PagingRule {
    fn check(&self, descriptor: &QueryDescriptor, _rendered: &str, errors: &mut Vec<String>) {
        match descriptor.page_size {
            Some(0) => errors.push("page size must be greater than zero".to_string()),
            Some(size) if descriptor.offset % size != 0 => errors.push(format!(
                "offset {} is not aligned to page size {}",
                descriptor.offset, size
            )),
            None if descriptor.offset > 0 => {
                errors.push("offset requires a page size".to_string())
            }
            _ => {}
        }

        if descriptor.count_only && descriptor.page_size.is_some() {
            errors.push("count queries cannot be paged".to_string());
        }
    }
}

/// Conditions carry the number of values their operator expects
#[derive(Debug, Clone, Default)]
pub struct ConditionRule;

impl QueryRule for ConditionRule {
    fn check(&self, descriptor: &QueryDescriptor, _rendered: &str, errors: &mut Vec<String>) {
        for filter in &descriptor.filters {
            match filter.operator.arity() {
                None if filter.values.is_empty() => errors.push(format!(
                    "'{}' filter on '{}' needs at least one value",
                    filter.operator.fetch_name(),
                    filter.field
                )),
                Some(n) if filter.values.len() != n => errors.push(format!(
                    "'{}' filter on '{}' expects {} value(s), got {}",
                    filter.operator.fetch_name(),
                    filter.field,
                    n,
                    filter.values.len()
                )),
                _ => {}
            }

            if filter.operator == ConditionOperator::In
                && filter.values.iter().any(|v| v.to_string().is_empty())
            {
                errors.push(format!("'in' filter on '{}' contains an empty value", filter.field));
            }
        }

        if let Some(parent) = &descriptor.parent {
            if parent.id.trim().is_empty() {
                errors.push(format!("parent scope on '{}' has an empty id", parent.field));
            }
        }
    }
}

/// The rendered text must be a single well-formed `fetch` element
#[derive(Debug, Clone, Default)]
pub struct StructureRule;

impl QueryRule for StructureRule {
    fn check(&self, _descriptor: &QueryDescriptor, rendered: &str, errors: &mut Vec<String>) {
        if let Err(problem) = check_balanced(rendered) {
            errors.push(format!("malformed query text: {}", problem));
        }
    }
}

/// Main query validator using Chain of Responsibility
pub struct QueryValidator {
    rules: Vec<Box<dyn QueryRule>>,
}

impl QueryValidator {
    /// Create validator with default rules
    pub fn new() -> Self {
        Self {
            rules: vec![
                Box::new(IdentifierRule),
                Box::new(PagingRule),
                Box::new(ConditionRule),
                Box::new(StructureRule),
            ],
        }
    }

    /// Create validator with custom rules
    pub fn with_rules(rules: Vec<Box<dyn QueryRule>>) -> Self {
        Self { rules }
    }

    pub fn validate(&self, descriptor: &QueryDescriptor, rendered: &str) -> QueryValidation {
        let mut errors = Vec::new();
        for rule in &self.rules {
            rule.check(descriptor, rendered, &mut errors);
        }
        QueryValidation::from_errors(errors)
    }
}

impl Default for QueryValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// Minimal tag-balance scan: every opened element closes in order and the
/// document has exactly one root named `fetch`.
fn check_balanced(text: &str) -> Result<(), String> {
    let mut stack: Vec<&str> = Vec::new();
    let mut roots = 0usize;
    let mut rest = text.trim();

    if rest.is_empty() {
        return Err("empty query".to_string());
    }

    while let Some(start) = rest.find('<') {
        let end = rest[start..]
            .find('>')
            .map(|i| start + i)
            .ok_or_else(|| "unterminated tag".to_string())?;
        let tag = &rest[start + 1..end];

        if let Some(name) = tag.strip_prefix('/') {
            let name = name.trim();
            match stack.pop() {
                Some(open) if open == name => {}
                Some(open) => return Err(format!("expected </{}>, found </{}>", open, name)),
                None => return Err(format!("unexpected </{}>", name)),
            }
        } else {
            let self_closing = tag.ends_with('/');
            let name = tag
                .trim_end_matches('/')
                .split_whitespace()
                .next()
                .ok_or_else(|| "empty tag".to_string())?;
            if stack.is_empty() {
                roots += 1;
                if name != "fetch" {
                    return Err(format!("root element must be <fetch>, found <{}>", name));
                }
                if self_closing {
                    return Err("<fetch> has no entity".to_string());
                }
            }
            if !self_closing {
                stack.push(name);
            }
        }

        rest = &rest[end + 1..];
    }

    if let Some(open) = stack.pop() {
        return Err(format!("<{}> is never closed", open));
    }
    if roots != 1 {
        return Err(format!("expected one root element, found {}", roots));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::descriptor::Filter;

    #[test]
    fn test_identifier_grammar() {
        assert!(is_valid_identifier("cr_question"));
        assert!(is_valid_identifier("_internal"));
        assert!(is_valid_identifier("Study2"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("2study"));
        assert!(!is_valid_identifier("study-ref"));
        assert!(!is_valid_identifier("name\" or 1=1"));
    }

    #[test]
    fn test_balanced_documents() {
        assert!(check_balanced(r#"<fetch><entity name="a"><attribute name="b" /></entity></fetch>"#).is_ok());
        assert!(check_balanced(r#"<fetch><entity name="a"></fetch></entity>"#).is_err());
        assert!(check_balanced(r#"<fetch><entity name="a">"#).is_err());
        assert!(check_balanced(r#"<entity name="a"></entity>"#).is_err());
        assert!(check_balanced(r#"<fetch><entity name="a"></entity></fetch><fetch></fetch>"#).is_err());
        assert!(check_balanced("").is_err());
    }

    #[test]
    fn test_rules_collect_every_problem() {
        let validator = QueryValidator::new();
        let descriptor = QueryDescriptor::new("bad-entity")
            .filter(Filter::in_list::<Vec<String>, String>("studyid", vec![]))
            .page(10, 25);
        let result = validator.validate(&descriptor, "<fetch><entity name=\"x\"></entity></fetch>");

        assert!(!result.is_valid);
        assert_eq!(result.errors.len(), 3);
        assert!(result.errors[0].contains("bad-entity"));
        assert!(result.errors[1].contains("not aligned"));
        assert!(result.errors[2].contains("at least one value"));
    }

    #[test]
    fn test_custom_rule_chain() {
        let validator = QueryValidator::with_rules(vec![Box::new(IdentifierRule)]);
        let descriptor = QueryDescriptor::new("study").page(3, 2);
        assert!(validator.validate(&descriptor, "").is_valid);
    }
}
