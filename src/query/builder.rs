//! Descriptor to fetch XML
//!
//! Renders `QueryDescriptor`s into the platform's fetch dialect, resolving
//! logical names through the `NamingResolver` and measuring the resulting
//! request URL against the configured limit.

use serde::Serialize;
use std::sync::Arc;

use super::descriptor::{ConditionOperator, Filter, QueryDescriptor};
use super::validator::{QueryValidation, QueryValidator};
use crate::config::{MatrixConfig, ServiceOptions};
use crate::core::{MatrixError, Result};
use crate::naming::NamingResolver;

/// Rendered, validated query ready for dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuiltQuery {
    /// Physical entity name.
    pub entity: String,
    pub entity_set: String,
    pub fetch_xml: String,
    pub url_length: usize,
    /// Descriptor with physical names, as rendered.
    pub descriptor: QueryDescriptor,
}

pub struct QueryBuilder {
    naming: Arc<NamingResolver>,
    validator: QueryValidator,
    base_url: String,
    max_url_length: usize,
}

impl QueryBuilder {
    pub fn new(naming: Arc<NamingResolver>, options: &ServiceOptions) -> Self {
        Self {
            naming,
            validator: QueryValidator::new(),
            base_url: options.base_url.trim_end_matches('/').to_string(),
            max_url_length: options.max_url_length,
        }
    }

    pub fn with_validator(mut self, validator: QueryValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn max_url_length(&self) -> usize {
        self.max_url_length
    }

    /// Version chains are only resolved when both linkage fields are configured.
    pub fn should_include_version_fields(config: &MatrixConfig) -> bool {
        config.column_parent_attr_field.is_some() && config.column_version_field.is_some()
    }

    /// Same descriptor with every logical name replaced by its physical name.
    pub fn resolve(&self, descriptor: &QueryDescriptor) -> QueryDescriptor {
        let entity = descriptor.entity.as_str();
        let field = |name: &str| self.naming.resolve_field(entity, name);

        let mut resolved = descriptor.clone();
        resolved.entity = self.naming.resolve_entity(entity);
        resolved.attributes = descriptor.attributes.iter().map(|a| field(a)).collect();
        for filter in &mut resolved.filters {
            filter.field = field(&filter.field);
        }
        for order in &mut resolved.orders {
            order.field = field(&order.field);
        }
        if let Some(parent) = &mut resolved.parent {
            parent.field = field(&parent.field);
        }
        resolved
    }

    /// Renders a descriptor as-is, without name resolution or validation.
    pub fn render(&self, descriptor: &QueryDescriptor) -> String {
        let mut xml = String::with_capacity(256);

        if descriptor.count_only {
            xml.push_str(r#"<fetch version="1.0" mapping="logical" aggregate="true">"#);
        } else {
            xml.push_str(r#"<fetch version="1.0" mapping="logical""#);
            if let Some(size) = descriptor.page_size.filter(|s| *s > 0) {
                let page = descriptor.offset / size + 1;
                xml.push_str(&format!(
                    r#" count="{}" page="{}" returntotalrecordcount="true""#,
                    size, page
                ));
            }
            xml.push('>');
        }

        xml.push_str(&format!(r#"<entity name="{}">"#, escape(&descriptor.entity)));

        if descriptor.count_only {
            let counted = descriptor
                .attributes
                .first()
                .cloned()
                .unwrap_or_else(|| format!("{}id", descriptor.entity));
            xml.push_str(&format!(
                r#"<attribute name="{}" alias="total" aggregate="count" />"#,
                escape(&counted)
            ));
        } else {
            if descriptor.all_attributes {
                xml.push_str("<all-attributes />");
            } else {
                for attribute in &descriptor.attributes {
                    xml.push_str(&format!(r#"<attribute name="{}" />"#, escape(attribute)));
                }
            }
            for order in &descriptor.orders {
                xml.push_str(&format!(
                    r#"<order attribute="{}" descending="{}" />"#,
                    escape(&order.field),
                    order.descending
                ));
            }
        }

        let filters = descriptor.effective_filters();
        if !filters.is_empty() {
            xml.push_str(r#"<filter type="and">"#);
            for filter in &filters {
                render_condition(&mut xml, filter);
            }
            xml.push_str("</filter>");
        }

        xml.push_str("</entity></fetch>");
        xml
    }

    /// Validates a descriptor (names already resolved) and its rendering.
    pub fn validate(&self, descriptor: &QueryDescriptor) -> QueryValidation {
        let rendered = self.render(descriptor);
        self.validator.validate(descriptor, &rendered)
    }

    /// Length of `{base_url}/{entity_set}?fetchXml={encoded}`.
    pub fn calculate_actual_url_length(&self, entity_set: &str, fetch_xml: &str) -> usize {
        self.base_url.len()
            + 1
            + entity_set.len()
            + "?fetchXml=".len()
            + urlencoding::encode(fetch_xml).len()
    }

    /// Resolve, validate, render and measure one query.
    pub fn build(&self, descriptor: &QueryDescriptor) -> Result<BuiltQuery> {
        let resolved = self.resolve(descriptor);
        let fetch_xml = self.render(&resolved);

        let validation = self.validator.validate(&resolved, &fetch_xml);
        if !validation.is_valid {
            return Err(MatrixError::InvalidQuery(validation.errors));
        }

        let entity_set = self.naming.entity_set_name(&descriptor.entity);
        let url_length = self.calculate_actual_url_length(&entity_set, &fetch_xml);
        if url_length > self.max_url_length {
            return Err(MatrixError::UrlTooLong {
                length: url_length,
                limit: self.max_url_length,
            });
        }

        Ok(BuiltQuery {
            entity: resolved.entity.clone(),
            entity_set,
            fetch_xml,
            url_length,
            descriptor: resolved,
        })
    }

    /// Aggregate count over the descriptor's entity and filters.
    pub fn build_count(&self, descriptor: &QueryDescriptor) -> Result<BuiltQuery> {
        self.build(&descriptor.to_count())
    }

    /// Splits identifiers into `in`-filter sized chunks.
    pub fn chunk_ids(ids: &[String], chunk_size: usize) -> Vec<Vec<String>> {
        ids.chunks(chunk_size.max(1)).map(<[String]>::to_vec).collect()
    }
}

fn render_condition(xml: &mut String, filter: &Filter) {
    let field = escape(&filter.field);
    let operator = filter.operator.fetch_name();
    match filter.operator {
        ConditionOperator::In => {
            xml.push_str(&format!(
                r#"<condition attribute="{}" operator="{}">"#,
                field, operator
            ));
            for value in &filter.values {
                xml.push_str(&format!("<value>{}</value>", escape(&value.to_string())));
            }
            xml.push_str("</condition>");
        }
        ConditionOperator::Null | ConditionOperator::NotNull => {
            xml.push_str(&format!(
                r#"<condition attribute="{}" operator="{}" />"#,
                field, operator
            ));
        }
        _ => {
            let value = filter
                .values
                .first()
                .map(|v| v.to_string())
                .unwrap_or_default();
            xml.push_str(&format!(
                r#"<condition attribute="{}" operator="{}" value="{}" />"#,
                field,
                operator,
                escape(&value)
            ));
        }
    }
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}
