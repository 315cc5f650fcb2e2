use futures::future::try_join_all;
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use tracing::{Instrument, Level, event, info_span};

use super::MatrixDataService;
use crate::config::MatrixConfig;
use crate::core::{
    ColumnEntity, EntityPage, JunctionRecord, MatrixData, MatrixError, Record, Result, RowEntity,
    StatusCode,
};
use crate::query::{Filter, QueryBuilder, QueryDescriptor};

/// Page size used when following every page of a junction query.
const JUNCTION_PAGE_SIZE: usize = 5_000;

/// Names describing one axis of the matrix.
struct AxisFields<'a> {
    entity: &'a str,
    id_field: &'a str,
    display_field: &'a str,
    parent_field: Option<&'a str>,
    extra: Vec<&'a str>,
}

impl<'a> AxisFields<'a> {
    fn rows(config: &'a MatrixConfig) -> Self {
        Self {
            entity: &config.row_entity_name,
            id_field: &config.row_id_field,
            display_field: &config.row_display_field,
            parent_field: config.row_parent_field.as_deref(),
            extra: Vec::new(),
        }
    }

    fn columns(config: &'a MatrixConfig) -> Self {
        let mut extra: Vec<&str> = config.column_status_field.iter().map(String::as_str).collect();
        if QueryBuilder::should_include_version_fields(config) {
            extra.extend(config.column_parent_attr_field.as_deref());
            extra.extend(config.column_version_field.as_deref());
        }
        Self {
            entity: &config.column_entity_name,
            id_field: &config.column_id_field,
            display_field: &config.column_display_field,
            parent_field: config.column_parent_field.as_deref(),
            extra,
        }
    }
}

/// Records of one axis page plus the figures needed for pagination.
struct AxisPage {
    records: Vec<Record>,
    total_count: usize,
    has_more: bool,
}

impl MatrixDataService {
    /// First page of rows and columns, the junctions between them and the
    /// caller's edit permission.
    pub async fn load_initial_matrix_data(
        &self,
        config: &MatrixConfig,
        parent_id: Option<&str>,
    ) -> Result<MatrixData> {
        self.begin(config)?;
        let span = info_span!(
            "matrix.load",
            row_entity = %config.row_entity_name,
            column_entity = %config.column_entity_name,
            junction_entity = %config.junction_entity_name
        );
        self.tracker
            .track("load_initial_data", self.load_initial(config, parent_id))
            .instrument(span)
            .await
    }

    pub async fn load_more_rows(
        &self,
        config: &MatrixConfig,
        offset: usize,
        parent_id: Option<&str>,
    ) -> Result<EntityPage<RowEntity>> {
        self.begin(config)?;
        self.row_page(config, offset, parent_id).await
    }

    /// Next page of columns. With version fields configured only the visible
    /// members of the page are returned; `total_count` stays the raw total.
    pub async fn load_more_columns(
        &self,
        config: &MatrixConfig,
        offset: usize,
        parent_id: Option<&str>,
    ) -> Result<EntityPage<ColumnEntity>> {
        self.begin(config)?;
        let mut page = self.column_page(config, offset, parent_id).await?;
        if QueryBuilder::should_include_version_fields(config) {
            page.items = self.versions.process_columns(&page.items).visible_columns;
        }
        Ok(page)
    }

    /// Active junctions linking the given rows and columns.
    pub async fn load_junction_records_for_entities(
        &self,
        config: &MatrixConfig,
        rows: &[RowEntity],
        columns: &[ColumnEntity],
    ) -> Result<Vec<JunctionRecord>> {
        self.begin(config)?;
        self.junctions_for(config, rows, columns).await
    }

    async fn load_initial(&self, config: &MatrixConfig, parent_id: Option<&str>) -> Result<MatrixData> {
        let (rows, columns) = tokio::try_join!(
            self.row_page(config, 0, parent_id),
            self.column_page(config, 0, parent_id)
        )?;

        let raw_columns = columns.items;
        let (visible_columns, hidden_column_count, version_analysis) =
            if QueryBuilder::should_include_version_fields(config) {
                let chains = self.versions.process_columns(&raw_columns);
                let analysis = self.versions.analyze_chains(&raw_columns);
                (chains.visible_columns, chains.hidden_columns.len(), Some(analysis))
            } else {
                (raw_columns.clone(), 0, None)
            };

        let junctions = self.junctions_for(config, &rows.items, &visible_columns).await?;
        let can_edit = self.check_write_permission(&config.junction_entity_name).await?;

        event!(
            Level::INFO,
            rows = rows.items.len(),
            columns = visible_columns.len(),
            hidden_columns = hidden_column_count,
            junctions = junctions.len(),
            can_edit,
            "matrix loaded"
        );

        Ok(MatrixData {
            rows: rows.items,
            columns: visible_columns,
            junctions,
            total_row_count: rows.total_count,
            total_column_count: columns.total_count,
            has_more_rows: rows.has_more,
            has_more_columns: columns.has_more,
            can_edit,
            raw_columns,
            hidden_column_count,
            version_analysis,
        })
    }

    async fn row_page(
        &self,
        config: &MatrixConfig,
        offset: usize,
        parent_id: Option<&str>,
    ) -> Result<EntityPage<RowEntity>> {
        self.tracker
            .track("load_rows", async {
                let fields = AxisFields::rows(config);
                let page = self.axis_page(config, &fields, offset, parent_id, "rows").await?;
                Ok::<_, MatrixError>(EntityPage {
                    items: page
                        .records
                        .iter()
                        .filter_map(|record| self.map_row(config, record))
                        .collect(),
                    offset,
                    fetched: page.records.len(),
                    total_count: page.total_count,
                    has_more: page.has_more,
                })
            })
            .await
    }

    async fn column_page(
        &self,
        config: &MatrixConfig,
        offset: usize,
        parent_id: Option<&str>,
    ) -> Result<EntityPage<ColumnEntity>> {
        self.tracker
            .track("load_columns", async {
                let fields = AxisFields::columns(config);
                let page = self.axis_page(config, &fields, offset, parent_id, "columns").await?;
                Ok::<_, MatrixError>(EntityPage {
                    items: page
                        .records
                        .iter()
                        .filter_map(|record| self.map_column(config, record))
                        .collect(),
                    offset,
                    fetched: page.records.len(),
                    total_count: page.total_count,
                    has_more: page.has_more,
                })
            })
            .await
    }

    /// Active records of one axis, ordered by display name then id so pages
    /// never overlap.
    async fn axis_page(
        &self,
        config: &MatrixConfig,
        fields: &AxisFields<'_>,
        offset: usize,
        parent_id: Option<&str>,
        axis: &str,
    ) -> Result<AxisPage> {
        let mut descriptor = QueryDescriptor::new(fields.entity)
            .attribute(fields.id_field)
            .attribute(fields.display_field)
            .attributes(fields.extra.iter().copied());

        match (fields.parent_field, parent_id) {
            (Some(field), Some(id)) => descriptor = descriptor.attribute(field).parent(field, id),
            (Some(field), None) => descriptor = descriptor.attribute(field),
            (None, Some(id)) => {
                event!(Level::DEBUG, axis, parent_id = id, "no parent field configured, parent ignored");
            }
            (None, None) => {}
        }

        let descriptor = descriptor
            .order_by(fields.display_field, false)
            .order_by(fields.id_field, false)
            .page(offset, self.options.page_size)
            .active_only();

        let query = self.queries.build(&descriptor)?;
        if self.debug_enabled(config) {
            event!(
                Level::DEBUG,
                axis,
                entity = %query.entity,
                url_length = query.url_length,
                fetch_xml = %query.fetch_xml,
                "axis query built"
            );
        }

        let page = self.fetch(&query, &format!("retrieve_{}", axis)).await?;
        let total_count = match page.total_count {
            Some(total) => total,
            None => self.count(&descriptor, &format!("count_{}", axis)).await?,
        };
        let has_more = page.more_records || offset + page.records.len() < total_count;

        Ok(AxisPage {
            records: page.records,
            total_count,
            has_more,
        })
    }

    async fn count(&self, descriptor: &QueryDescriptor, operation: &str) -> Result<usize> {
        let query = self.queries.build_count(descriptor)?;
        let page = self.fetch(&query, operation).await?;
        page.records
            .first()
            .and_then(|record| record.get("total"))
            .and_then(|total| match total {
                JsonValue::Number(n) => n.as_u64().map(|n| n as usize),
                JsonValue::String(s) => s.parse().ok(),
                _ => None,
            })
            .or(page.total_count)
            .ok_or_else(|| MatrixError::Serialization(format!("{} returned no total", operation)))
    }

    async fn junctions_for(
        &self,
        config: &MatrixConfig,
        rows: &[RowEntity],
        columns: &[ColumnEntity],
    ) -> Result<Vec<JunctionRecord>> {
        if rows.is_empty() || columns.is_empty() {
            return Ok(Vec::new());
        }

        self.tracker
            .track("load_junctions", async {
                let row_ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
                let column_ids: Vec<String> = columns.iter().map(|c| c.id.clone()).collect();
                let cells = rows.len() * columns.len();

                let records = if cells <= self.options.bulk_threshold {
                    event!(Level::DEBUG, cells, strategy = "batched", "loading junctions");
                    self.junctions_batched(config, &row_ids, &column_ids).await?
                } else {
                    event!(Level::DEBUG, cells, strategy = "bulk", "loading junctions");
                    self.fetch_all_pages(&self.junction_descriptor(config), "retrieve_junctions_bulk")
                        .await?
                };

                Ok::<_, MatrixError>(self.collect_junctions(config, &records, rows, columns))
            })
            .await
    }

    /// One query per chunk of row ids, all chunks in flight at once. A chunk
    /// size that overflows the URL limit is halved until it fits.
    async fn junctions_batched(
        &self,
        config: &MatrixConfig,
        row_ids: &[String],
        column_ids: &[String],
    ) -> Result<Vec<Record>> {
        let mut chunk_size = self.options.id_chunk_size;
        let descriptors = loop {
            match self.junction_chunks(config, row_ids, column_ids, chunk_size) {
                Ok(descriptors) => break descriptors,
                Err(MatrixError::UrlTooLong { length, limit }) if chunk_size > 1 => {
                    event!(Level::DEBUG, chunk_size, length, limit, "junction chunk too long, halving");
                    chunk_size /= 2;
                }
                Err(err) => return Err(err),
            }
        };

        let pages = try_join_all(
            descriptors
                .iter()
                .map(|descriptor| self.fetch_all_pages(descriptor, "retrieve_junctions")),
        )
        .await?;
        Ok(pages.into_iter().flatten().collect())
    }

    fn junction_chunks(
        &self,
        config: &MatrixConfig,
        row_ids: &[String],
        column_ids: &[String],
        chunk_size: usize,
    ) -> Result<Vec<QueryDescriptor>> {
        let base = self.junction_descriptor(config);
        let mut descriptors = Vec::new();

        for ids in QueryBuilder::chunk_ids(row_ids, chunk_size) {
            let scoped = base
                .clone()
                .filter(Filter::in_list(&config.junction_row_field, &ids));

            let descriptor = if column_ids.len() <= chunk_size {
                let narrowed = scoped
                    .clone()
                    .filter(Filter::in_list(&config.junction_column_field, column_ids));
                match self.queries.build(&first_page(&narrowed)) {
                    Ok(_) => narrowed,
                    Err(MatrixError::UrlTooLong { .. }) => scoped,
                    Err(err) => return Err(err),
                }
            } else {
                scoped
            };

            self.queries.build(&first_page(&descriptor))?;
            descriptors.push(descriptor);
        }
        Ok(descriptors)
    }

    fn junction_descriptor(&self, config: &MatrixConfig) -> QueryDescriptor {
        QueryDescriptor::new(&config.junction_entity_name)
            .attribute(&config.junction_id_field)
            .attribute(&config.junction_row_field)
            .attribute(&config.junction_column_field)
            .order_by(&config.junction_id_field, false)
            .active_only()
    }

    async fn fetch_all_pages(&self, descriptor: &QueryDescriptor, operation: &str) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        let mut offset = 0;
        loop {
            let query = self
                .queries
                .build(&descriptor.clone().page(offset, JUNCTION_PAGE_SIZE))?;
            let page = self.fetch(&query, operation).await?;
            let received = page.records.len();
            records.extend(page.records);
            if !page.more_records || received == 0 {
                return Ok(records);
            }
            offset += JUNCTION_PAGE_SIZE;
        }
    }

    /// Drops invalid and out-of-scope junctions and de-duplicates by id.
    fn collect_junctions(
        &self,
        config: &MatrixConfig,
        records: &[Record],
        rows: &[RowEntity],
        columns: &[ColumnEntity],
    ) -> Vec<JunctionRecord> {
        let row_ids: HashSet<&str> = rows.iter().map(|r| r.id.as_str()).collect();
        let column_ids: HashSet<&str> = columns.iter().map(|c| c.id.as_str()).collect();
        let mut seen = HashSet::new();
        let mut invalid = 0usize;
        let mut junctions = Vec::new();

        for record in records {
            let junction = self.map_junction(config, record);
            if !junction.is_valid() {
                invalid += 1;
                continue;
            }
            if !row_ids.contains(junction.row_id.as_str()) || !column_ids.contains(junction.column_id.as_str()) {
                continue;
            }
            if seen.insert(junction.id.clone()) {
                junctions.push(junction);
            }
        }

        if invalid > 0 {
            event!(
                Level::WARN,
                invalid,
                entity = %config.junction_entity_name,
                row_field = %config.junction_row_field,
                column_field = %config.junction_column_field,
                "junction records without a row or column link dropped"
            );
        }
        junctions
    }

    fn map_row(&self, config: &MatrixConfig, record: &Record) -> Option<RowEntity> {
        let entity = config.row_entity_name.as_str();
        let id = self.extract(record, entity, &config.row_id_field)?;
        let display_name = self
            .extract(record, entity, &config.row_display_field)
            .unwrap_or_else(|| id.clone());

        Some(RowEntity {
            parent_id: config
                .row_parent_field
                .as_deref()
                .and_then(|field| self.extract(record, entity, field)),
            status_code: None,
            entity_name: config.row_entity_name.clone(),
            id,
            display_name,
        })
    }

    fn map_column(&self, config: &MatrixConfig, record: &Record) -> Option<ColumnEntity> {
        let entity = config.column_entity_name.as_str();
        let field = |name: Option<&str>| name.and_then(|f| self.extract(record, entity, f));

        let id = self.extract(record, entity, &config.column_id_field)?;
        let display_name = self
            .extract(record, entity, &config.column_display_field)
            .unwrap_or_else(|| id.clone());

        Some(ColumnEntity {
            parent_id: field(config.column_parent_field.as_deref()),
            status_code: field(config.column_status_field.as_deref())
                .and_then(|status| StatusCode::from_json(&JsonValue::String(status))),
            version_parent_id: field(config.column_parent_attr_field.as_deref()),
            version_number: field(config.column_version_field.as_deref())
                .and_then(|number| number.parse().ok()),
            entity_name: config.column_entity_name.clone(),
            id,
            display_name,
        })
    }

    pub(super) fn map_junction(&self, config: &MatrixConfig, record: &Record) -> JunctionRecord {
        let entity = config.junction_entity_name.as_str();
        JunctionRecord {
            id: self
                .extract(record, entity, &config.junction_id_field)
                .unwrap_or_default(),
            row_id: self
                .extract(record, entity, &config.junction_row_field)
                .unwrap_or_default(),
            column_id: self
                .extract(record, entity, &config.junction_column_field)
                .unwrap_or_default(),
            entity_name: config.junction_entity_name.clone(),
        }
    }
}

fn first_page(descriptor: &QueryDescriptor) -> QueryDescriptor {
    descriptor.clone().page(0, JUNCTION_PAGE_SIZE)
}
