use futures::future::join_all;
use serde::Serialize;
use serde_json::{Value as JsonValue, json};
use tracing::{Instrument, Level, event, info_span};

use super::MatrixDataService;
use crate::config::MatrixConfig;
use crate::core::{BatchOperation, JunctionCreate, JunctionRecord, MatrixError, Record, Result};
use crate::query::{
    ACTIVE_STATE, ACTIVE_STATUS_REASON, Filter, INACTIVE_STATE, INACTIVE_STATUS_REASON, QueryDescriptor,
    STATE_FIELD, STATUS_REASON_FIELD,
};

/// One planned write against the junction entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WriteOperation {
    Create { row_id: String, column_id: String },
    /// A create whose pair exists as an inactive record.
    Reactivate { id: String, row_id: String, column_id: String },
    Update { id: String, row_id: String, column_id: String },
    /// Soft delete.
    Deactivate { id: String },
}

impl WriteOperation {
    fn operation_name(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create_junction",
            Self::Reactivate { .. } => "reactivate_junction",
            Self::Update { .. } => "update_junction",
            Self::Deactivate { .. } => "deactivate_junction",
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Create { row_id, column_id } => format!("create {}/{}", row_id, column_id),
            Self::Reactivate { id, .. } => format!("reactivate {}", id),
            Self::Update { id, .. } => format!("update {}", id),
            Self::Deactivate { id } => format!("delete {}", id),
        }
    }
}

/// Undo action for one successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Compensation {
    Remove(String),
    Deactivate(String),
    Reactivate(String),
}

enum CreatePlan {
    AlreadyActive(JunctionRecord),
    Write(WriteOperation),
}

struct Applied {
    id: String,
    compensation: Option<Compensation>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSaveResult {
    pub success: bool,
    /// One message per failed platform call.
    pub errors: Vec<String>,
    /// Creates whose pair was already active; nothing was written for them.
    pub conflicts: Vec<JunctionCreate>,
    /// Operations never attempted because a rollback stopped the batch.
    pub skipped: Vec<String>,
    /// Inserted or reactivated junctions that persisted. Writes undone by a
    /// rollback are not counted.
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub rolled_back: bool,
}

impl BatchSaveResult {
    pub fn applied(&self) -> usize {
        self.created + self.updated + self.deleted
    }

    fn record_success(&mut self, operation: &WriteOperation) {
        match operation {
            WriteOperation::Create { .. } | WriteOperation::Reactivate { .. } => self.created += 1,
            WriteOperation::Update { .. } => self.updated += 1,
            WriteOperation::Deactivate { .. } => self.deleted += 1,
        }
    }

    fn record_undone(&mut self, compensation: &Compensation) {
        match compensation {
            Compensation::Remove(_) | Compensation::Deactivate(_) => {
                self.created = self.created.saturating_sub(1)
            }
            Compensation::Reactivate(_) => self.deleted = self.deleted.saturating_sub(1),
        }
    }
}

impl MatrixDataService {
    /// Links a row and a column. An active junction for the pair is returned
    /// unchanged and an inactive one is reactivated, so callers must not
    /// assume an insert took place.
    pub async fn create_junction_record(
        &self,
        config: &MatrixConfig,
        row_id: &str,
        column_id: &str,
    ) -> Result<JunctionRecord> {
        self.begin(config)?;
        let operation = match self.plan_create(config, row_id, column_id).await? {
            CreatePlan::AlreadyActive(junction) => return Ok(junction),
            CreatePlan::Write(operation) => operation,
        };
        let applied = self.apply(config, &operation).await?;
        Ok(self.junction(config, applied.id, row_id, column_id))
    }

    pub async fn update_junction_record(
        &self,
        config: &MatrixConfig,
        id: &str,
        row_id: &str,
        column_id: &str,
    ) -> Result<JunctionRecord> {
        self.begin(config)?;
        let operation = WriteOperation::Update {
            id: id.to_string(),
            row_id: row_id.to_string(),
            column_id: column_id.to_string(),
        };
        let applied = self.apply(config, &operation).await?;
        Ok(self.junction(config, applied.id, row_id, column_id))
    }

    /// Soft delete: the junction is deactivated, not removed.
    pub async fn delete_junction_record(&self, config: &MatrixConfig, id: &str) -> Result<()> {
        self.begin(config)?;
        self.apply(config, &WriteOperation::Deactivate { id: id.to_string() })
            .await
            .map(|_| ())
    }

    /// Applies creates, then updates, then deletes. Items are independent:
    /// one failure never prevents its siblings from being attempted.
    pub async fn execute_batch_save(
        &self,
        config: &MatrixConfig,
        batch: &BatchOperation,
    ) -> Result<BatchSaveResult> {
        self.begin(config)?;
        let span = info_span!(
            "matrix.batch_save",
            junction_entity = %config.junction_entity_name,
            creates = batch.creates.len(),
            updates = batch.updates.len(),
            deletes = batch.deletes.len()
        );
        self.tracker
            .track("execute_batch_save", self.run_batch(config, batch))
            .instrument(span)
            .await
    }

    async fn run_batch(&self, config: &MatrixConfig, batch: &BatchOperation) -> Result<BatchSaveResult> {
        let mut result = BatchSaveResult::default();
        let mut compensations: Vec<Compensation> = Vec::new();
        let mut rollback = false;

        let plans = join_all(
            batch
                .creates
                .iter()
                .map(|create| self.plan_create(config, &create.row_id, &create.column_id)),
        )
        .await;

        let mut creates = Vec::new();
        for (create, plan) in batch.creates.iter().zip(plans) {
            match plan {
                Ok(CreatePlan::AlreadyActive(_)) => result.conflicts.push(create.clone()),
                Ok(CreatePlan::Write(operation)) => creates.push(operation),
                Err(err) => {
                    rollback |= err.requires_rollback();
                    result
                        .errors
                        .push(format!("create {}/{}: {}", create.row_id, create.column_id, err));
                }
            }
        }

        let updates: Vec<WriteOperation> = batch
            .updates
            .iter()
            .map(|update| WriteOperation::Update {
                id: update.id.clone(),
                row_id: update.row_id.clone(),
                column_id: update.column_id.clone(),
            })
            .collect();
        let deletes: Vec<WriteOperation> = batch
            .deletes
            .iter()
            .map(|id| WriteOperation::Deactivate { id: id.clone() })
            .collect();

        for group in [creates, updates, deletes] {
            if rollback {
                result
                    .skipped
                    .extend(group.iter().map(WriteOperation::describe));
                continue;
            }
            let outcomes = join_all(group.iter().map(|operation| self.apply(config, operation))).await;
            for (operation, outcome) in group.iter().zip(outcomes) {
                match outcome {
                    Ok(applied) => {
                        result.record_success(operation);
                        compensations.extend(applied.compensation);
                    }
                    Err(err) => {
                        rollback |= err.requires_rollback();
                        result.errors.push(format!("{}: {}", operation.describe(), err));
                    }
                }
            }
        }

        if rollback {
            for undone in self.roll_back(config, compensations).await {
                result.record_undone(&undone);
            }
            result.rolled_back = true;
        }

        result.success = !result.rolled_back && (result.errors.is_empty() || result.applied() > 0);

        event!(
            Level::INFO,
            success = result.success,
            created = result.created,
            updated = result.updated,
            deleted = result.deleted,
            conflicts = result.conflicts.len(),
            errors = result.errors.len(),
            skipped = result.skipped.len(),
            rolled_back = result.rolled_back,
            "batch save finished"
        );
        Ok(result)
    }

    /// Decides between insert, reactivation and no-op for one pair. The lookup
    /// bypasses the result cache.
    async fn plan_create(&self, config: &MatrixConfig, row_id: &str, column_id: &str) -> Result<CreatePlan> {
        let descriptor = QueryDescriptor::new(&config.junction_entity_name)
            .attribute(&config.junction_id_field)
            .attribute(&config.junction_row_field)
            .attribute(&config.junction_column_field)
            .attribute(STATE_FIELD)
            .filter(Filter::eq(&config.junction_row_field, row_id))
            .filter(Filter::eq(&config.junction_column_field, column_id));
        let query = self.queries.build(&descriptor)?;
        let page = self.fetch_uncached(&query, "find_junction").await?;

        let mut inactive = None;
        for record in &page.records {
            let junction = self.map_junction(config, record);
            if junction.id.is_empty() {
                continue;
            }
            if is_active(record) {
                return Ok(CreatePlan::AlreadyActive(junction));
            }
            inactive.get_or_insert(junction);
        }

        let (row_id, column_id) = (row_id.to_string(), column_id.to_string());
        Ok(CreatePlan::Write(match inactive {
            Some(junction) => WriteOperation::Reactivate {
                id: junction.id,
                row_id,
                column_id,
            },
            None => WriteOperation::Create { row_id, column_id },
        }))
    }

    /// Performs one write, then evicts every cached result of the junction entity.
    async fn apply(&self, config: &MatrixConfig, operation: &WriteOperation) -> Result<Applied> {
        let entity = self.naming.resolve_entity(&config.junction_entity_name);
        let name = operation.operation_name();

        let applied = self
            .tracker
            .track(name, async {
                let applied = match operation {
                    WriteOperation::Create { row_id, column_id } => {
                        let record = self.link_record(config, row_id, column_id);
                        let id = self
                            .platform
                            .create(&entity, record)
                            .await
                            .map_err(|err| self.translate(err, name))?;
                        Applied {
                            compensation: Some(Compensation::Remove(id.clone())),
                            id,
                        }
                    }
                    WriteOperation::Reactivate { id, .. } => {
                        self.set_state(&entity, id, true, name).await?;
                        Applied {
                            id: id.clone(),
                            compensation: Some(Compensation::Deactivate(id.clone())),
                        }
                    }
                    WriteOperation::Update { id, row_id, column_id } => {
                        let record = self.link_record(config, row_id, column_id);
                        self.platform
                            .update(&entity, id, record)
                            .await
                            .map_err(|err| self.translate(err, name))?;
                        Applied {
                            id: id.clone(),
                            compensation: None,
                        }
                    }
                    WriteOperation::Deactivate { id } => {
                        self.set_state(&entity, id, false, name).await?;
                        Applied {
                            id: id.clone(),
                            compensation: Some(Compensation::Reactivate(id.clone())),
                        }
                    }
                };
                Ok::<_, MatrixError>(applied)
            })
            .await?;

        let removed = self.cache.invalidate_entity(&entity);
        if self.debug_enabled(config) {
            event!(Level::DEBUG, operation = name, id = %applied.id, removed, "junction cache invalidated");
        }
        Ok(applied)
    }

    /// Runs compensations newest first and returns the ones that succeeded.
    /// Failures are logged and skipped.
    async fn roll_back(&self, config: &MatrixConfig, compensations: Vec<Compensation>) -> Vec<Compensation> {
        let entity = self.naming.resolve_entity(&config.junction_entity_name);
        event!(Level::WARN, entity = %entity, actions = compensations.len(), "rolling back batch");
        let mut undone = Vec::with_capacity(compensations.len());

        for compensation in compensations.into_iter().rev() {
            let outcome = match &compensation {
                Compensation::Remove(id) => self
                    .platform
                    .delete(&entity, id)
                    .await
                    .map_err(|err| self.translate(err, "rollback_delete")),
                Compensation::Deactivate(id) => self.set_state(&entity, id, false, "rollback_deactivate").await,
                Compensation::Reactivate(id) => self.set_state(&entity, id, true, "rollback_reactivate").await,
            };
            match outcome {
                Ok(()) => undone.push(compensation),
                Err(err) => {
                    event!(Level::ERROR, ?compensation, error = %err, "compensation failed");
                }
            }
        }
        self.cache.invalidate_entity(&entity);
        undone
    }

    async fn set_state(&self, entity: &str, id: &str, active: bool, operation: &str) -> Result<()> {
        let (state, reason) = if active {
            (ACTIVE_STATE, ACTIVE_STATUS_REASON)
        } else {
            (INACTIVE_STATE, INACTIVE_STATUS_REASON)
        };
        let mut record = Record::new();
        record.insert(STATE_FIELD.to_string(), json!(state));
        record.insert(STATUS_REASON_FIELD.to_string(), json!(reason));

        self.platform
            .update(entity, id, record)
            .await
            .map_err(|err| self.translate(err, operation))
    }

    /// Navigation binds pointing the junction at its row and column.
    fn link_record(&self, config: &MatrixConfig, row_id: &str, column_id: &str) -> Record {
        let junction = config.junction_entity_name.as_str();
        let mut record = Record::new();
        record.insert(
            self.naming.bind_key(junction, &config.junction_row_field),
            JsonValue::String(self.naming.bind_value(&config.row_entity_name, row_id)),
        );
        record.insert(
            self.naming.bind_key(junction, &config.junction_column_field),
            JsonValue::String(self.naming.bind_value(&config.column_entity_name, column_id)),
        );
        record
    }

    fn junction(&self, config: &MatrixConfig, id: String, row_id: &str, column_id: &str) -> JunctionRecord {
        JunctionRecord {
            id,
            row_id: row_id.to_string(),
            column_id: column_id.to_string(),
            entity_name: config.junction_entity_name.clone(),
        }
    }
}

/// Records without a state field count as active.
fn is_active(record: &Record) -> bool {
    match record.get(STATE_FIELD) {
        Some(JsonValue::Number(n)) => n.as_i64() == Some(ACTIVE_STATE),
        Some(JsonValue::String(s)) => s.trim().parse::<i64>().ok() == Some(ACTIVE_STATE),
        _ => true,
    }
}
