use chrono::{NaiveDate, Utc};
use sea_orm::{
    sea_query::OnConflict, ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait,
    DatabaseConnection, DbBackend, EntityTrait, QueryFilter, QuerySelect, TransactionTrait,
};
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::{
    entities::{
        batch::{self, Entity as BatchEntity},
        batch_number_config::{self, Entity as BatchNumberConfigEntity, ResetPolicy},
        batch_number_sequence::{self, Entity as BatchNumberSequenceEntity},
    },
    errors::ServiceError,
};

const FALLBACK_RECEIPT_SEQ_LENGTH: usize = 3;
const SPLIT_SUFFIX_PLACEHOLDER: &str = "{n}";

/// Deterministic, configurable batch code generation with per-key atomic
/// sequence counters.
///
/// Generation never fails for missing configuration; it falls back to fixed
/// patterns. Only genuine storage failures propagate.
#[derive(Clone)]
pub struct BatchNumberService {
    db: Arc<DatabaseConnection>,
}

impl BatchNumberService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Generates a batch number for production output, consuming a sequence
    /// value. Runs in its own transaction.
    #[instrument(skip(self))]
    pub async fn generate(
        &self,
        operation_type: &str,
        material_id: Option<Uuid>,
        product_sku: Option<&str>,
    ) -> Result<String, ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        let number = self
            .generate_in(&txn, operation_type, material_id, product_sku)
            .await?;
        txn.commit().await.map_err(ServiceError::db_error)?;
        Ok(number)
    }

    /// Generates a batch number on the caller's connection, so the increment
    /// commits or rolls back with the caller's transaction.
    pub async fn generate_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        operation_type: &str,
        material_id: Option<Uuid>,
        product_sku: Option<&str>,
    ) -> Result<String, ServiceError> {
        let config = resolve_config(conn, Some(operation_type), material_id, product_sku).await?;
        match config {
            Some(config) => {
                let op_code = op_code(operation_type, config.op_code_length);
                let number = self.assemble(conn, &config, &op_code, true).await?;
                metrics::counter!("mes_batch_numbers_generated_total", 1);
                Ok(number)
            }
            None => Ok(fallback_number(operation_type)),
        }
    }

    /// Computes the number the next `generate` call would return without
    /// consuming the sequence value.
    #[instrument(skip(self))]
    pub async fn preview(
        &self,
        operation_type: &str,
        material_id: Option<Uuid>,
        product_sku: Option<&str>,
    ) -> Result<String, ServiceError> {
        let conn = &*self.db;
        let config = resolve_config(conn, Some(operation_type), material_id, product_sku).await?;
        match config {
            Some(config) => {
                let op_code = op_code(operation_type, config.op_code_length);
                self.assemble(conn, &config, &op_code, false).await
            }
            None => Ok(fallback_number(operation_type)),
        }
    }

    /// Split numbers append a two-digit index suffix to a freshly generated
    /// base number.
    #[instrument(skip(self))]
    pub async fn generate_split(
        &self,
        operation_type: &str,
        material_id: Option<Uuid>,
        product_sku: Option<&str>,
        split_index: u32,
    ) -> Result<String, ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        let config = resolve_config(&txn, Some(operation_type), material_id, product_sku).await?;
        let base = self
            .generate_in(&txn, operation_type, material_id, product_sku)
            .await?;
        txn.commit().await.map_err(ServiceError::db_error)?;

        let suffix_format = config.and_then(|c| c.split_suffix_format);
        Ok(append_split_suffix(&base, split_index, suffix_format.as_deref()))
    }

    /// Merge numbers use a MERGE-scoped config when one exists, else a
    /// millisecond-timestamp fallback.
    #[instrument(skip(self))]
    pub async fn generate_merge(
        &self,
        material_id: Option<Uuid>,
        product_sku: Option<&str>,
    ) -> Result<String, ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        let config = resolve_config(&txn, Some("MERGE"), material_id, product_sku).await?;
        let number = match config {
            Some(config) => {
                let op_code = op_code("MERGE", config.op_code_length);
                self.assemble(&txn, &config, &op_code, true).await?
            }
            None => format!(
                "MERGE-{}-{}",
                Utc::now().format("%Y%m%d"),
                Utc::now().timestamp_millis() % 100_000
            ),
        };
        txn.commit().await.map_err(ServiceError::db_error)?;
        Ok(number)
    }

    /// Receipt numbers key on the material code rather than an operation
    /// type. Without configuration the sequence is derived by scanning
    /// existing numbers sharing the computed prefix.
    #[instrument(skip(self))]
    pub async fn generate_receipt(
        &self,
        material_id: Option<Uuid>,
        material_code: &str,
        date: NaiveDate,
        supplier_lot: Option<&str>,
    ) -> Result<String, ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        let config = resolve_config(&txn, Some("RECEIPT"), material_id, None).await?;
        let number = match config {
            Some(config) => {
                let code = truncate_upper(material_code, config.op_code_length.max(0) as usize);
                self.assemble(&txn, &config, &code, true).await?
            }
            None => {
                let prefix = format!("RM-{}-{}-", material_code.to_uppercase(), date.format("%Y%m%d"));
                let next = next_by_prefix_scan(&txn, &prefix).await?;
                format!("{}{:0width$}", prefix, next, width = FALLBACK_RECEIPT_SEQ_LENGTH)
            }
        };
        txn.commit().await.map_err(ServiceError::db_error)?;
        let _ = supplier_lot;
        Ok(number)
    }

    /// Assembles `prefix [+ sep + opCode] [+ sep + date] + sep + sequence`
    /// for a resolved config, consuming the counter when `consume` is set.
    async fn assemble<C: ConnectionTrait>(
        &self,
        conn: &C,
        config: &batch_number_config::Model,
        op_code: &str,
        consume: bool,
    ) -> Result<String, ServiceError> {
        let now = Utc::now();
        let sep = &config.separator;
        let mut number = config.prefix.clone();
        if config.include_op_code && !op_code.is_empty() {
            number.push_str(sep);
            number.push_str(op_code);
        }
        if let Some(format) = &config.date_format {
            number.push_str(sep);
            number.push_str(&now.format(format).to_string());
        }

        let key = sequence_key(config)?;
        let sequence = if consume {
            next_sequence(conn, config.id, &key).await?
        } else {
            peek_sequence(conn, config.id, &key).await?
        };

        number.push_str(sep);
        number.push_str(&format!(
            "{:0width$}",
            sequence,
            width = config.sequence_length.max(1) as usize
        ));
        debug!(config = %config.name, key = %key, sequence, "assembled batch number");
        Ok(number)
    }
}

/// Resolves the applicable ACTIVE config by precedence: exact
/// (operation_type, material, sku) > (operation_type, material) >
/// (operation_type, sku) > operation_type only > default. Ties break by
/// lowest priority.
pub async fn resolve_config<C: ConnectionTrait>(
    conn: &C,
    operation_type: Option<&str>,
    material_id: Option<Uuid>,
    product_sku: Option<&str>,
) -> Result<Option<batch_number_config::Model>, ServiceError> {
    let candidates = BatchNumberConfigEntity::find()
        .filter(batch_number_config::Column::Status.eq("ACTIVE"))
        .all(conn)
        .await
        .map_err(ServiceError::db_error)?;

    let mut best: Option<(i32, batch_number_config::Model)> = None;
    for config in candidates {
        let Some(score) = specificity(&config, operation_type, material_id, product_sku) else {
            continue;
        };
        let better = match &best {
            None => true,
            Some((best_score, best_config)) => {
                score > *best_score || (score == *best_score && config.priority < best_config.priority)
            }
        };
        if better {
            best = Some((score, config));
        }
    }
    Ok(best.map(|(_, config)| config))
}

fn specificity(
    config: &batch_number_config::Model,
    operation_type: Option<&str>,
    material_id: Option<Uuid>,
    product_sku: Option<&str>,
) -> Option<i32> {
    let mut score = 0;
    match (&config.operation_type, operation_type) {
        (Some(co), Some(ro)) if co == ro => score += 4,
        (Some(_), _) => return None,
        (None, _) => {}
    }
    match (config.material_id, material_id) {
        (Some(cm), Some(rm)) if cm == rm => score += 2,
        (Some(_), _) => return None,
        (None, _) => {}
    }
    match (&config.product_sku, product_sku) {
        (Some(cs), Some(rs)) if cs == rs => score += 1,
        (Some(_), _) => return None,
        (None, _) => {}
    }
    Some(score)
}

/// Counter key per the config's reset policy. A new key starts a new counter,
/// which is how daily/monthly/yearly resets happen without ever rewinding an
/// existing counter.
fn sequence_key(config: &batch_number_config::Model) -> Result<String, ServiceError> {
    let policy: ResetPolicy = config.reset_policy.parse().map_err(|_| {
        ServiceError::InternalError(format!(
            "batch number config {} has unrecognized reset policy '{}'",
            config.name, config.reset_policy
        ))
    })?;
    let now = Utc::now();
    Ok(match policy {
        ResetPolicy::Never => config.prefix.clone(),
        ResetPolicy::Yearly => format!("{}:{}", config.prefix, now.format("%Y")),
        ResetPolicy::Monthly => format!("{}:{}", config.prefix, now.format("%Y%m")),
        ResetPolicy::Daily => format!("{}:{}", config.prefix, now.format("%Y%m%d")),
    })
}

/// Get-or-create-then-increment under a row lock. The upsert is
/// conflict-tolerant, so two concurrent first calls for a key cannot both
/// insert; the subsequent locked read serializes the increment itself.
pub async fn next_sequence<C: ConnectionTrait>(
    conn: &C,
    config_id: Uuid,
    key: &str,
) -> Result<i64, ServiceError> {
    let seed = batch_number_sequence::ActiveModel {
        id: Set(Uuid::new_v4()),
        config_id: Set(config_id),
        sequence_key: Set(key.to_owned()),
        last_value: Set(0),
        updated_at: Set(Utc::now()),
    };
    BatchNumberSequenceEntity::insert(seed)
        .on_conflict(
            OnConflict::columns([
                batch_number_sequence::Column::ConfigId,
                batch_number_sequence::Column::SequenceKey,
            ])
            .do_nothing()
            .to_owned(),
        )
        .exec_without_returning(conn)
        .await
        .map_err(ServiceError::db_error)?;

    let mut query = BatchNumberSequenceEntity::find()
        .filter(batch_number_sequence::Column::ConfigId.eq(config_id))
        .filter(batch_number_sequence::Column::SequenceKey.eq(key));
    // SQLite serializes writers on its own and rejects FOR UPDATE syntax.
    if conn.get_database_backend() == DbBackend::Postgres {
        query = query.lock_exclusive();
    }
    let row = query
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| {
            ServiceError::InternalError(format!(
                "sequence row missing after upsert for config {} key {}",
                config_id, key
            ))
        })?;

    let next = row.last_value + 1;
    let mut active: batch_number_sequence::ActiveModel = row.into();
    active.last_value = Set(next);
    active.updated_at = Set(Utc::now());
    active.update(conn).await.map_err(ServiceError::db_error)?;
    Ok(next)
}

/// Reads the next sequence value without persisting the increment.
pub async fn peek_sequence<C: ConnectionTrait>(
    conn: &C,
    config_id: Uuid,
    key: &str,
) -> Result<i64, ServiceError> {
    let row = BatchNumberSequenceEntity::find()
        .filter(batch_number_sequence::Column::ConfigId.eq(config_id))
        .filter(batch_number_sequence::Column::SequenceKey.eq(key))
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?;
    Ok(row.map(|r| r.last_value).unwrap_or(0) + 1)
}

/// Max+1 over existing batch numbers sharing a prefix; used only by the
/// no-config receipt fallback.
async fn next_by_prefix_scan<C: ConnectionTrait>(
    conn: &C,
    prefix: &str,
) -> Result<i64, ServiceError> {
    let existing: Vec<String> = BatchEntity::find()
        .filter(batch::Column::BatchNumber.starts_with(prefix))
        .all(conn)
        .await
        .map_err(ServiceError::db_error)?
        .into_iter()
        .map(|b| b.batch_number)
        .collect();

    let max = existing
        .iter()
        .filter_map(|number| number.strip_prefix(prefix))
        .filter_map(|suffix| suffix.parse::<i64>().ok())
        .max()
        .unwrap_or(0);
    Ok(max + 1)
}

fn op_code(operation_type: &str, length: i32) -> String {
    truncate_upper(operation_type, length.max(0) as usize)
}

fn truncate_upper(value: &str, length: usize) -> String {
    value.chars().take(length).collect::<String>().to_uppercase()
}

/// Fixed pattern used when no configuration matches.
fn fallback_number(operation_type: &str) -> String {
    let now = Utc::now();
    format!(
        "BATCH-{}-{}-{:05}",
        truncate_upper(operation_type, 2),
        now.format("%Y%m%d"),
        now.timestamp_millis() % 100_000
    )
}

pub fn append_split_suffix(base: &str, split_index: u32, suffix_format: Option<&str>) -> String {
    match suffix_format {
        Some(format) if format.contains(SPLIT_SUFFIX_PLACEHOLDER) => format!(
            "{}{}",
            base,
            format.replace(SPLIT_SUFFIX_PLACEHOLDER, &format!("{:02}", split_index))
        ),
        _ => format!("{}-S{:02}", base, split_index),
    }
}
