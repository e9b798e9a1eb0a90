//! Shared test fixtures: an in-memory SQLite database with the schema built
//! from the entity definitions, plus seed helpers.
#![allow(dead_code)]

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ConnectOptions, ConnectionTrait, Database,
    DatabaseConnection, DbBackend, Schema, Statement,
};
use std::sync::Arc;
use uuid::Uuid;

use mes_core::entities::{
    audit_event, batch, batch_number_config, batch_number_sequence, batch_relation,
    batch_size_config, hold_record, inventory, inventory_movement, operation, order_line_item,
    process, process_parameter_config, process_template, production_confirmation, routing,
    routing_step, template_step, unit_of_measure,
};
use mes_core::services::AppServices;

pub async fn setup_db() -> Arc<DatabaseConnection> {
    let mut options = ConnectOptions::new("sqlite::memory:".to_owned());
    options.max_connections(1);
    let db = Database::connect(options).await.expect("connect sqlite");

    let schema = Schema::new(DbBackend::Sqlite);
    let backend = db.get_database_backend();
    macro_rules! create {
        ($entity:expr) => {
            db.execute(backend.build(&schema.create_table_from_entity($entity)))
                .await
                .expect("create table");
        };
    }
    create!(inventory::Entity);
    create!(batch::Entity);
    create!(batch_relation::Entity);
    create!(operation::Entity);
    create!(process::Entity);
    create!(routing::Entity);
    create!(routing_step::Entity);
    create!(process_template::Entity);
    create!(template_step::Entity);
    create!(order_line_item::Entity);
    create!(hold_record::Entity);
    create!(production_confirmation::Entity);
    create!(inventory_movement::Entity);
    create!(batch_number_config::Entity);
    create!(batch_number_sequence::Entity);
    create!(batch_size_config::Entity);
    create!(process_parameter_config::Entity);
    create!(unit_of_measure::Entity);
    create!(audit_event::Entity);

    // The sequence upsert relies on this composite key.
    db.execute(Statement::from_string(
        DbBackend::Sqlite,
        "CREATE UNIQUE INDEX ux_batch_number_sequences_key \
         ON batch_number_sequences (config_id, sequence_key)"
            .to_owned(),
    ))
    .await
    .expect("create sequence index");

    Arc::new(db)
}

pub fn services(db: &Arc<DatabaseConnection>) -> AppServices {
    AppServices::new(db.clone(), None)
}

pub async fn seed_order_line_item(
    db: &DatabaseConnection,
    product_sku: &str,
    quantity: Decimal,
) -> order_line_item::Model {
    let now = Utc::now();
    order_line_item::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_id: Set(Uuid::new_v4()),
        product_sku: Set(product_sku.to_owned()),
        product_name: Set(format!("Product {}", product_sku)),
        product_material_id: Set(Uuid::new_v4()),
        quantity: Set(quantity),
        unit: Set("KG".to_owned()),
        status: Set("CREATED".to_owned()),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await
    .expect("seed order line item")
}

/// Seeds an ACTIVE template with sequential steps named OP-1..OP-n, all of
/// the given operation type and all producing output batches.
pub async fn seed_template(
    db: &DatabaseConnection,
    product_sku: &str,
    routing_type: &str,
    step_defs: &[(i32, bool)],
) -> process_template::Model {
    let now = Utc::now();
    let template = process_template::ActiveModel {
        id: Set(Uuid::new_v4()),
        product_sku: Set(product_sku.to_owned()),
        name: Set(format!("Template {}", product_sku)),
        version: Set(1),
        status: Set("ACTIVE".to_owned()),
        routing_type: Set(routing_type.to_owned()),
        effective_from: Set(None),
        effective_to: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await
    .expect("seed template");

    for (index, (sequence, parallel)) in step_defs.iter().enumerate() {
        template_step::ActiveModel {
            id: Set(Uuid::new_v4()),
            process_template_id: Set(template.id),
            sequence_number: Set(*sequence),
            name: Set(format!("OP-{}", index + 1)),
            operation_type: Set("MIXING".to_owned()),
            parallel: Set(*parallel),
            mandatory: Set(true),
            produces_output_batch: Set(true),
            allows_split: Set(false),
            allows_merge: Set(false),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(db)
        .await
        .expect("seed template step");
    }
    template
}

pub async fn seed_inventory(
    db: &DatabaseConnection,
    quantity: Decimal,
    state: &str,
    batch_id: Option<Uuid>,
) -> inventory::Model {
    let now = Utc::now();
    inventory::ActiveModel {
        id: Set(Uuid::new_v4()),
        material_id: Set(Uuid::new_v4()),
        material_name: Set("Raw Material".to_owned()),
        material_type: Set("RM".to_owned()),
        quantity: Set(quantity),
        unit: Set("KG".to_owned()),
        state: Set(state.to_owned()),
        location: Set(Some("WH-1".to_owned())),
        batch_id: Set(batch_id),
        reserved_for_order_id: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await
    .expect("seed inventory")
}

pub async fn seed_batch(
    db: &DatabaseConnection,
    batch_number: &str,
    quantity: Decimal,
    status: &str,
) -> batch::Model {
    let now = Utc::now();
    batch::ActiveModel {
        id: Set(Uuid::new_v4()),
        batch_number: Set(batch_number.to_owned()),
        material_id: Set(Uuid::new_v4()),
        material_name: Set("Raw Material".to_owned()),
        quantity: Set(quantity),
        unit: Set("KG".to_owned()),
        status: Set(status.to_owned()),
        generated_at_operation_id: Set(None),
        created_via: Set("RECEIPT".to_owned()),
        supplier_name: Set(None),
        supplier_lot_number: Set(None),
        quality_decided_by: Set(None),
        quality_decided_at: Set(None),
        created_by: Set("test".to_owned()),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await
    .expect("seed batch")
}

pub async fn seed_number_config(
    db: &DatabaseConnection,
    name: &str,
    operation_type: Option<&str>,
    reset_policy: &str,
    priority: i32,
) -> batch_number_config::Model {
    let now = Utc::now();
    batch_number_config::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(name.to_owned()),
        operation_type: Set(operation_type.map(str::to_owned)),
        material_id: Set(None),
        product_sku: Set(None),
        prefix: Set("B".to_owned()),
        separator: Set("-".to_owned()),
        include_op_code: Set(true),
        op_code_length: Set(2),
        date_format: Set(Some("%Y%m%d".to_owned())),
        sequence_length: Set(4),
        reset_policy: Set(reset_policy.to_owned()),
        split_suffix_format: Set(None),
        priority: Set(priority),
        status: Set("ACTIVE".to_owned()),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await
    .expect("seed number config")
}

pub async fn seed_size_config(
    db: &DatabaseConnection,
    operation_type: Option<&str>,
    min: Decimal,
    max: Decimal,
    preferred: Option<Decimal>,
    allow_partial: bool,
) -> batch_size_config::Model {
    let now = Utc::now();
    batch_size_config::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(format!("size-{}", Uuid::new_v4())),
        operation_type: Set(operation_type.map(str::to_owned)),
        material_id: Set(None),
        product_sku: Set(None),
        equipment_type: Set(None),
        min_batch_size: Set(min),
        max_batch_size: Set(max),
        preferred_batch_size: Set(preferred),
        allow_partial: Set(allow_partial),
        priority: Set(100),
        status: Set("ACTIVE".to_owned()),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await
    .expect("seed size config")
}

pub async fn seed_parameter_config(
    db: &DatabaseConnection,
    operation_type: &str,
    parameter_name: &str,
    required: bool,
    min: Option<Decimal>,
    max: Option<Decimal>,
) -> process_parameter_config::Model {
    let now = Utc::now();
    process_parameter_config::ActiveModel {
        id: Set(Uuid::new_v4()),
        operation_type: Set(operation_type.to_owned()),
        product_sku: Set(None),
        parameter_name: Set(parameter_name.to_owned()),
        required: Set(required),
        min_value: Set(min),
        max_value: Set(max),
        unit: Set(None),
        status: Set("ACTIVE".to_owned()),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await
    .expect("seed parameter config")
}
