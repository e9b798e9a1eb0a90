//! Batch number generation against a real (in-memory) database: config
//! precedence, sequence behavior, preview semantics and fallbacks.

mod common;

use chrono::Utc;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, ActiveValue::Set};
use uuid::Uuid;

use mes_core::entities::batch_number_config;
use mes_core::services::inventory_control::ReceiveMaterialRequest;

#[tokio::test]
async fn configured_generation_produces_contiguous_sequences() {
    let db = common::setup_db().await;
    let services = common::services(&db);
    common::seed_number_config(&db, "mixing-daily", Some("MIXING"), "DAILY", 10).await;

    let mut numbers = Vec::new();
    for _ in 0..5 {
        numbers.push(
            services
                .batch_numbers
                .generate("MIXING", None, None)
                .await
                .unwrap(),
        );
    }

    // All distinct.
    let mut unique = numbers.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), 5);

    // Trailing sequence parts are contiguous from 1.
    let date = Utc::now().format("%Y%m%d").to_string();
    for (index, number) in numbers.iter().enumerate() {
        assert_eq!(
            *number,
            format!("B-MI-{}-{:04}", date, index + 1),
            "unexpected number at position {}",
            index
        );
    }
}

#[tokio::test]
async fn preview_does_not_consume_the_sequence() {
    let db = common::setup_db().await;
    let services = common::services(&db);
    common::seed_number_config(&db, "mixing-never", Some("MIXING"), "NEVER", 10).await;

    let previewed = services
        .batch_numbers
        .preview("MIXING", None, None)
        .await
        .unwrap();
    let previewed_again = services
        .batch_numbers
        .preview("MIXING", None, None)
        .await
        .unwrap();
    assert_eq!(previewed, previewed_again);

    let generated = services
        .batch_numbers
        .generate("MIXING", None, None)
        .await
        .unwrap();
    assert_eq!(previewed, generated);

    let next = services
        .batch_numbers
        .preview("MIXING", None, None)
        .await
        .unwrap();
    assert_ne!(next, generated);
}

#[tokio::test]
async fn more_specific_config_wins_over_operation_only() {
    let db = common::setup_db().await;
    let services = common::services(&db);
    common::seed_number_config(&db, "generic", Some("MIXING"), "NEVER", 1).await;

    let now = Utc::now();
    batch_number_config::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set("sku-specific".to_owned()),
        operation_type: Set(Some("MIXING".to_owned())),
        material_id: Set(None),
        product_sku: Set(Some("SKU-9".to_owned())),
        prefix: Set("SP".to_owned()),
        separator: Set("-".to_owned()),
        include_op_code: Set(false),
        op_code_length: Set(2),
        date_format: Set(None),
        sequence_length: Set(3),
        reset_policy: Set("NEVER".to_owned()),
        split_suffix_format: Set(None),
        priority: Set(100),
        status: Set("ACTIVE".to_owned()),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(&*db)
    .await
    .unwrap();

    let number = services
        .batch_numbers
        .generate("MIXING", None, Some("SKU-9"))
        .await
        .unwrap();
    assert_eq!(number, "SP-001");

    // Without the SKU the generic config still applies.
    let generic = services
        .batch_numbers
        .generate("MIXING", None, None)
        .await
        .unwrap();
    assert!(generic.starts_with("B-MI-"));
}

#[tokio::test]
async fn missing_config_falls_back_without_error() {
    let db = common::setup_db().await;
    let services = common::services(&db);

    let number = services
        .batch_numbers
        .generate("PACKING", None, None)
        .await
        .unwrap();
    assert!(number.starts_with("BATCH-PA-"));
}

#[tokio::test]
async fn reset_policies_use_distinct_counter_keys() {
    let db = common::setup_db().await;
    let services = common::services(&db);
    common::seed_number_config(&db, "daily", Some("MIXING"), "DAILY", 10).await;
    common::seed_number_config(&db, "never", Some("GRANULATION"), "NEVER", 10).await;

    let daily = services
        .batch_numbers
        .generate("MIXING", None, None)
        .await
        .unwrap();
    let never = services
        .batch_numbers
        .generate("GRANULATION", None, None)
        .await
        .unwrap();
    // Separate configs, separate keys: both start at 1.
    assert!(daily.ends_with("-0001"));
    assert!(never.ends_with("-0001"));
}

#[tokio::test]
async fn split_numbers_append_indexed_suffix() {
    let db = common::setup_db().await;
    let services = common::services(&db);
    common::seed_number_config(&db, "mixing", Some("MIXING"), "NEVER", 10).await;

    let split = services
        .batch_numbers
        .generate_split("MIXING", None, None, 2)
        .await
        .unwrap();
    assert!(split.ends_with("-S02"), "got {}", split);
}

#[tokio::test]
async fn merge_falls_back_to_timestamp_pattern() {
    let db = common::setup_db().await;
    let services = common::services(&db);
    let merge = services.batch_numbers.generate_merge(None, None).await.unwrap();
    assert!(merge.starts_with("MERGE-"), "got {}", merge);
}

#[tokio::test]
async fn receipt_fallback_scans_existing_numbers() {
    let db = common::setup_db().await;
    let services = common::services(&db);

    let request = ReceiveMaterialRequest {
        material_id: Uuid::new_v4(),
        material_code: "API".to_owned(),
        material_name: "Active Ingredient".to_owned(),
        material_type: "RM".to_owned(),
        quantity: dec!(100),
        unit: "KG".to_owned(),
        location: Some("WH-1".to_owned()),
        supplier_name: Some("Acme".to_owned()),
        supplier_lot_number: Some("LOT-77".to_owned()),
    };

    let date = Utc::now().format("%Y%m%d").to_string();
    let (first, _) = services
        .inventory_control
        .receive_material(request.clone(), "tester")
        .await
        .unwrap();
    assert_eq!(first.batch_number, format!("RM-API-{}-001", date));

    let (second, _) = services
        .inventory_control
        .receive_material(request, "tester")
        .await
        .unwrap();
    assert_eq!(second.batch_number, format!("RM-API-{}-002", date));
}
