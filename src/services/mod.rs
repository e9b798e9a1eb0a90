// Core manufacturing services
pub mod audit;
pub mod batch_numbers;
pub mod batch_sizing;
pub mod holds;
pub mod inventory_control;
pub mod inventory_state;
pub mod production;
pub mod routing;
pub mod units;

use sea_orm::DatabaseConnection;
use std::sync::Arc;

use crate::events::EventSender;

/// Aggregated service graph wired over one connection pool.
#[derive(Clone)]
pub struct AppServices {
    pub audit: audit::AuditService,
    pub batch_numbers: batch_numbers::BatchNumberService,
    pub batch_sizing: batch_sizing::BatchSizeService,
    pub holds: holds::HoldService,
    pub inventory_control: inventory_control::InventoryControlService,
    pub production: production::ProductionService,
    pub routing: routing::RoutingService,
    pub units: units::UnitService,
}

impl AppServices {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Option<EventSender>) -> Self {
        let audit = audit::AuditService::new(db.clone());
        let batch_numbers = batch_numbers::BatchNumberService::new(db.clone());
        let batch_sizing = batch_sizing::BatchSizeService::new(db.clone());
        let holds = holds::HoldService::new(db.clone(), audit.clone(), event_sender.clone());
        let routing = routing::RoutingService::new(db.clone(), event_sender.clone());
        let inventory_control = inventory_control::InventoryControlService::new(
            db.clone(),
            batch_numbers.clone(),
            audit.clone(),
            event_sender.clone(),
        );
        let production = production::ProductionService::new(
            db.clone(),
            batch_numbers.clone(),
            batch_sizing.clone(),
            routing.clone(),
            audit.clone(),
            event_sender,
        );
        let units = units::UnitService::new(db);
        Self {
            audit,
            batch_numbers,
            batch_sizing,
            holds,
            inventory_control,
            production,
            routing,
            units,
        }
    }
}
