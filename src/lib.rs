//! Manufacturing execution core.
//!
//! Production confirmation, batch genealogy, inventory state tracking,
//! routing instantiation and progression, holds, and an append-only audit
//! trail, all fronting a relational database through sea-orm. Transport
//! surfaces (HTTP, gRPC), auth, and schema migration live outside this crate.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod logging;
pub mod services;

use sea_orm::DatabaseConnection;
use std::sync::Arc;

pub use services::audit::SYSTEM_ACTOR;

/// Shared application state: the pool, configuration, event channel and the
/// wired service graph.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub services: services::AppServices,
}

impl AppState {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        event_sender: events::EventSender,
    ) -> Self {
        let services = services::AppServices::new(db.clone(), Some(event_sender.clone()));
        Self {
            db,
            config,
            event_sender,
            services,
        }
    }
}
