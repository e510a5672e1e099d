//! # beacon-core
//!
//! Core library for beacon - a proactive insight escalation engine.
//!
//! This library provides:
//! - Domain types for insights, preferences and the escalation audit trail
//! - Database storage layer with SQLite
//! - Channel safety gating, escalation policy and dispatch
//! - Daily brief generation and delivery
//! - Slack, GitHub and mail relay notification clients
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! Detectors (outside this crate) write insights. Two batch passes act on them:
//! - **Escalation:** age-driven, cumulative notifications (DM, then internal
//!   channel, then a comment on the external item), at most once per 24 hours
//!   per insight, every attempt audited.
//! - **Daily brief:** one digest per user of everything not yet delivered.
//!
//! ## Example
//!
//! ```rust,no_run
//! use beacon_core::{Config, Database, EscalationCoordinator, Notifiers};
//!
//! let config = Config::load().expect("failed to load config");
//! let db = Database::open(&Config::database_path()).expect("failed to open database");
//! db.migrate().expect("failed to run migrations");
//!
//! let notifiers = Notifiers::from_config(&config).expect("invalid client config");
//! let coordinator = EscalationCoordinator::new(&db, &notifiers, &config.escalation);
//! let stats = coordinator.run(chrono::Utc::now()).expect("escalation pass failed");
//! println!("{} insights escalated", stats.escalations_performed);
//! ```

// Re-export commonly used items at the crate root
pub use brief::{BriefContent, BriefGenerator, BriefRunStats};
pub use config::Config;
pub use db::Database;
pub use error::{Error, Result};
pub use escalation::{EscalationCoordinator, EscalationRunStats};
pub use notify::Notifiers;
pub use safety::ChannelSafetyValidator;
pub use types::*;

// Public modules
pub mod brief;
pub mod config;
pub mod db;
pub mod error;
pub mod escalation;
pub mod logging;
pub mod notify;
pub mod safety;
pub mod store;
pub mod types;
