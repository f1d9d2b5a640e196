//! Admission-controlled action scheduler.
//!
//! Decides *when* a unit of work enters the durable action queue, and
//! never *how* it runs. This crate provides:
//! - a TTL'd, source-swap-aware definition cache
//! - the trigger condition DSL (parsed once into an AST, fail-closed)
//! - the requirements precondition evaluator
//! - admission control (duplicate/flags/cooldown/rate-limit)
//! - queue publication for interval, global on_start, and per-host
//!   trigger paths
//! - queue maintenance (expiry, timeout, backoff retry, retention purge,
//!   anti-starvation priority aging)
//! - the cooperative tick loop sequencing all of the above
//!
//! Execution is an external concern: independent executors claim
//! `pending` entries and report terminal status through the same store.

pub mod admission;
pub mod cache;
pub mod config;
pub mod core;
pub mod history;
pub mod maintainer;
pub mod publisher;
pub mod requirements;
pub mod trigger;

pub use admission::AdmissionController;
pub use cache::DefinitionCache;
pub use config::SchedulerConfig;
pub use crate::core::{ActionScheduler, SchedulerHandle};
pub use history::QueueHistory;
pub use maintainer::{MaintenanceReport, QueueMaintainer};
pub use publisher::QueuePublisher;
pub use requirements::{Requirement, RequirementsEvaluator};
pub use trigger::{Trigger, TriggerEvaluator};
