//! Rollwatch - feedback-driven implementation rollout control.
//!
//! For each managed component, the controller decides which of several
//! implementations to run (baseline, candidate, or a blended hybrid),
//! gradually increases exposure to the candidate based on live
//! performance comparison, and automatically rolls back on regression
//! or error-rate breach. A trigger engine decides whether queued
//! actions should fire at all, and an intelligent scheduler decides
//! when, avoiding configured peak periods and learning load patterns
//! from execution history.
//!
//! # Modules
//!
//! - [`config`] - Configuration loading from TOML files
//! - [`domain`] - Core types: component states, decisions, triggers,
//!   schedules, patterns
//! - [`error`] - Error types for the crate
//! - [`ports`] - Trait seams for the external collaborators
//! - [`adapters`] - In-memory implementations of the ports
//! - [`service`] - The control loops: rollout controller, trigger
//!   engine, scheduler, anomaly detection, pattern learning
//! - [`runtime`] - Background worker orchestration and shutdown
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use rollwatch::adapters::{InMemoryFlagStore, InMemoryMetrics};
//! use rollwatch::domain::RolloutStrategy;
//! use rollwatch::service::{
//!     AnomalyConfig, AnomalyDetector, RolloutConfig, RolloutController, SubscriberRegistry,
//! };
//!
//! # async fn demo() {
//! let controller = RolloutController::new(
//!     RolloutConfig::default(),
//!     Arc::new(InMemoryMetrics::new()),
//!     Arc::new(InMemoryFlagStore::new()),
//!     Arc::new(AnomalyDetector::new(AnomalyConfig::default())),
//!     Arc::new(SubscriberRegistry::new()),
//! );
//! controller.register_component("parser", RolloutStrategy::Balanced);
//! controller.evaluate_all().await;
//! # }
//! ```

pub mod adapters;
pub mod config;
pub mod domain;
pub mod error;
pub mod ports;
pub mod runtime;
pub mod service;
