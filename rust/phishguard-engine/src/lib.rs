//! PhishGuard Engine - Course Delivery and Campaign Scheduling
//!
//! This crate drives the lifecycle of security-awareness training
//! schedules: it expands a schedule's audience and course list into
//! per-user assignments laid out in consecutive time windows, advances
//! each assignment through its lifecycle as those windows open and
//! close, and launches a phishing-simulation campaign on the external
//! campaign platform once an assignment's window has passed.
//!
//! # Architecture
//!
//! The engine is organized into several key modules:
//!
//! - [`config`]: Configuration management and environment loading
//! - [`domain`]: Core domain models (schedules, assignments, lifecycle)
//! - [`sequencer`]: Audience expansion and course-window layout
//! - [`store`]: Persistence abstraction with in-memory and Postgres backends
//! - [`directory`]: User, group, and course lookups
//! - [`campaign`]: Campaign platform client
//! - [`processors`]: Periodic sweeps (starter, advancer, launcher)
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use phishguard_engine::directory::StaticDirectory;
//! use phishguard_engine::sequencer::{Sequencer, SequencerConfig};
//! use phishguard_engine::store::Store;
//!
//! let store = Store::in_memory();
//! let directory = Arc::new(StaticDirectory::new());
//! let sequencer = Sequencer::new(
//!     store,
//!     directory.clone(),
//!     directory,
//!     SequencerConfig::default(),
//! );
//! ```

pub mod campaign;
pub mod config;
pub mod directory;
pub mod domain;
pub mod error;
pub mod logging;
pub mod processors;
pub mod sequencer;
pub mod store;
