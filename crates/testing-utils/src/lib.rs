//! # Broker Testing Utils
//!
//! Shared testing utilities for the task broker workspace.
//!
//! ## Features
//!
//! - **Recording doubles**: in-memory deferred queue, webhook notifier, blob
//!   store and metrics sink that record every call for later assertions
//! - **Test database**: a migrated SQLite database in a temporary directory
//! - **Builders**: task configuration builder
//! - **Helpers**: polling helpers for asynchronous assertions
//!
//! ## Usage
//!
//! ```toml
//! [dev-dependencies]
//! broker-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod database;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use database::*;
pub use helpers::*;
pub use mocks::*;
