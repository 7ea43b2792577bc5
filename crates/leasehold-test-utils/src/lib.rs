//! Shared test helpers for leasehold
//!
//! ## Modules
//!
//! - [`db`]: In-memory SQLite pools

pub mod db;

pub use db::{TestDbPool, open_test_db};
