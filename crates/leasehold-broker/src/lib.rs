//! leasehold-broker - lease broker for panel-hosted game servers
//!
//! Hands out servers from a fixed pool under time-boxed leases, provisions
//! them on approval, and archives their snapshots when they come back.

pub mod allocator;
pub mod archive;
pub mod clock;
pub mod config;
pub mod error;
pub mod lease;
pub mod notify;
pub mod remote;
pub mod scheduler;
pub mod state;
pub mod tracker;
pub mod wait;

pub use error::{BrokerError, Result, ValidationError};
pub use lease::{LeaseService, ReturnOptions};
