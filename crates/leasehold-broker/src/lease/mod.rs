//! Lease requests and the lease lifecycle

mod attrs;
mod service;

pub use attrs::{LeaseAttrs, LeaseRequest, validate_duration};
pub use service::{LeaseService, OverdueSweep, ReturnOptions, ReturnOutcome};
