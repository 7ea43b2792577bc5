//! leasehold-common - Shared types and constants
//!
//! Types here are used by the broker core and its CLI without pulling in
//! the database, HTTP or AWS stacks.
//!
//! ## Modules
//!
//! - [`defaults`]: Default configuration values
//! - [`status`]: Lease lifecycle status
//! - [`version`]: Version tag parsing (`MAJOR.MINOR[.PATCH]`)

pub mod defaults;
pub mod status;
pub mod version;

pub use status::LeaseStatus;
pub use version::{VersionTag, VersionTagError};
