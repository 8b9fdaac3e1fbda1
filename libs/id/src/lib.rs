//! # fleet-id
//!
//! Validated name types for the runner fleet autoscaler.
//!
//! ## Design Principles
//!
//! - Every name that ends up in a cluster object name or API path is
//!   validated when it is read, not when it is used
//! - Names have one canonical string form with strict parsing
//! - Types keep namespaces, pool names and resource classes from being mixed
//!
//! ## Pool References
//!
//! A pool is addressed as `{namespace}/{pool}`:
//!
//! - `ci/docker-large`
//! - `build-agents/arm64`
//!
//! Both halves are Kubernetes DNS-1123 labels. The fleet list is a
//! comma-separated sequence of pool references, see [`parse_pool_list`].

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;
