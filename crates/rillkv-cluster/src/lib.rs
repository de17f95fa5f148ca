#![warn(missing_docs)]

//! Shared cluster model for rillkv data nodes.
//!
//! Holds the types every cluster participant agrees on (node identity,
//! partition metadata, raft member descriptors), the registry abstraction the
//! placement driver publishes through, and the HTTP client data nodes use to
//! talk to each other.

pub mod error;
pub mod member;
pub mod mem_registry;
pub mod meta;
pub mod node;
pub mod paths;
pub mod peer;
pub mod registry;
