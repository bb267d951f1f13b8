//! Replicated stats store: local replicas, directory-side placement, and the
//! peer-side client

pub mod replicas;
pub mod stats;
pub mod store;

pub use replicas::ReplicaIndex;
pub use stats::StatsClient;
pub use store::{StatsStore, StoreError};
