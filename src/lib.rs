// internal modules
pub mod config;
pub mod errors;
pub mod registry;
pub mod store;
pub mod sync;

pub use errors::Errors;
pub use registry::{Domain, Registry, Service, ServiceCluster};
pub use sync::{SyncConfig, Synchronizer};
