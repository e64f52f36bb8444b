//! Converges a cluster's cloud load balancers and their admission rules
//! toward a declared state.
//!
//! Each tick compares what exists in the cloud account with the declaration
//! and issues the smallest set of create, update and delete calls that
//! closes the gap. Partial progress is fine: the next tick picks up where
//! the previous one stopped.

pub mod acl;
pub mod clients;
pub mod config;
pub mod controller;
pub mod converge;
pub mod error;
pub mod loadbalancer;
pub mod model;
pub mod retry;
pub mod status;
pub mod tags;
pub mod zone;

#[cfg(test)]
pub(crate) mod testing;

pub use acl::AclSynchronizer;
pub use clients::{GatewayApi, LoadBalancerApi};
pub use config::{ClusterInfraSpec, ClusterMember, LoadBalancerSpec, ReconcilerConfig};
pub use controller::{ClusterInfraReconciler, ReconcileAction};
pub use converge::{Convergent, ensure};
pub use error::{Condition, Error, ProviderError, Result};
pub use loadbalancer::{Endpoint, LoadBalancerTopology, Topology};
pub use retry::{Disposition, RetryKind, RetryableError};
pub use status::{LoadBalancerAddresses, StatusCondition, StatusSink};
pub use zone::{Region, Zone, ZoneResolver, ZonedProduct};
