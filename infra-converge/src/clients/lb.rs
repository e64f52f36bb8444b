//! Load balancer capability.

use std::net::IpAddr;

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::model::{AclRule, AclSpec, Backend, Frontend, LoadBalancer};
use crate::zone::{Zone, ZonedProduct};

type Result<T> = std::result::Result<T, ProviderError>;

/// Request to create a load balancer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateLoadBalancerRequest {
    pub name: String,
    pub lb_type: String,
    pub tags: Vec<String>,
    /// Existing flexible IP to attach; `None` lets the provider allocate one.
    pub ip: Option<IpAddr>,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateBackendRequest {
    pub name: String,
    pub forward_port: u16,
    pub servers: Vec<IpAddr>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateFrontendRequest {
    pub name: String,
    pub inbound_port: u16,
    pub backend_id: String,
}

/// Load balancer API of the cloud provider.
#[async_trait]
pub trait LoadBalancerApi: ZonedProduct + Send + Sync {
    /// Load balancers of `zone` carrying every tag in `tags`.
    async fn list_load_balancers(&self, zone: &Zone, tags: &[String])
    -> Result<Vec<LoadBalancer>>;

    async fn create_load_balancer(
        &self,
        zone: &Zone,
        req: CreateLoadBalancerRequest,
    ) -> Result<LoadBalancer>;

    /// Change the commercial type in place; identity and IPs are preserved.
    async fn migrate_load_balancer(
        &self,
        zone: &Zone,
        lb_id: &str,
        lb_type: &str,
    ) -> Result<LoadBalancer>;

    /// Delete a load balancer, releasing its IP when `release_ip` is set.
    async fn delete_load_balancer(&self, zone: &Zone, lb_id: &str, release_ip: bool)
    -> Result<()>;

    async fn list_backends(&self, zone: &Zone, lb_id: &str) -> Result<Vec<Backend>>;

    async fn create_backend(
        &self,
        zone: &Zone,
        lb_id: &str,
        req: CreateBackendRequest,
    ) -> Result<Backend>;

    /// Replace the backend's server pool.
    async fn set_backend_servers(
        &self,
        zone: &Zone,
        backend_id: &str,
        servers: &[IpAddr],
    ) -> Result<Backend>;

    async fn list_frontends(&self, zone: &Zone, lb_id: &str) -> Result<Vec<Frontend>>;

    async fn create_frontend(
        &self,
        zone: &Zone,
        lb_id: &str,
        req: CreateFrontendRequest,
    ) -> Result<Frontend>;

    async fn list_acls(&self, zone: &Zone, frontend_id: &str) -> Result<Vec<AclRule>>;

    async fn create_acl(&self, zone: &Zone, frontend_id: &str, spec: &AclSpec)
    -> Result<AclRule>;

    async fn update_acl(&self, zone: &Zone, acl_id: &str, spec: &AclSpec) -> Result<AclRule>;

    async fn delete_acl(&self, zone: &Zone, acl_id: &str) -> Result<()>;

    /// Replace every ACL rule of the frontend with `specs`.
    async fn set_acls(
        &self,
        zone: &Zone,
        frontend_id: &str,
        specs: &[AclSpec],
    ) -> Result<Vec<AclRule>>;
}
