//! Secondary load balancers, converged with [`converge::ensure`].
//!
//! [`converge::ensure`]: crate::converge::ensure

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::debug;

use super::LoadBalancerTopology;
use crate::clients::LoadBalancerApi;
use crate::config::LoadBalancerSpec;
use crate::converge::Convergent;
use crate::error::Result;
use crate::model::LoadBalancer;
use crate::tags::{MANAGED_IP_TAG, Role};
use crate::zone::Zone;

/// [`Convergent`] capability over the cluster's secondary load balancers.
pub struct ExtraLoadBalancers<'a, L> {
    topology: &'a LoadBalancerTopology<'a, L>,
}

impl<'a, L: LoadBalancerApi> ExtraLoadBalancers<'a, L> {
    pub fn new(topology: &'a LoadBalancerTopology<'a, L>) -> Self {
        Self { topology }
    }

    /// (zone, name) of each spec, in declaration order.
    pub fn declared_slots(&self, specs: &[LoadBalancerSpec]) -> Result<Vec<(Zone, String)>> {
        let mut per_zone: HashMap<Zone, usize> = HashMap::new();
        let mut slots = Vec::with_capacity(specs.len());
        for spec in specs {
            let zone = self.desired_zone(spec)?;
            let index = per_zone.entry(zone.clone()).or_default();
            slots.push((zone, self.desired_resource_name(*index)));
            *index += 1;
        }
        Ok(slots)
    }
}

#[async_trait]
impl<'a, L: LoadBalancerApi> Convergent for ExtraLoadBalancers<'a, L> {
    type Desired = LoadBalancerSpec;
    type Resource = LoadBalancer;

    async fn list_resources(&self) -> Result<Vec<LoadBalancer>> {
        self.topology.list_by_role(Role::ExtraLoadBalancer).await
    }

    async fn create_resource(
        &self,
        zone: &Zone,
        name: &str,
        desired: &LoadBalancerSpec,
    ) -> Result<LoadBalancer> {
        self.topology
            .create(zone, name, Role::ExtraLoadBalancer, desired)
            .await
    }

    async fn update_resource(
        &self,
        resource: LoadBalancer,
        desired: &LoadBalancerSpec,
    ) -> Result<LoadBalancer> {
        self.topology.migrate_if_needed(resource, desired).await
    }

    async fn delete_resource(&self, resource: &LoadBalancer) -> Result<()> {
        self.topology.delete(resource).await
    }

    fn resource_zone(&self, resource: &LoadBalancer) -> Zone {
        resource.zone.clone()
    }

    fn resource_name(&self, resource: &LoadBalancer) -> String {
        resource.name.clone()
    }

    fn desired_zone(&self, desired: &LoadBalancerSpec) -> Result<Zone> {
        self.topology.resolve_zone(desired)
    }

    fn desired_resource_name(&self, index: usize) -> String {
        format!("{}-extra-{}", self.topology.owner.cluster(), index)
    }

    fn should_keep_resource(&self, resource: &LoadBalancer, desired: &LoadBalancerSpec) -> Result<bool> {
        if resource.ips.is_empty() {
            debug!(name = %resource.name, "Load balancer has no IP, recreating");
            return Ok(false);
        }

        match desired.ip {
            Some(pinned) if !resource.ips.contains(&pinned) => {
                debug!(name = %resource.name, %pinned, "Pinned IP changed, recreating");
                Ok(false)
            }
            Some(_) => Ok(true),
            // The current IP was pinned by the caller; only a fresh load
            // balancer gets an IP this controller owns.
            None if !resource.has_tag(MANAGED_IP_TAG) => {
                debug!(name = %resource.name, "IP is no longer pinned, recreating");
                Ok(false)
            }
            None => Ok(true),
        }
    }
}
