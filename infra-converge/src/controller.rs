//! One reconciliation tick for a cluster's infrastructure.
//!
//! [`ClusterInfraReconciler`] is driven by an external control loop: it
//! converges the declared state once, publishes the outcome to the
//! [`StatusSink`] and tells the loop when to come back.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::acl::{AclSynchronizer, cluster_rules};
use crate::clients::{GatewayApi, LoadBalancerApi, call};
use crate::config::{ClusterInfraSpec, ClusterMember, ReconcilerConfig};
use crate::error::{Error, Result, ResultExt};
use crate::loadbalancer::{LoadBalancerTopology, Topology};
use crate::retry::Disposition;
use crate::status::{LoadBalancerAddresses, StatusCondition, StatusSink};
use crate::tags::Ownership;
use crate::zone::ZoneResolver;

/// What the control loop should do after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    /// Run again after the delay.
    Requeue(Duration),
    /// Do not retry until the declaration changes.
    Await,
}

/// Reconciles the infrastructure of clusters against one cloud account.
pub struct ClusterInfraReconciler<L, G, S> {
    lb_api: Arc<L>,
    gateway_api: Arc<G>,
    status: Arc<S>,
    config: ReconcilerConfig,
    resolver: ZoneResolver,
}

impl<L, G, S> ClusterInfraReconciler<L, G, S>
where
    L: LoadBalancerApi,
    G: GatewayApi,
    S: StatusSink,
{
    pub fn new(lb_api: Arc<L>, gateway_api: Arc<G>, status: Arc<S>, config: ReconcilerConfig) -> Self {
        let resolver = ZoneResolver::new(config.region.clone());
        Self {
            lb_api,
            gateway_api,
            status,
            config,
            resolver,
        }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    fn ownership(&self, cluster: &str) -> Ownership {
        Ownership::new(self.config.controller_name.as_str(), cluster)
    }

    fn topology<'a>(
        &'a self,
        owner: &'a Ownership,
        cancel: &'a CancellationToken,
    ) -> LoadBalancerTopology<'a, L> {
        LoadBalancerTopology::new(
            self.lb_api.as_ref(),
            &self.resolver,
            owner,
            &self.config,
            cancel,
        )
    }

    fn acl<'a>(&'a self, cancel: &'a CancellationToken) -> AclSynchronizer<'a, L> {
        AclSynchronizer::new(self.lb_api.as_ref(), cancel, &self.config.controller_name)
    }

    /// Converge the cluster and publish its addresses, then map the outcome
    /// to a status condition and a requeue decision.
    pub async fn reconcile(
        &self,
        spec: &ClusterInfraSpec,
        cancel: &CancellationToken,
    ) -> ReconcileAction {
        info!(cluster = %spec.name, "Reconciling cluster infrastructure");
        match self.apply(spec, cancel).await {
            Ok(topology) => {
                info!(
                    cluster = %spec.name,
                    extras = topology.extras.len(),
                    "Cluster infrastructure converged"
                );
                self.publish_condition(&spec.name, StatusCondition::ready())
                    .await;
                ReconcileAction::Requeue(self.config.resync_interval())
            }
            Err(e) => self.handle_error(&spec.name, e).await,
        }
    }

    /// Delete every load balancer of the cluster.
    ///
    /// Keeps requeueing while deletions are in flight; `Await` means nothing
    /// is left.
    pub async fn reconcile_delete(&self, cluster: &str, cancel: &CancellationToken) -> ReconcileAction {
        info!(cluster, "Tearing down cluster infrastructure");
        let owner = self.ownership(cluster);
        match self.topology(&owner, cancel).teardown().await {
            Ok(()) => {
                info!(cluster, "Cluster infrastructure deleted");
                if let Err(e) = self
                    .status
                    .set_addresses(cluster, &LoadBalancerAddresses::default())
                    .await
                {
                    warn!(cluster, error = %e, "Failed to clear load balancer addresses");
                }
                ReconcileAction::Await
            }
            Err(e) => self.handle_error(cluster, e).await,
        }
    }

    /// Converge load balancers, backends, frontends and ACL rules, and
    /// publish the resulting addresses.
    pub async fn apply(
        &self,
        spec: &ClusterInfraSpec,
        cancel: &CancellationToken,
    ) -> Result<Topology> {
        spec.validate()?;
        let owner = self.ownership(&spec.name);

        let topology = self
            .topology(&owner, cancel)
            .reconcile(&spec.load_balancer, &spec.extra_load_balancers)
            .await?;

        let gateways = self
            .gateway_ips(&owner, cancel)
            .await
            .context("listing public gateways")?;

        let acl = self.acl(cancel);
        let desired = cluster_rules(&spec.allowed_ranges, &gateways, acl.description());
        let primary_rules = acl
            .converge_rules(&topology.primary, &desired)
            .await
            .context("converging primary ACL rules")?;
        for extra in &topology.extras {
            acl.replicate(&primary_rules, extra)
                .await
                .with_context(|| format!("replicating ACL rules to {}", extra.lb.name))?;
        }

        let addresses = topology.addresses();
        debug!(cluster = %spec.name, ?addresses, "Publishing load balancer addresses");
        self.status.set_addresses(&spec.name, &addresses).await?;
        Ok(topology)
    }

    /// Put a member behind every load balancer of the cluster and let its
    /// public IPs through the frontends.
    pub async fn register_member(
        &self,
        cluster: &str,
        member: &ClusterMember,
        cancel: &CancellationToken,
    ) -> Result<()> {
        info!(cluster, member = %member.name, ip = %member.private_ip, "Registering member");
        self.set_member(cluster, member, true, cancel).await
    }

    /// Reverse [`register_member`](Self::register_member).
    pub async fn deregister_member(
        &self,
        cluster: &str,
        member: &ClusterMember,
        cancel: &CancellationToken,
    ) -> Result<()> {
        info!(cluster, member = %member.name, ip = %member.private_ip, "Deregistering member");
        self.set_member(cluster, member, false, cancel).await
    }

    async fn set_member(
        &self,
        cluster: &str,
        member: &ClusterMember,
        present: bool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let owner = self.ownership(cluster);
        let lbs = self.topology(&owner, cancel);
        let mut topology = lbs
            .discover()
            .await
            .context("discovering load balancers")?;
        lbs.set_backend_member(&mut topology, member.private_ip, present)
            .await?;

        let ips = if present { member.public_ips.as_slice() } else { &[] };
        let acl = self.acl(cancel);
        for endpoint in topology.endpoints() {
            acl.ensure_member_rule(endpoint, &member.name, ips)
                .await
                .with_context(|| format!("member rule of {} on {}", member.name, endpoint.lb.name))?;
        }
        Ok(())
    }

    /// IPv4 addresses of the cluster's public gateways, across the region.
    async fn gateway_ips(&self, owner: &Ownership, cancel: &CancellationToken) -> Result<Vec<Ipv4Addr>> {
        let tags = owner.tags();
        let mut ips = Vec::new();
        for zone in self.resolver.product_zones(self.gateway_api.as_ref()) {
            let gateways = call(
                cancel,
                &format!("list gateways in {zone}"),
                self.gateway_api.list_gateways(&zone, &tags),
            )
            .await?;
            for gateway in gateways {
                match gateway.ipv4 {
                    Some(ip) => ips.push(ip),
                    None => debug!(gateway = %gateway.name, "Gateway has no IPv4 yet"),
                }
            }
        }
        ips.sort();
        ips.dedup();
        Ok(ips)
    }

    async fn handle_error(&self, cluster: &str, err: Error) -> ReconcileAction {
        let disposition = Disposition::classify(&err, self.config.transient_delay());
        let condition = StatusCondition::failed(disposition, err.to_string());
        let action = match disposition {
            Disposition::Terminal => {
                error!(cluster, error = %err, "Reconciliation failed, operator action required");
                ReconcileAction::Await
            }
            Disposition::Transient(delay) => {
                warn!(cluster, error = %err, ?delay, "Reconciliation failed, retrying");
                ReconcileAction::Requeue(delay)
            }
        };
        self.publish_condition(cluster, condition).await;
        action
    }

    async fn publish_condition(&self, cluster: &str, condition: StatusCondition) {
        if let Err(e) = self.status.set_condition(cluster, condition).await {
            warn!(cluster, error = %e, "Failed to publish status condition");
        }
    }
}
