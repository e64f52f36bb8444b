//! Load balancer topology: one primary load balancer plus N secondary ones.
//!
//! The primary is a singleton found by its role tag and migrated in place
//! when its type changes. Secondary load balancers are a list converged by
//! the generic engine. Each load balancer gets one backend and one frontend;
//! the primary backend pool is authoritative and copied to the secondaries.

pub mod extra;

use std::collections::BTreeSet;
use std::net::IpAddr;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clients::{
    CreateBackendRequest, CreateFrontendRequest, CreateLoadBalancerRequest, LoadBalancerApi, call,
    find_one,
};
use crate::config::{LoadBalancerSpec, ReconcilerConfig};
use crate::converge;
use crate::error::{Error, Result, ResultExt, ignore_not_found};
use crate::model::{Backend, Frontend, LbStatus, LoadBalancer};
use crate::retry::RetryableError;
use crate::status::LoadBalancerAddresses;
use crate::tags::{MANAGED_IP_TAG, Ownership, Role};
use crate::zone::{Zone, ZoneResolver};

pub use extra::ExtraLoadBalancers;

/// Name of the single backend of every load balancer.
pub const BACKEND_NAME: &str = "kube-apiserver";

/// Name of the single frontend of every load balancer.
pub const FRONTEND_NAME: &str = "kube-apiserver";

/// A load balancer with its backend and frontend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub lb: LoadBalancer,
    pub backend: Backend,
    pub frontend: Frontend,
}

/// The converged set of load balancers of a cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub primary: Endpoint,
    pub extras: Vec<Endpoint>,
}

impl Topology {
    /// Primary first, then secondaries.
    pub fn endpoints(&self) -> impl Iterator<Item = &Endpoint> {
        std::iter::once(&self.primary).chain(self.extras.iter())
    }

    pub fn addresses(&self) -> LoadBalancerAddresses {
        LoadBalancerAddresses {
            primary: self.primary.lb.ipv4(),
            extras: self.extras.iter().map(|e| e.lb.ipv4()).collect(),
        }
    }
}

fn same_pool(a: &[IpAddr], b: &[IpAddr]) -> bool {
    a.iter().collect::<BTreeSet<_>>() == b.iter().collect::<BTreeSet<_>>()
}

/// Orchestrates the load balancers of one cluster for one reconciliation.
pub struct LoadBalancerTopology<'a, L> {
    api: &'a L,
    resolver: &'a ZoneResolver,
    owner: &'a Ownership,
    config: &'a ReconcilerConfig,
    cancel: &'a CancellationToken,
}

impl<'a, L: LoadBalancerApi> LoadBalancerTopology<'a, L> {
    pub fn new(
        api: &'a L,
        resolver: &'a ZoneResolver,
        owner: &'a Ownership,
        config: &'a ReconcilerConfig,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            api,
            resolver,
            owner,
            config,
            cancel,
        }
    }

    /// Converge every load balancer, backend and frontend of the cluster.
    pub async fn reconcile(
        &self,
        primary: &LoadBalancerSpec,
        extras: &[LoadBalancerSpec],
    ) -> Result<Topology> {
        let primary_lb = self
            .ensure_primary(primary)
            .await
            .context("reconciling primary load balancer")?;
        let extra_lbs = self
            .ensure_extras(extras)
            .await
            .context("reconciling secondary load balancers")?;

        for lb in std::iter::once(&primary_lb).chain(extra_lbs.iter()) {
            self.check_ready(lb)?;
        }

        let backend = self.ensure_backend(&primary_lb, &[]).await?;
        let frontend = self.ensure_frontend(&primary_lb, &backend).await?;
        let primary = Endpoint {
            lb: primary_lb,
            backend,
            frontend,
        };

        let mut endpoints = Vec::with_capacity(extra_lbs.len());
        for lb in extra_lbs {
            let backend = self.ensure_backend(&lb, &primary.backend.servers).await?;
            let backend = self.sync_backend(&lb.zone, backend, &primary.backend.servers).await?;
            let frontend = self.ensure_frontend(&lb, &backend).await?;
            endpoints.push(Endpoint {
                lb,
                backend,
                frontend,
            });
        }

        Ok(Topology {
            primary,
            extras: endpoints,
        })
    }

    /// Read the current topology without creating anything.
    ///
    /// Fails with NotFound while a load balancer, backend or frontend does
    /// not exist yet.
    pub async fn discover(&self) -> Result<Topology> {
        let primary = self.find_primary().await?;
        let primary = self.discover_endpoint(primary).await?;

        let mut extras = self.list_by_role(Role::ExtraLoadBalancer).await?;
        extras.sort_by(|a, b| (&a.zone, &a.name).cmp(&(&b.zone, &b.name)));
        let mut endpoints = Vec::with_capacity(extras.len());
        for lb in extras {
            endpoints.push(self.discover_endpoint(lb).await?);
        }

        Ok(Topology {
            primary,
            extras: endpoints,
        })
    }

    /// Add (`present`) or remove a member from the primary backend pool and
    /// propagate the pool to every secondary.
    pub async fn set_backend_member(
        &self,
        topology: &mut Topology,
        ip: IpAddr,
        present: bool,
    ) -> Result<()> {
        let primary = &mut topology.primary;
        let mut servers = primary.backend.servers.clone();
        let listed = servers.contains(&ip);
        if present && !listed {
            servers.push(ip);
        } else if !present && listed {
            servers.retain(|s| *s != ip);
        }

        if servers != primary.backend.servers {
            info!(
                lb = %primary.lb.name,
                member = %ip,
                present,
                "Updating primary backend pool"
            );
            primary.backend = self
                .set_servers(&primary.lb.zone, &primary.backend.id, &servers)
                .await?;
        }

        let servers = topology.primary.backend.servers.clone();
        for endpoint in &mut topology.extras {
            endpoint.backend = self
                .sync_backend(&endpoint.lb.zone, endpoint.backend.clone(), &servers)
                .await?;
        }
        Ok(())
    }

    /// Delete every load balancer of the cluster.
    ///
    /// Returns a transient error while deletions are still in flight, so the
    /// caller comes back until nothing is left.
    pub async fn teardown(&self) -> Result<()> {
        let extras = self.list_by_role(Role::ExtraLoadBalancer).await?;
        converge::ensure(&ExtraLoadBalancers::new(self), &[])
            .await
            .context("deleting secondary load balancers")?;

        let primary = ignore_not_found(self.find_primary().await)?;
        if let Some(lb) = &primary {
            self.delete(lb).await?;
        }

        if extras.is_empty() && primary.is_none() {
            debug!(cluster = self.owner.cluster(), "No load balancer left");
            return Ok(());
        }
        Err(RetryableError::transient(
            format!(
                "waiting for load balancers of cluster {} to be deleted",
                self.owner.cluster()
            ),
            self.config.not_ready_delay(),
        )
        .into())
    }

    /// Find or create the primary load balancer, migrating its type if needed.
    pub async fn ensure_primary(&self, spec: &LoadBalancerSpec) -> Result<LoadBalancer> {
        let zone = self.resolve_zone(spec)?;

        match ignore_not_found(self.find_primary().await)? {
            None => {
                let name = self.owner.cluster().to_string();
                self.create(&zone, &name, Role::PrimaryLoadBalancer, spec).await
            }
            Some(lb) if lb.zone != zone => Err(RetryableError::terminal(format!(
                "primary load balancer {} is in zone {}, cannot move it to {}",
                lb.name, lb.zone, zone
            ))
            .into()),
            Some(lb) => {
                if let Some(pinned) = spec.ip
                    && !lb.ips.contains(&pinned)
                {
                    warn!(
                        name = %lb.name,
                        %pinned,
                        "Primary load balancer IP differs from the pinned IP, it cannot be changed"
                    );
                }
                self.migrate_if_needed(lb, spec).await
            }
        }
    }

    /// Converge the secondary load balancers, returned in declaration order.
    pub async fn ensure_extras(&self, specs: &[LoadBalancerSpec]) -> Result<Vec<LoadBalancer>> {
        let extras = ExtraLoadBalancers::new(self);
        let slots = extras.declared_slots(specs)?;
        let mut lbs = converge::ensure(&extras, specs).await?;

        let mut ordered = Vec::with_capacity(lbs.len());
        for (zone, name) in &slots {
            if let Some(pos) = lbs.iter().position(|lb| lb.zone == *zone && lb.name == *name) {
                ordered.push(lbs.swap_remove(pos));
            }
        }
        ordered.extend(lbs);
        Ok(ordered)
    }

    fn check_ready(&self, lb: &LoadBalancer) -> Result<()> {
        if lb.status == LbStatus::Ready {
            return Ok(());
        }
        Err(RetryableError::transient(
            format!(
                "load balancer {} in {} is {}, waiting for it to become ready",
                lb.name, lb.zone, lb.status
            ),
            self.config.not_ready_delay(),
        )
        .into())
    }

    /// Resolve and validate the zone of a load balancer spec.
    fn resolve_zone(&self, spec: &LoadBalancerSpec) -> Result<Zone> {
        let zone = self.resolver.zone_or_default(spec.zone.as_deref())?;
        self.resolver.validate_zone(self.api, &zone)?;
        Ok(zone)
    }

    fn lb_type<'s>(&'s self, spec: &'s LoadBalancerSpec) -> &'s str {
        spec.lb_type
            .as_deref()
            .unwrap_or(&self.config.default_lb_type)
    }

    /// Load balancers of the cluster with the given role, across every zone
    /// of the region.
    async fn list_by_role(&self, role: Role) -> Result<Vec<LoadBalancer>> {
        let tags = self.owner.tags_for(role);
        let mut lbs = Vec::new();
        for zone in self.resolver.product_zones(self.api) {
            let found = call(
                self.cancel,
                &format!("list load balancers in {zone}"),
                self.api.list_load_balancers(&zone, &tags),
            )
            .await?;
            lbs.extend(found);
        }
        Ok(lbs)
    }

    async fn find_primary(&self) -> Result<LoadBalancer> {
        let lbs = self.list_by_role(Role::PrimaryLoadBalancer).await?;
        let selector = self.owner.tags_for(Role::PrimaryLoadBalancer).join(",");
        find_one(lbs, "load balancer", &selector)
            .map_err(|e| Error::provider("find primary load balancer", e))
    }

    async fn create(
        &self,
        zone: &Zone,
        name: &str,
        role: Role,
        spec: &LoadBalancerSpec,
    ) -> Result<LoadBalancer> {
        let mut tags = self.owner.tags_for(role);
        if spec.ip.is_none() {
            tags.push(MANAGED_IP_TAG.to_string());
        }
        let req = CreateLoadBalancerRequest {
            name: name.to_string(),
            lb_type: self.lb_type(spec).to_string(),
            tags,
            ip: spec.ip,
            description: format!("API server load balancer of cluster {}", self.owner.cluster()),
        };

        info!(zone = %zone, name, lb_type = %req.lb_type, ip = ?req.ip, "Creating load balancer");
        call(
            self.cancel,
            &format!("create load balancer {name} in {zone}"),
            self.api.create_load_balancer(zone, req),
        )
        .await
    }

    /// Change the type in place when it differs; no provider call otherwise.
    async fn migrate_if_needed(
        &self,
        lb: LoadBalancer,
        spec: &LoadBalancerSpec,
    ) -> Result<LoadBalancer> {
        let lb_type = self.lb_type(spec);
        if lb.lb_type == lb_type {
            return Ok(lb);
        }

        info!(
            zone = %lb.zone,
            name = %lb.name,
            from = %lb.lb_type,
            to = lb_type,
            "Migrating load balancer type"
        );
        call(
            self.cancel,
            &format!("migrate load balancer {} to {lb_type}", lb.name),
            self.api.migrate_load_balancer(&lb.zone, &lb.id, lb_type),
        )
        .await
    }

    async fn delete(&self, lb: &LoadBalancer) -> Result<()> {
        if !self.owner.owns(&lb.tags) {
            return Err(RetryableError::terminal(format!(
                "load balancer {} in {} is not owned by cluster {}, refusing to delete it",
                lb.name,
                lb.zone,
                self.owner.cluster()
            ))
            .into());
        }
        if lb.status == LbStatus::Deleting {
            debug!(name = %lb.name, "Load balancer is already being deleted");
            return Ok(());
        }

        let release_ip = lb.has_tag(MANAGED_IP_TAG);
        info!(zone = %lb.zone, name = %lb.name, release_ip, "Deleting load balancer");
        call(
            self.cancel,
            &format!("delete load balancer {}", lb.name),
            self.api.delete_load_balancer(&lb.zone, &lb.id, release_ip),
        )
        .await
    }

    async fn find_backend(&self, lb: &LoadBalancer) -> Result<Backend> {
        let backends = call(
            self.cancel,
            &format!("list backends of {}", lb.name),
            self.api.list_backends(&lb.zone, &lb.id),
        )
        .await?;
        let backends: Vec<Backend> = backends
            .into_iter()
            .filter(|b| b.name == BACKEND_NAME)
            .collect();
        find_one(backends, "backend", BACKEND_NAME)
            .map_err(|e| Error::provider(format!("find backend of {}", lb.name), e))
    }

    /// Find the backend of `lb`, creating it with `servers` when missing.
    async fn ensure_backend(&self, lb: &LoadBalancer, servers: &[IpAddr]) -> Result<Backend> {
        if let Some(backend) = ignore_not_found(self.find_backend(lb).await)? {
            return Ok(backend);
        }

        info!(lb = %lb.name, port = self.config.forward_port, "Creating backend");
        call(
            self.cancel,
            &format!("create backend of {}", lb.name),
            self.api.create_backend(
                &lb.zone,
                &lb.id,
                CreateBackendRequest {
                    name: BACKEND_NAME.to_string(),
                    forward_port: self.config.forward_port,
                    servers: servers.to_vec(),
                },
            ),
        )
        .await
    }

    /// Replace the backend's pool with `servers` when they differ.
    async fn sync_backend(
        &self,
        zone: &Zone,
        backend: Backend,
        servers: &[IpAddr],
    ) -> Result<Backend> {
        if same_pool(&backend.servers, servers) {
            return Ok(backend);
        }
        info!(
            backend = %backend.id,
            servers = servers.len(),
            "Replacing secondary backend pool with the primary one"
        );
        self.set_servers(zone, &backend.id, servers).await
    }

    async fn set_servers(&self, zone: &Zone, backend_id: &str, servers: &[IpAddr]) -> Result<Backend> {
        call(
            self.cancel,
            &format!("set servers of backend {backend_id}"),
            self.api.set_backend_servers(zone, backend_id, servers),
        )
        .await
    }

    async fn find_frontend(&self, lb: &LoadBalancer) -> Result<Frontend> {
        let frontends = call(
            self.cancel,
            &format!("list frontends of {}", lb.name),
            self.api.list_frontends(&lb.zone, &lb.id),
        )
        .await?;
        let frontends: Vec<Frontend> = frontends
            .into_iter()
            .filter(|f| f.name == FRONTEND_NAME)
            .collect();
        find_one(frontends, "frontend", FRONTEND_NAME)
            .map_err(|e| Error::provider(format!("find frontend of {}", lb.name), e))
    }

    /// Find the frontend of `lb`, creating it on first sight.
    ///
    /// An existing frontend is never modified, even when the configured
    /// inbound port changed since its creation.
    async fn ensure_frontend(&self, lb: &LoadBalancer, backend: &Backend) -> Result<Frontend> {
        if let Some(frontend) = ignore_not_found(self.find_frontend(lb).await)? {
            if frontend.inbound_port != self.config.inbound_port {
                warn!(
                    lb = %lb.name,
                    current = frontend.inbound_port,
                    configured = self.config.inbound_port,
                    "Frontend inbound port differs from configuration and is left unchanged"
                );
            }
            return Ok(frontend);
        }

        info!(lb = %lb.name, port = self.config.inbound_port, "Creating frontend");
        call(
            self.cancel,
            &format!("create frontend of {}", lb.name),
            self.api.create_frontend(
                &lb.zone,
                &lb.id,
                CreateFrontendRequest {
                    name: FRONTEND_NAME.to_string(),
                    inbound_port: self.config.inbound_port,
                    backend_id: backend.id.clone(),
                },
            ),
        )
        .await
    }

    async fn discover_endpoint(&self, lb: LoadBalancer) -> Result<Endpoint> {
        let backend = self.find_backend(&lb).await?;
        let frontend = self.find_frontend(&lb).await?;
        Ok(Endpoint {
            lb,
            backend,
            frontend,
        })
    }
}
