//! In-memory cloud used by the tests.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::clients::{
    CreateBackendRequest, CreateFrontendRequest, CreateLoadBalancerRequest, GatewayApi,
    LoadBalancerApi,
};
use crate::error::{ProviderError, Result as CrateResult};
use crate::model::{AclRule, AclSpec, Backend, Frontend, Gateway, LbStatus, LoadBalancer};
use crate::status::{LoadBalancerAddresses, StatusCondition, StatusSink};
use crate::zone::{Zone, ZonedProduct};

type Result<T> = std::result::Result<T, ProviderError>;

pub fn zone(z: &str) -> Zone {
    z.parse().unwrap()
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[derive(Default)]
pub struct CloudState {
    pub lbs: Vec<LoadBalancer>,
    pub backends: Vec<Backend>,
    pub frontends: Vec<Frontend>,
    pub acls: Vec<AclRule>,
    pub gateways: Vec<Gateway>,
    /// Mutating calls, as `"<operation> <subject>"`.
    pub calls: Vec<String>,
    /// Status of newly created load balancers (`Ready` when unset).
    pub new_lb_status: Option<LbStatus>,
    /// Errors returned once by the named operation.
    pub fail_next: HashMap<&'static str, ProviderError>,
    next_ip: u8,
}

impl CloudState {
    fn fail(&mut self, operation: &'static str) -> Result<()> {
        match self.fail_next.remove(operation) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn allocate_ip(&mut self) -> IpAddr {
        self.next_ip += 1;
        IpAddr::V4(Ipv4Addr::new(51, 15, 0, self.next_ip))
    }

    fn record(&mut self, call: String) {
        self.calls.push(call);
    }
}

/// In-memory load balancer and gateway provider.
pub struct FakeCloud {
    zones: Vec<Zone>,
    state: Mutex<CloudState>,
}

impl Default for FakeCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeCloud {
    pub fn new() -> Self {
        Self {
            zones: vec![zone("fr-par-1"), zone("fr-par-2"), zone("nl-ams-1")],
            state: Mutex::new(CloudState::default()),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, CloudState> {
        self.state.lock().unwrap()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    /// Calls whose operation starts with `prefix`.
    pub fn calls_to(&self, prefix: &str) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn fail_next(&self, operation: &'static str, err: ProviderError) {
        self.state().fail_next.insert(operation, err);
    }

    pub fn lb_named(&self, name: &str) -> Option<LoadBalancer> {
        self.state().lbs.iter().find(|lb| lb.name == name).cloned()
    }

    pub fn insert_lb(&self, lb: LoadBalancer) {
        self.state().lbs.push(lb);
    }

    pub fn insert_acl(&self, acl: AclRule) {
        self.state().acls.push(acl);
    }

    pub fn insert_gateway(&self, gateway: Gateway) {
        self.state().gateways.push(gateway);
    }

    pub fn acls_of(&self, frontend_id: &str) -> Vec<AclRule> {
        self.state()
            .acls
            .iter()
            .filter(|a| a.frontend_id == frontend_id)
            .cloned()
            .collect()
    }

    pub fn backend_of(&self, lb_id: &str) -> Option<Backend> {
        self.state()
            .backends
            .iter()
            .find(|b| b.lb_id == lb_id)
            .cloned()
    }

    pub fn frontend_of(&self, lb_id: &str) -> Option<Frontend> {
        self.state()
            .frontends
            .iter()
            .find(|f| f.lb_id == lb_id)
            .cloned()
    }

    pub fn set_lb_status(&self, name: &str, status: LbStatus) {
        for lb in self.state().lbs.iter_mut().filter(|lb| lb.name == name) {
            lb.status = status;
        }
    }
}

impl ZonedProduct for FakeCloud {
    fn product_name(&self) -> &str {
        "fake cloud"
    }

    fn zones(&self) -> Vec<Zone> {
        self.zones.clone()
    }
}

#[async_trait]
impl LoadBalancerApi for FakeCloud {
    async fn list_load_balancers(
        &self,
        zone: &Zone,
        tags: &[String],
    ) -> Result<Vec<LoadBalancer>> {
        let mut state = self.state();
        state.fail("list_load_balancers")?;
        Ok(state
            .lbs
            .iter()
            .filter(|lb| lb.zone == *zone && tags.iter().all(|t| lb.tags.contains(t)))
            .cloned()
            .collect())
    }

    async fn create_load_balancer(
        &self,
        zone: &Zone,
        req: CreateLoadBalancerRequest,
    ) -> Result<LoadBalancer> {
        let mut state = self.state();
        state.fail("create_load_balancer")?;
        let ip = match req.ip {
            Some(ip) => ip,
            None => state.allocate_ip(),
        };
        let lb = LoadBalancer {
            id: new_id(),
            zone: zone.clone(),
            name: req.name,
            tags: req.tags,
            status: state.new_lb_status.unwrap_or(LbStatus::Ready),
            ips: vec![ip],
            lb_type: req.lb_type,
        };
        state.record(format!("create_load_balancer {}@{}", lb.name, zone));
        state.lbs.push(lb.clone());
        Ok(lb)
    }

    async fn migrate_load_balancer(
        &self,
        zone: &Zone,
        lb_id: &str,
        lb_type: &str,
    ) -> Result<LoadBalancer> {
        let mut state = self.state();
        state.fail("migrate_load_balancer")?;
        let lb = state
            .lbs
            .iter_mut()
            .find(|lb| lb.id == lb_id && lb.zone == *zone)
            .ok_or_else(|| ProviderError::not_found("load balancer", lb_id))?;
        lb.lb_type = lb_type.to_string();
        let lb = lb.clone();
        state.record(format!("migrate_load_balancer {} {}", lb.name, lb_type));
        Ok(lb)
    }

    async fn delete_load_balancer(&self, zone: &Zone, lb_id: &str, release_ip: bool) -> Result<()> {
        let mut state = self.state();
        state.fail("delete_load_balancer")?;
        let pos = state
            .lbs
            .iter()
            .position(|lb| lb.id == lb_id && lb.zone == *zone)
            .ok_or_else(|| ProviderError::not_found("load balancer", lb_id))?;
        let lb = state.lbs.remove(pos);

        let frontends: Vec<String> = state
            .frontends
            .iter()
            .filter(|f| f.lb_id == lb.id)
            .map(|f| f.id.clone())
            .collect();
        state.acls.retain(|a| !frontends.contains(&a.frontend_id));
        state.frontends.retain(|f| f.lb_id != lb.id);
        state.backends.retain(|b| b.lb_id != lb.id);

        state.record(format!(
            "delete_load_balancer {}@{} release_ip={}",
            lb.name, zone, release_ip
        ));
        Ok(())
    }

    async fn list_backends(&self, _zone: &Zone, lb_id: &str) -> Result<Vec<Backend>> {
        let mut state = self.state();
        state.fail("list_backends")?;
        Ok(state
            .backends
            .iter()
            .filter(|b| b.lb_id == lb_id)
            .cloned()
            .collect())
    }

    async fn create_backend(
        &self,
        _zone: &Zone,
        lb_id: &str,
        req: CreateBackendRequest,
    ) -> Result<Backend> {
        let mut state = self.state();
        state.fail("create_backend")?;
        let backend = Backend {
            id: new_id(),
            lb_id: lb_id.to_string(),
            name: req.name,
            forward_port: req.forward_port,
            servers: req.servers,
        };
        state.record(format!("create_backend {lb_id}"));
        state.backends.push(backend.clone());
        Ok(backend)
    }

    async fn set_backend_servers(
        &self,
        _zone: &Zone,
        backend_id: &str,
        servers: &[IpAddr],
    ) -> Result<Backend> {
        let mut state = self.state();
        state.fail("set_backend_servers")?;
        let backend = state
            .backends
            .iter_mut()
            .find(|b| b.id == backend_id)
            .ok_or_else(|| ProviderError::not_found("backend", backend_id))?;
        backend.servers = servers.to_vec();
        let backend = backend.clone();
        state.record(format!("set_backend_servers {}", backend.lb_id));
        Ok(backend)
    }

    async fn list_frontends(&self, _zone: &Zone, lb_id: &str) -> Result<Vec<Frontend>> {
        let mut state = self.state();
        state.fail("list_frontends")?;
        Ok(state
            .frontends
            .iter()
            .filter(|f| f.lb_id == lb_id)
            .cloned()
            .collect())
    }

    async fn create_frontend(
        &self,
        _zone: &Zone,
        lb_id: &str,
        req: CreateFrontendRequest,
    ) -> Result<Frontend> {
        let mut state = self.state();
        state.fail("create_frontend")?;
        let frontend = Frontend {
            id: new_id(),
            lb_id: lb_id.to_string(),
            name: req.name,
            inbound_port: req.inbound_port,
            backend_id: req.backend_id,
        };
        state.record(format!("create_frontend {lb_id}"));
        state.frontends.push(frontend.clone());
        Ok(frontend)
    }

    async fn list_acls(&self, _zone: &Zone, frontend_id: &str) -> Result<Vec<AclRule>> {
        let mut state = self.state();
        state.fail("list_acls")?;
        Ok(state
            .acls
            .iter()
            .filter(|a| a.frontend_id == frontend_id)
            .cloned()
            .collect())
    }

    async fn create_acl(&self, _zone: &Zone, frontend_id: &str, spec: &AclSpec) -> Result<AclRule> {
        let mut state = self.state();
        state.fail("create_acl")?;
        let acl = AclRule {
            id: new_id(),
            frontend_id: frontend_id.to_string(),
            name: spec.name.clone(),
            index: spec.index,
            action: spec.action,
            ip_subnet: spec.ip_subnet.clone(),
            description: spec.description.clone(),
        };
        state.record(format!("create_acl {}", spec.name));
        state.acls.push(acl.clone());
        Ok(acl)
    }

    async fn update_acl(&self, _zone: &Zone, acl_id: &str, spec: &AclSpec) -> Result<AclRule> {
        let mut state = self.state();
        state.fail("update_acl")?;
        let acl = state
            .acls
            .iter_mut()
            .find(|a| a.id == acl_id)
            .ok_or_else(|| ProviderError::not_found("acl", acl_id))?;
        acl.name = spec.name.clone();
        acl.index = spec.index;
        acl.action = spec.action;
        acl.ip_subnet = spec.ip_subnet.clone();
        acl.description = spec.description.clone();
        let acl = acl.clone();
        state.record(format!("update_acl {}", spec.name));
        Ok(acl)
    }

    async fn delete_acl(&self, _zone: &Zone, acl_id: &str) -> Result<()> {
        let mut state = self.state();
        state.fail("delete_acl")?;
        let pos = state
            .acls
            .iter()
            .position(|a| a.id == acl_id)
            .ok_or_else(|| ProviderError::not_found("acl", acl_id))?;
        let acl = state.acls.remove(pos);
        state.record(format!("delete_acl {}", acl.name));
        Ok(())
    }

    async fn set_acls(
        &self,
        _zone: &Zone,
        frontend_id: &str,
        specs: &[AclSpec],
    ) -> Result<Vec<AclRule>> {
        let mut state = self.state();
        state.fail("set_acls")?;
        state.acls.retain(|a| a.frontend_id != frontend_id);
        let rules: Vec<AclRule> = specs
            .iter()
            .map(|spec| AclRule {
                id: new_id(),
                frontend_id: frontend_id.to_string(),
                name: spec.name.clone(),
                index: spec.index,
                action: spec.action,
                ip_subnet: spec.ip_subnet.clone(),
                description: spec.description.clone(),
            })
            .collect();
        state.acls.extend(rules.iter().cloned());
        state.record(format!("set_acls {frontend_id}"));
        Ok(rules)
    }
}

#[async_trait]
impl GatewayApi for FakeCloud {
    async fn list_gateways(&self, zone: &Zone, tags: &[String]) -> Result<Vec<Gateway>> {
        let mut state = self.state();
        state.fail("list_gateways")?;
        Ok(state
            .gateways
            .iter()
            .filter(|g| g.zone == *zone && tags.iter().all(|t| g.tags.contains(t)))
            .cloned()
            .collect())
    }
}

/// Status sink remembering the last published values.
#[derive(Default)]
pub struct FakeStatus {
    pub addresses: Mutex<HashMap<String, LoadBalancerAddresses>>,
    pub conditions: Mutex<HashMap<String, StatusCondition>>,
}

impl FakeStatus {
    pub fn addresses_of(&self, cluster: &str) -> Option<LoadBalancerAddresses> {
        self.addresses.lock().unwrap().get(cluster).cloned()
    }

    pub fn condition_of(&self, cluster: &str) -> Option<StatusCondition> {
        self.conditions.lock().unwrap().get(cluster).cloned()
    }
}

#[async_trait]
impl StatusSink for FakeStatus {
    async fn set_addresses(
        &self,
        cluster: &str,
        addresses: &LoadBalancerAddresses,
    ) -> CrateResult<()> {
        self.addresses
            .lock()
            .unwrap()
            .insert(cluster.to_string(), addresses.clone());
        Ok(())
    }

    async fn set_condition(&self, cluster: &str, condition: StatusCondition) -> CrateResult<()> {
        self.conditions
            .lock()
            .unwrap()
            .insert(cluster.to_string(), condition);
        Ok(())
    }
}

/// Route `tracing` output to the test harness.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "infra_converge=debug".into()),
        )
        .with_test_writer()
        .try_init();
}
