//! Desired state and reconciler settings.
//!
//! Both are plain serde types so the caller can load them from whatever it
//! stores them in (a custom resource, a JSON file).

use std::net::IpAddr;
use std::time::Duration;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::retry::{DEFAULT_TRANSIENT_DELAY, RetryableError};
use crate::zone::Region;

/// Load balancer placement and sizing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerSpec {
    /// Zone override; the region's first zone when unset.
    #[serde(default)]
    pub zone: Option<String>,
    /// Commercial type; the reconciler default when unset.
    #[serde(default, rename = "type")]
    pub lb_type: Option<String>,
    /// Existing IP to attach instead of letting the provider allocate one.
    #[serde(default)]
    pub ip: Option<IpAddr>,
}

/// Desired infrastructure of one cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterInfraSpec {
    /// Cluster name, used for resource names and ownership tags.
    pub name: String,
    #[serde(default)]
    pub load_balancer: LoadBalancerSpec,
    /// Secondary load balancers. Their names derive from their position in
    /// this list (per zone), so reordering recreates them.
    #[serde(default)]
    pub extra_load_balancers: Vec<LoadBalancerSpec>,
    /// CIDRs allowed to reach the API server. Empty means unrestricted.
    #[serde(default)]
    pub allowed_ranges: Vec<String>,
}

impl ClusterInfraSpec {
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Reject declarations that can never converge.
    pub fn validate(&self) -> Result<(), RetryableError> {
        if self.name.is_empty() {
            return Err(RetryableError::terminal("cluster name is required"));
        }
        for range in &self.allowed_ranges {
            if range.parse::<IpNet>().is_err() && range.parse::<IpAddr>().is_err() {
                return Err(RetryableError::terminal(format!(
                    "allowed range {range:?} is not a valid CIDR"
                )));
            }
        }
        Ok(())
    }
}

/// A cluster member reachable through the load balancers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterMember {
    pub name: String,
    /// Address added to the backend pools.
    pub private_ip: IpAddr,
    /// Public egress IPs allowed through the frontends' ACLs.
    #[serde(default)]
    pub public_ips: Vec<IpAddr>,
}

/// Reconciler settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconcilerConfig {
    pub region: Region,
    /// Value of the `created-by` ownership tag.
    pub controller_name: String,
    pub default_lb_type: String,
    /// Frontend port, fixed at frontend creation.
    pub inbound_port: u16,
    /// Backend port on the members.
    pub forward_port: u16,
    /// Requeue delay for transient errors without a suggested delay.
    pub transient_delay_secs: u64,
    /// Requeue delay while a load balancer is not ready.
    pub not_ready_delay_secs: u64,
    /// Periodic resync after a successful tick.
    pub resync_interval_secs: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            region: Region::default(),
            controller_name: "infra-converge".to_string(),
            default_lb_type: "LB-S".to_string(),
            inbound_port: 6443,
            forward_port: 6443,
            transient_delay_secs: DEFAULT_TRANSIENT_DELAY.as_secs(),
            not_ready_delay_secs: 15,
            resync_interval_secs: 300,
        }
    }
}

impl ReconcilerConfig {
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    pub fn transient_delay(&self) -> Duration {
        Duration::from_secs(self.transient_delay_secs)
    }

    pub fn not_ready_delay(&self) -> Duration {
        Duration::from_secs(self.not_ready_delay_secs)
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cluster_spec() {
        let spec = ClusterInfraSpec::from_json(
            r#"{
                "name": "demo",
                "loadBalancer": { "zone": "fr-par-2", "type": "LB-GP-M" },
                "extraLoadBalancers": [
                    { "zone": "fr-par-1" },
                    { "ip": "51.15.10.20" }
                ],
                "allowedRanges": ["10.0.0.0/8", "192.168.1.10"]
            }"#,
        )
        .unwrap();

        assert_eq!(spec.load_balancer.zone.as_deref(), Some("fr-par-2"));
        assert_eq!(spec.load_balancer.lb_type.as_deref(), Some("LB-GP-M"));
        assert_eq!(spec.extra_load_balancers.len(), 2);
        assert_eq!(
            spec.extra_load_balancers[1].ip,
            Some("51.15.10.20".parse().unwrap())
        );
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_minimal_cluster_spec() {
        let spec = ClusterInfraSpec::from_json(r#"{ "name": "demo" }"#).unwrap();
        assert_eq!(spec.load_balancer, LoadBalancerSpec::default());
        assert!(spec.extra_load_balancers.is_empty());
        assert!(spec.allowed_ranges.is_empty());
    }

    #[test]
    fn test_validate_rejects_bad_range() {
        let spec = ClusterInfraSpec {
            name: "demo".into(),
            allowed_ranges: vec!["10.0.0.0/33".into()],
            ..Default::default()
        };
        assert!(spec.validate().unwrap_err().is_terminal());
    }

    #[test]
    fn test_config_defaults_and_overrides() {
        let config = ReconcilerConfig::from_json(r#"{ "region": "nl-ams", "inboundPort": 443 }"#)
            .unwrap();
        assert_eq!(config.region.as_str(), "nl-ams");
        assert_eq!(config.inbound_port, 443);
        assert_eq!(config.forward_port, 6443);
        assert_eq!(config.resync_interval(), Duration::from_secs(300));

        assert!(ReconcilerConfig::from_json(r#"{ "region": "nowhere" }"#).is_err());
    }
}
