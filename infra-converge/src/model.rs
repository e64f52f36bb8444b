//! Live resources as reported by the cloud provider.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

use serde::{Deserialize, Serialize};

use crate::zone::Zone;

/// Load balancer lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LbStatus {
    Ready,
    Pending,
    Migrating,
    Deleting,
    Error,
    Unknown,
}

impl fmt::Display for LbStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LbStatus::Ready => "ready",
            LbStatus::Pending => "pending",
            LbStatus::Migrating => "migrating",
            LbStatus::Deleting => "deleting",
            LbStatus::Error => "error",
            LbStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancer {
    pub id: String,
    pub zone: Zone,
    pub name: String,
    pub tags: Vec<String>,
    pub status: LbStatus,
    /// Assigned IPs; empty while the provider has not allocated one.
    pub ips: Vec<IpAddr>,
    /// Commercial type, e.g. `LB-S`.
    pub lb_type: String,
}

impl LoadBalancer {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// First assigned IPv4 address.
    pub fn ipv4(&self) -> Option<Ipv4Addr> {
        self.ips.iter().find_map(|ip| match ip {
            IpAddr::V4(v4) => Some(*v4),
            IpAddr::V6(_) => None,
        })
    }
}

/// Backend of a load balancer: forward port plus pool of member IPs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backend {
    pub id: String,
    pub lb_id: String,
    pub name: String,
    pub forward_port: u16,
    pub servers: Vec<IpAddr>,
}

/// Frontend of a load balancer: inbound port routed to a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frontend {
    pub id: String,
    pub lb_id: String,
    pub name: String,
    pub inbound_port: u16,
    pub backend_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AclAction {
    Allow,
    Deny,
}

/// ACL rule attached to a frontend, evaluated in ascending `index` order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclRule {
    pub id: String,
    pub frontend_id: String,
    pub name: String,
    pub index: i32,
    pub action: AclAction,
    /// CIDR match set; order carries no meaning.
    pub ip_subnet: Vec<String>,
    pub description: String,
}

impl AclRule {
    /// The provider-independent part of the rule.
    pub fn to_spec(&self) -> AclSpec {
        AclSpec {
            name: self.name.clone(),
            index: self.index,
            action: self.action,
            ip_subnet: self.ip_subnet.clone(),
            description: self.description.clone(),
        }
    }
}

/// ACL rule content used for create, update and bulk replace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclSpec {
    pub name: String,
    pub index: i32,
    pub action: AclAction,
    pub ip_subnet: Vec<String>,
    pub description: String,
}

/// Public (NAT) gateway of a private network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gateway {
    pub id: String,
    pub zone: Zone,
    pub name: String,
    pub tags: Vec<String>,
    pub ipv4: Option<Ipv4Addr>,
}
