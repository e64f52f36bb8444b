//! Frontend ACL synchronization.
//!
//! The primary frontend carries three cluster-wide rules:
//!
//! | name             | action | match                          | index        |
//! |------------------|--------|--------------------------------|--------------|
//! | `allowed-ranges` | allow  | declared CIDR allow-list       | 0            |
//! | `public-gateway` | allow  | IPv4 of the cluster's gateways | 0            |
//! | `deny-all`       | deny   | `0.0.0.0/0`, `::/0`            | `i32::MAX`   |
//!
//! `deny-all` only exists when the allow-list is non-empty, so a cluster
//! without allow-list accepts all traffic. Once settled, the primary rule
//! set is copied verbatim to every secondary frontend.
//!
//! Independently, each cluster member gets its own `member-<name>` allow
//! rule on every frontend, matching its public egress IPs. Member rules are
//! left out of the replication.

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr};

use ipnet::IpNet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::clients::{LoadBalancerApi, call};
use crate::error::Result;
use crate::loadbalancer::Endpoint;
use crate::model::{AclAction, AclRule, AclSpec};

pub const ALLOWED_RANGES_RULE: &str = "allowed-ranges";
pub const PUBLIC_GATEWAY_RULE: &str = "public-gateway";
pub const DENY_ALL_RULE: &str = "deny-all";

/// Index shared by the two cluster-wide allow rules.
pub const ALLOW_INDEX: i32 = 0;
/// Evaluated last.
pub const DENY_ALL_INDEX: i32 = i32::MAX;

pub const MEMBER_RULE_PREFIX: &str = "member-";
pub const MEMBER_RULE_INDEX: i32 = i32::MAX / 2;

pub fn member_rule_name(member: &str) -> String {
    format!("{MEMBER_RULE_PREFIX}{member}")
}

pub fn is_member_rule(name: &str) -> bool {
    name.starts_with(MEMBER_RULE_PREFIX)
}

fn host_subnet(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => format!("{v4}/32"),
        IpAddr::V6(v6) => format!("{v6}/128"),
    }
}

/// Canonical form of a subnet entry: host bits cleared, a bare address is
/// a host subnet.
fn normalize_subnet(subnet: &str) -> String {
    let subnet = subnet.trim();
    if let Ok(net) = subnet.parse::<IpNet>() {
        return net.trunc().to_string();
    }
    if let Ok(ip) = subnet.parse::<IpAddr>() {
        return host_subnet(ip);
    }
    subnet.to_string()
}

/// Order-independent view of a subnet list.
pub fn subnet_set(subnets: &[String]) -> BTreeSet<String> {
    subnets.iter().map(|s| normalize_subnet(s)).collect()
}

type RuleKey = (String, i32, AclAction, BTreeSet<String>);

fn rule_key(spec: &AclSpec) -> RuleKey {
    (
        spec.name.clone(),
        spec.index,
        spec.action,
        subnet_set(&spec.ip_subnet),
    )
}

/// Whether two rule lists enforce the same policy, ignoring the order of
/// rules, the order of subnets and descriptions.
pub fn rules_equivalent(a: &[AclSpec], b: &[AclSpec]) -> bool {
    let mut a: Vec<RuleKey> = a.iter().map(rule_key).collect();
    let mut b: Vec<RuleKey> = b.iter().map(rule_key).collect();
    a.sort();
    b.sort();
    a == b
}

/// The three cluster-wide rules. A rule with an empty subnet list is one
/// that must not exist.
pub fn cluster_rules(
    allowed_ranges: &[String],
    gateway_ips: &[Ipv4Addr],
    description: &str,
) -> Vec<AclSpec> {
    let deny_all = if allowed_ranges.is_empty() {
        Vec::new()
    } else {
        vec!["0.0.0.0/0".to_string(), "::/0".to_string()]
    };

    vec![
        AclSpec {
            name: ALLOWED_RANGES_RULE.to_string(),
            index: ALLOW_INDEX,
            action: AclAction::Allow,
            ip_subnet: allowed_ranges.to_vec(),
            description: description.to_string(),
        },
        AclSpec {
            name: PUBLIC_GATEWAY_RULE.to_string(),
            index: ALLOW_INDEX,
            action: AclAction::Allow,
            ip_subnet: gateway_ips
                .iter()
                .map(|ip| host_subnet(IpAddr::V4(*ip)))
                .collect(),
            description: description.to_string(),
        },
        AclSpec {
            name: DENY_ALL_RULE.to_string(),
            index: DENY_ALL_INDEX,
            action: AclAction::Deny,
            ip_subnet: deny_all,
            description: description.to_string(),
        },
    ]
}

/// Converges ACL rules on load balancer frontends.
pub struct AclSynchronizer<'a, L> {
    api: &'a L,
    cancel: &'a CancellationToken,
    description: String,
}

impl<'a, L: LoadBalancerApi> AclSynchronizer<'a, L> {
    pub fn new(api: &'a L, cancel: &'a CancellationToken, controller: &str) -> Self {
        Self {
            api,
            cancel,
            description: format!("managed by {controller}"),
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    async fn list(&self, endpoint: &Endpoint) -> Result<Vec<AclRule>> {
        call(
            self.cancel,
            &format!("list acls of {}", endpoint.lb.name),
            self.api.list_acls(&endpoint.lb.zone, &endpoint.frontend.id),
        )
        .await
    }

    /// Converge each named rule of `desired` on the endpoint's frontend and
    /// return the frontend's resulting rule list.
    ///
    /// Deny rules are removed first and allow rules last: after any prefix
    /// of the pass, the frontend allows whatever both the old and the new
    /// policy allow.
    pub async fn converge_rules(
        &self,
        endpoint: &Endpoint,
        desired: &[AclSpec],
    ) -> Result<Vec<AclRule>> {
        let (removals, upserts): (Vec<&AclSpec>, Vec<&AclSpec>) =
            desired.iter().partition(|s| s.ip_subnet.is_empty());
        let (deny_removals, allow_removals): (Vec<&AclSpec>, Vec<&AclSpec>) = removals
            .into_iter()
            .partition(|s| s.action == AclAction::Deny);

        let mut rules = self.list(endpoint).await?;
        for spec in deny_removals.into_iter().chain(upserts).chain(allow_removals) {
            self.converge_rule(endpoint, &mut rules, spec).await?;
        }
        Ok(rules)
    }

    /// Delete, create or update one rule so it matches `spec`; `rules` is
    /// the frontend's current rule list and is kept up to date.
    async fn converge_rule(
        &self,
        endpoint: &Endpoint,
        rules: &mut Vec<AclRule>,
        spec: &AclSpec,
    ) -> Result<()> {
        let zone = &endpoint.lb.zone;
        let lb = &endpoint.lb.name;
        let pos = rules.iter().position(|r| r.name == spec.name);

        match pos {
            None if spec.ip_subnet.is_empty() => {}
            Some(i) if spec.ip_subnet.is_empty() => {
                info!(lb = %lb, rule = %spec.name, "Deleting ACL rule");
                call(
                    self.cancel,
                    &format!("delete acl {} of {lb}", spec.name),
                    self.api.delete_acl(zone, &rules[i].id),
                )
                .await?;
                rules.remove(i);
            }
            None => {
                info!(lb = %lb, rule = %spec.name, subnets = ?spec.ip_subnet, "Creating ACL rule");
                let rule = call(
                    self.cancel,
                    &format!("create acl {} of {lb}", spec.name),
                    self.api.create_acl(zone, &endpoint.frontend.id, spec),
                )
                .await?;
                rules.push(rule);
            }
            Some(i) => {
                let current = &rules[i];
                if current.index == spec.index
                    && current.action == spec.action
                    && subnet_set(&current.ip_subnet) == subnet_set(&spec.ip_subnet)
                {
                    debug!(lb = %lb, rule = %spec.name, "ACL rule up to date");
                    return Ok(());
                }
                info!(lb = %lb, rule = %spec.name, subnets = ?spec.ip_subnet, "Updating ACL rule");
                let rule = call(
                    self.cancel,
                    &format!("update acl {} of {lb}", spec.name),
                    self.api.update_acl(zone, &current.id, spec),
                )
                .await?;
                rules[i] = rule;
            }
        }
        Ok(())
    }

    /// Copy the primary's rules to a secondary frontend when they differ.
    ///
    /// Member rules on either side are excluded from the comparison, and
    /// the replica's own member rules survive the replacement. Returns
    /// whether the replica's rules were replaced.
    pub async fn replicate(&self, primary_rules: &[AclRule], replica: &Endpoint) -> Result<bool> {
        let current = self.list(replica).await?;

        let wanted: Vec<AclSpec> = primary_rules
            .iter()
            .filter(|r| !is_member_rule(&r.name))
            .map(AclRule::to_spec)
            .collect();
        let (own_members, have): (Vec<AclSpec>, Vec<AclSpec>) = current
            .iter()
            .map(AclRule::to_spec)
            .partition(|r| is_member_rule(&r.name));

        if rules_equivalent(&wanted, &have) {
            debug!(lb = %replica.lb.name, "Replica ACL rules up to date");
            return Ok(false);
        }

        let mut replacement = wanted;
        replacement.extend(own_members);
        info!(
            lb = %replica.lb.name,
            rules = replacement.len(),
            "Replacing replica ACL rules with the primary ones"
        );
        call(
            self.cancel,
            &format!("set acls of {}", replica.lb.name),
            self.api
                .set_acls(&replica.lb.zone, &replica.frontend.id, &replacement),
        )
        .await?;
        Ok(true)
    }

    /// Converge the member's allow rule on one frontend. An empty `ips`
    /// removes the rule.
    pub async fn ensure_member_rule(
        &self,
        endpoint: &Endpoint,
        member: &str,
        ips: &[IpAddr],
    ) -> Result<()> {
        let spec = AclSpec {
            name: member_rule_name(member),
            index: MEMBER_RULE_INDEX,
            action: AclAction::Allow,
            ip_subnet: ips.iter().map(|ip| host_subnet(*ip)).collect(),
            description: self.description.clone(),
        };
        let mut rules = self.list(endpoint).await?;
        self.converge_rule(endpoint, &mut rules, &spec).await
    }
}
