//! Ownership tag convention.
//!
//! Cloud resources carry no owner field, so ownership is expressed with
//! tags and every lookup filters on them. The convention is load-bearing:
//!
//! - `created-by=<controller>` marks resources this controller may mutate or
//!   delete. Resources without it are never touched.
//! - `cluster=<name>` scopes a resource to one cluster. Two clusters with the
//!   same name under the same controller would collide.
//! - `role=<role>` distinguishes resource categories sharing a kind (the
//!   primary load balancer versus the secondary ones).
//! - `managed-ip` marks that the controller, not the caller, owns the
//!   resource's IP address and may release it on deletion.

/// Tag marking a controller-owned IP address.
pub const MANAGED_IP_TAG: &str = "managed-ip";

/// Resource categories distinguished by a `role=` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    PrimaryLoadBalancer,
    ExtraLoadBalancer,
}

impl Role {
    pub fn tag(&self) -> String {
        let role = match self {
            Role::PrimaryLoadBalancer => "lb-primary",
            Role::ExtraLoadBalancer => "lb-extra",
        };
        format!("role={role}")
    }
}

/// Owner of a set of cloud resources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ownership {
    controller: String,
    cluster: String,
}

impl Ownership {
    pub fn new(controller: impl Into<String>, cluster: impl Into<String>) -> Self {
        Self {
            controller: controller.into(),
            cluster: cluster.into(),
        }
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    /// Tags shared by every resource of the cluster.
    pub fn tags(&self) -> Vec<String> {
        vec![
            format!("created-by={}", self.controller),
            format!("cluster={}", self.cluster),
        ]
    }

    /// Ownership tags plus the role tag.
    pub fn tags_for(&self, role: Role) -> Vec<String> {
        let mut tags = self.tags();
        tags.push(role.tag());
        tags
    }

    /// Whether `tags` carries every ownership tag.
    pub fn owns(&self, tags: &[String]) -> bool {
        self.tags().iter().all(|t| tags.contains(t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_for_role() {
        let owner = Ownership::new("infra-converge", "demo");
        assert_eq!(
            owner.tags_for(Role::ExtraLoadBalancer),
            vec!["created-by=infra-converge", "cluster=demo", "role=lb-extra"]
        );
    }

    #[test]
    fn test_owns() {
        let owner = Ownership::new("infra-converge", "demo");
        let mut tags = owner.tags_for(Role::PrimaryLoadBalancer);
        tags.push(MANAGED_IP_TAG.to_string());
        assert!(owner.owns(&tags));

        let other = Ownership::new("infra-converge", "demo-2");
        assert!(!other.owns(&tags));
    }
}
