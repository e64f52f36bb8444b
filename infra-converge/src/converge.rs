//! Generic desired-state convergence.
//!
//! [`ensure`] drives a collection of live resources toward a list of desired
//! specs using a small capability object ([`Convergent`]). The engine holds no
//! state between calls: every call starts from a fresh `list_resources`.
//!
//! Resource identity is the pair (zone, generated name). Desired specs are
//! bucketed per zone, keeping their relative order, and the i-th spec of a
//! bucket is named `desired_resource_name(i)`. Reordering the caller's list
//! therefore renames (and recreates) resources.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::Result;
use crate::zone::Zone;

/// Capability object for one resource class.
#[async_trait]
pub trait Convergent: Send + Sync {
    /// Caller-declared spec.
    type Desired: Send + Sync;
    /// Live resource as read from the provider.
    type Resource: Send + Sync;

    /// Every live resource of this class.
    async fn list_resources(&self) -> Result<Vec<Self::Resource>>;

    async fn create_resource(
        &self,
        zone: &Zone,
        name: &str,
        desired: &Self::Desired,
    ) -> Result<Self::Resource>;

    /// Bring a kept resource in line with `desired`. Must not call the
    /// provider when nothing differs.
    async fn update_resource(
        &self,
        resource: Self::Resource,
        desired: &Self::Desired,
    ) -> Result<Self::Resource>;

    async fn delete_resource(&self, resource: &Self::Resource) -> Result<()>;

    fn resource_zone(&self, resource: &Self::Resource) -> Zone;

    fn resource_name(&self, resource: &Self::Resource) -> String;

    /// Zone the desired spec resolves to.
    fn desired_zone(&self, desired: &Self::Desired) -> Result<Zone>;

    /// Name of the `index`-th desired spec within its zone.
    fn desired_resource_name(&self, index: usize) -> String;

    /// Whether `resource` can be kept (and updated) for `desired`, or must be
    /// deleted and recreated.
    fn should_keep_resource(&self, resource: &Self::Resource, desired: &Self::Desired)
    -> Result<bool>;
}

/// Converge live resources toward `desired` and return the resulting set.
///
/// Kept resources are updated as they are matched, then unmatched resources
/// are deleted, then missing ones are created. A failing call aborts the
/// whole pass without rolling back what already happened; the next call
/// picks up from whatever the provider reports.
///
/// The returned order is unspecified.
pub async fn ensure<C>(capability: &C, desired: &[C::Desired]) -> Result<Vec<C::Resource>>
where
    C: Convergent + ?Sized,
{
    // Zone buckets, each holding (generated name, spec) in declaration order.
    let mut buckets: BTreeMap<Zone, Vec<(String, &C::Desired)>> = BTreeMap::new();
    for spec in desired {
        let zone = capability.desired_zone(spec)?;
        let bucket = buckets.entry(zone).or_default();
        let name = capability.desired_resource_name(bucket.len());
        bucket.push((name, spec));
    }

    let existing = capability.list_resources().await?;
    debug!(
        desired = desired.len(),
        existing = existing.len(),
        "Converging resources"
    );

    let mut claimed: HashSet<(Zone, String)> = HashSet::new();
    let mut retained = Vec::new();
    let mut to_delete = Vec::new();

    for resource in existing {
        let zone = capability.resource_zone(&resource);
        let name = capability.resource_name(&resource);

        let candidate = buckets
            .get(&zone)
            .and_then(|bucket| bucket.iter().find(|(n, _)| *n == name));

        let Some((_, spec)) = candidate else {
            to_delete.push(resource);
            continue;
        };

        // A second live resource for an already claimed slot is a duplicate.
        let slot = (zone, name);
        if claimed.contains(&slot) || !capability.should_keep_resource(&resource, spec)? {
            to_delete.push(resource);
            continue;
        }

        let resource = capability.update_resource(resource, spec).await?;
        claimed.insert(slot);
        retained.push(resource);
    }

    for resource in &to_delete {
        info!(
            zone = %capability.resource_zone(resource),
            name = %capability.resource_name(resource),
            "Deleting resource"
        );
        capability.delete_resource(resource).await?;
    }

    for (zone, bucket) in &buckets {
        for (name, spec) in bucket {
            if claimed.contains(&(zone.clone(), name.clone())) {
                continue;
            }
            info!(zone = %zone, name = %name, "Creating resource");
            let created = capability.create_resource(zone, name, spec).await?;
            retained.push(created);
        }
    }

    Ok(retained)
}
