//! Regions, zones and zone resolution.
//!
//! A region (`fr-par`) contains numbered zones (`fr-par-1`, `fr-par-2`, ...).
//! Each product advertises the zones it supports across all regions; only
//! the subset inside the configured region is usable.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::retry::RetryableError;

/// Zone and region parsing/validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ZoneError {
    #[error("invalid region {0:?}")]
    InvalidRegion(String),

    #[error("invalid zone {0:?}")]
    InvalidZone(String),

    #[error("zone {zone} is not available for {product} in region {region}")]
    Unsupported {
        zone: String,
        product: String,
        region: String,
    },
}

/// Checks `<2 lowercase letters>-<3 lowercase letters>`.
fn is_region(s: &str) -> bool {
    match s.split_once('-') {
        Some((country, city)) => {
            country.len() == 2
                && city.len() == 3
                && country.chars().all(|c| c.is_ascii_lowercase())
                && city.chars().all(|c| c.is_ascii_lowercase())
        }
        None => false,
    }
}

/// A cloud region such as `fr-par`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Region(String);

impl Region {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Region {
    fn default() -> Self {
        Self("fr-par".to_string())
    }
}

impl FromStr for Region {
    type Err = ZoneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if is_region(s) {
            Ok(Self(s.to_string()))
        } else {
            Err(ZoneError::InvalidRegion(s.to_string()))
        }
    }
}

impl TryFrom<String> for Region {
    type Error = ZoneError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Region> for String {
    fn from(r: Region) -> Self {
        r.0
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A zone such as `fr-par-1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Zone(String);

impl Zone {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The region this zone belongs to.
    pub fn region(&self) -> Region {
        // Validated on construction: everything before the last '-' is a region.
        let (region, _) = self.0.rsplit_once('-').unwrap_or((&self.0, ""));
        Region(region.to_string())
    }
}

impl FromStr for Zone {
    type Err = ZoneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = match s.rsplit_once('-') {
            Some((region, number)) => {
                is_region(region)
                    && !number.is_empty()
                    && number.chars().all(|c| c.is_ascii_digit())
            }
            None => false,
        };
        if valid {
            Ok(Self(s.to_string()))
        } else {
            Err(ZoneError::InvalidZone(s.to_string()))
        }
    }
}

impl TryFrom<String> for Zone {
    type Error = ZoneError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Zone> for String {
    fn from(z: Zone) -> Self {
        z.0
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A product that advertises the zones it is available in.
pub trait ZonedProduct {
    /// Product name, used in error messages.
    fn product_name(&self) -> &str;

    /// Every zone the product supports, across all regions.
    fn zones(&self) -> Vec<Zone>;
}

/// Resolves optional zone overrides against the configured region.
#[derive(Debug, Clone)]
pub struct ZoneResolver {
    region: Region,
}

impl ZoneResolver {
    pub fn new(region: Region) -> Self {
        Self { region }
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    /// `<region>-1`.
    pub fn default_zone(&self) -> Zone {
        Zone(format!("{}-1", self.region))
    }

    /// Parse `zone` if given, otherwise return the default zone.
    pub fn zone_or_default(&self, zone: Option<&str>) -> Result<Zone, RetryableError> {
        match zone {
            Some(z) => z.parse().map_err(RetryableError::terminal),
            None => Ok(self.default_zone()),
        }
    }

    /// Zones of `product` inside the configured region.
    ///
    /// Falls back to the default zone when the product advertises nothing in
    /// this region.
    pub fn product_zones(&self, product: &dyn ZonedProduct) -> Vec<Zone> {
        let zones: Vec<Zone> = product
            .zones()
            .into_iter()
            .filter(|z| z.region() == self.region)
            .collect();

        if zones.is_empty() {
            debug!(
                product = product.product_name(),
                region = %self.region,
                "Product advertises no zone in region, using default zone"
            );
            return vec![self.default_zone()];
        }
        zones
    }

    /// Reject a zone the product does not support in this region.
    pub fn validate_zone(
        &self,
        product: &dyn ZonedProduct,
        zone: &Zone,
    ) -> Result<(), RetryableError> {
        if self.product_zones(product).contains(zone) {
            Ok(())
        } else {
            Err(RetryableError::terminal(ZoneError::Unsupported {
                zone: zone.to_string(),
                product: product.product_name().to_string(),
                region: self.region.to_string(),
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryKind;

    struct Product(Vec<&'static str>);

    impl ZonedProduct for Product {
        fn product_name(&self) -> &str {
            "load balancer"
        }

        fn zones(&self) -> Vec<Zone> {
            self.0.iter().map(|z| z.parse().unwrap()).collect()
        }
    }

    fn resolver(region: &str) -> ZoneResolver {
        ZoneResolver::new(region.parse().unwrap())
    }

    #[test]
    fn test_zone_or_default() {
        let r = resolver("fr-par");
        assert_eq!(r.zone_or_default(None).unwrap().as_str(), "fr-par-1");
        assert_eq!(
            r.zone_or_default(Some("fr-par-2")).unwrap().as_str(),
            "fr-par-2"
        );

        let err = r.zone_or_default(Some("paris")).unwrap_err();
        assert_eq!(err.kind(), RetryKind::Terminal);
    }

    #[test]
    fn test_parse_zone_and_region() {
        let zone: Zone = "nl-ams-3".parse().unwrap();
        assert_eq!(zone.region().as_str(), "nl-ams");

        assert!("nl-ams".parse::<Zone>().is_err());
        assert!("nl-ams-".parse::<Zone>().is_err());
        assert!("NL-ams-1".parse::<Zone>().is_err());
        assert!("fr-par-1".parse::<Region>().is_err());
        assert!("fr-par".parse::<Region>().is_ok());
    }

    #[test]
    fn test_product_zones_filters_region() {
        let product = Product(vec!["fr-par-1", "fr-par-2", "nl-ams-1", "pl-waw-1"]);
        let zones = resolver("fr-par").product_zones(&product);
        let names: Vec<&str> = zones.iter().map(Zone::as_str).collect();
        assert_eq!(names, vec!["fr-par-1", "fr-par-2"]);
    }

    #[test]
    fn test_product_zones_fallback() {
        let product = Product(vec!["nl-ams-1"]);
        let zones = resolver("pl-waw").product_zones(&product);
        assert_eq!(zones, vec!["pl-waw-1".parse::<Zone>().unwrap()]);
    }

    #[test]
    fn test_validate_zone() {
        let product = Product(vec!["fr-par-1", "fr-par-2", "nl-ams-1"]);
        let r = resolver("fr-par");

        assert!(r.validate_zone(&product, &"fr-par-2".parse().unwrap()).is_ok());

        // Advertised by the product, but in another region.
        let err = r
            .validate_zone(&product, &"nl-ams-1".parse().unwrap())
            .unwrap_err();
        assert!(err.is_terminal());

        let err = r
            .validate_zone(&product, &"fr-par-3".parse().unwrap())
            .unwrap_err();
        assert!(err.to_string().contains("fr-par-3"));
    }

    #[test]
    fn test_zone_serde() {
        let zone: Zone = serde_json::from_str("\"fr-par-2\"").unwrap();
        assert_eq!(zone.as_str(), "fr-par-2");
        assert!(serde_json::from_str::<Zone>("\"fr\"").is_err());
    }
}
