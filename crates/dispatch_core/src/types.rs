//! Identifiers and vehicle classes shared by every component.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }
    };
}

id_type!(
    /// Unique driver identity; also the partition key of the location stream.
    DriverId
);
id_type!(RiderId);
id_type!(
    /// Ride request identity assigned by the intake boundary.
    RequestId
);

/// Vehicle class name, always stored upper-cased.
///
/// Classes are open-ended: the set of known classes is whatever the ETA
/// multiplier table in [`crate::config::EtaConfig`] lists.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct VehicleClass(String);

impl VehicleClass {
    pub const STANDARD: &'static str = "STANDARD";
    pub const PREMIUM: &'static str = "PREMIUM";
    pub const POOL: &'static str = "POOL";

    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().trim().to_ascii_uppercase())
    }

    pub fn standard() -> Self {
        Self::new(Self::STANDARD)
    }

    pub fn premium() -> Self {
        Self::new(Self::PREMIUM)
    }

    pub fn pool() -> Self {
        Self::new(Self::POOL)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VehicleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for VehicleClass {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for VehicleClass {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<VehicleClass> for String {
    fn from(value: VehicleClass) -> Self {
        value.0
    }
}

/// The vehicle classes the system will accept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VehicleClassSet(BTreeSet<VehicleClass>);

impl VehicleClassSet {
    pub fn contains(&self, class: &VehicleClass) -> bool {
        self.0.contains(class)
    }

    pub fn iter(&self) -> impl Iterator<Item = &VehicleClass> {
        self.0.iter()
    }
}

impl<S: AsRef<str>> FromIterator<S> for VehicleClassSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(VehicleClass::new).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vehicle_class_is_normalized() {
        assert_eq!(VehicleClass::new(" premium "), VehicleClass::premium());
        let parsed: VehicleClass = serde_json::from_str("\"pool\"").expect("class");
        assert_eq!(parsed.as_str(), "POOL");
    }

    #[test]
    fn class_set_normalizes_members() {
        let classes: VehicleClassSet = ["standard", "Premium"].into_iter().collect();
        assert!(classes.contains(&VehicleClass::premium()));
        assert!(!classes.contains(&VehicleClass::pool()));
    }

    #[test]
    fn ids_serialize_as_plain_numbers() {
        let json = serde_json::to_string(&DriverId(42)).expect("json");
        assert_eq!(json, "42");
    }
}
