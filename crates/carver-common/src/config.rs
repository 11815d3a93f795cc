//! Deployment preferences
//!
//! Preferences decide two defaults for every service in an environment:
//! whether tasks land in public subnets with a public IP, and whether the
//! cluster leans on spot capacity. They are read once when the environment
//! is built and then passed around explicitly.

use serde::{Deserialize, Serialize};

use crate::resources::{CapacityProvider, CapacityProviderStrategy, SubnetType};
use crate::Result;

/// Environment variable toggling public service networking
pub const PUBLIC_SERVICE_NETWORKING_ENV: &str = "CARVER_PUBLIC_SERVICE_NETWORKING";

/// Environment variable toggling spot capacity
pub const USE_SPOT_CAPACITY_ENV: &str = "CARVER_USE_SPOT_CAPACITY";

/// Deployment-wide preferences
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Preferences {
    /// Run tasks in public subnets with a public IP instead of private subnets
    pub use_public_service_networking: bool,
    /// Prefer spot capacity for services
    pub use_spot_capacity: bool,
}

impl Preferences {
    /// Parse an explicit preferences document.
    pub fn from_json(doc: &str) -> Result<Self> {
        serde_json::from_str(doc).map_err(|e| {
            crate::Error::serialization_for_kind("Preferences", e.to_string())
        })
    }

    /// Read preferences from a source.
    pub fn load(source: &dyn PreferencesSource) -> Self {
        Self {
            use_public_service_networking: source.public_service_networking(),
            use_spot_capacity: source.use_spot_capacity(),
        }
    }
}

/// Where preferences come from
///
/// Abstracted so tests can supply values without touching process state.
#[cfg_attr(test, mockall::automock)]
pub trait PreferencesSource {
    /// Whether services should use public networking
    fn public_service_networking(&self) -> bool;

    /// Whether services should prefer spot capacity
    fn use_spot_capacity(&self) -> bool;
}

/// Reads preferences from process environment variables
#[derive(Clone, Copy, Debug, Default)]
pub struct OsEnvPreferences;

impl PreferencesSource for OsEnvPreferences {
    fn public_service_networking(&self) -> bool {
        env_flag(PUBLIC_SERVICE_NETWORKING_ENV)
    }

    fn use_spot_capacity(&self) -> bool {
        env_flag(USE_SPOT_CAPACITY_ENV)
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name).map(|v| is_truthy(&v)).unwrap_or(false)
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes"
    )
}

/// Network placement applied to every service by default
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceNetworkConfig {
    pub assign_public_ip: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc_subnets: Option<SubnetType>,
}

/// Default network placement for services under `prefs`
pub fn default_service_network_config(prefs: &Preferences) -> ServiceNetworkConfig {
    if prefs.use_public_service_networking {
        ServiceNetworkConfig {
            assign_public_ip: true,
            vpc_subnets: None,
        }
    } else {
        ServiceNetworkConfig {
            assign_public_ip: false,
            vpc_subnets: Some(SubnetType::Private),
        }
    }
}

/// Default capacity provider mix for services under `prefs`
pub fn default_capacity_provider_strategy(prefs: &Preferences) -> Vec<CapacityProviderStrategy> {
    if prefs.use_spot_capacity {
        vec![
            CapacityProviderStrategy::new(CapacityProvider::Spot, 1000),
            CapacityProviderStrategy::new(CapacityProvider::Standard, 1),
        ]
    } else {
        vec![CapacityProviderStrategy::new(CapacityProvider::Standard, 1)]
    }
}
