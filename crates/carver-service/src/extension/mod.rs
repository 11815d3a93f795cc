//! Service extensions
//!
//! An extension customizes a service by subscribing to its lifecycle events
//! and contributing filters, environment variables and containers through the
//! facade. New kinds of extension only need to implement
//! [`ServiceExtension`].

use carver_common::{Error, Result};

use crate::facade::ServiceFacade;
use crate::scope::PrivateScope;

pub mod capacity;
pub mod container;
pub mod env_vars;
pub mod gateway_route;
pub mod http_route;
pub mod linked_service;
pub mod oidc_proxy;
pub mod task_size;

pub use capacity::{
    capacity_provider_strategies, spot_capacity, CapacityProviderStrategiesExtension,
};
pub use container::{container, ContainerExtension, ContainerOptions};
pub use env_vars::{env_vars, EnvVarsExtension};
pub use gateway_route::{
    http2_gateway_route, http_gateway_route, GatewayRouteExtension, GatewayRouteOptions,
};
pub use http_route::{http_route, HttpRouteExtension, HttpRouteOptions};
pub use linked_service::{linked_service, LinkedServiceExtension, LinkedServiceOptions};
pub use oidc_proxy::{OidcHttpProxyExtension, OidcHttpProxyOptions, OidcPlaintextCredentials};
pub use task_size::{task_size, TaskSizeExtension, TaskSizeOptions};

/// A pluggable unit of service behavior
pub trait ServiceExtension {
    /// Tag shared by every instance of this kind; namespaces are derived from it
    fn type_name(&self) -> &str;

    /// Called exactly once per service, with the facade and this instance's
    /// private scope.
    fn register(&self, service: &ServiceFacade, scope: &PrivateScope) -> Result<()>;
}

/// Route prefixes must be absolute.
pub(crate) fn validate_prefix(path: &str) -> Result<()> {
    if !path.starts_with('/') {
        return Err(Error::invalid_path(path));
    }
    Ok(())
}
