//! Gateway routes from a virtual gateway straight to this service

use std::rc::Rc;

use carver_common::resources::{GatewayRoute, MeshProtocol};
use carver_common::{ResourceKind, Result};
use carver_environment::Gateway;

use crate::extension::{validate_prefix, ServiceExtension};
use crate::facade::ServiceFacade;
use crate::scope::PrivateScope;

#[derive(Clone, Debug, Default)]
pub struct GatewayRouteOptions {
    /// Defaults to `/`
    pub prefix_path: Option<String>,
    /// Defaults to the environment's gateway
    pub gateway: Option<Gateway>,
}

impl GatewayRouteOptions {
    pub fn prefix(path: impl Into<String>) -> Self {
        Self {
            prefix_path: Some(path.into()),
            gateway: None,
        }
    }

    pub fn with_gateway(mut self, gateway: Gateway) -> Self {
        self.gateway = Some(gateway);
        self
    }
}

/// Sends gateway traffic matching a prefix to this service's virtual service
#[derive(Clone, Debug)]
pub struct GatewayRouteExtension {
    type_name: &'static str,
    resource_id: &'static str,
    protocol: MeshProtocol,
    prefix: String,
    gateway: Option<Gateway>,
}

impl GatewayRouteExtension {
    fn new(
        type_name: &'static str,
        resource_id: &'static str,
        protocol: MeshProtocol,
        options: GatewayRouteOptions,
    ) -> Result<Self> {
        let prefix = options.prefix_path.unwrap_or_else(|| "/".to_string());
        validate_prefix(&prefix)?;
        Ok(Self {
            type_name,
            resource_id,
            protocol,
            prefix,
            gateway: options.gateway,
        })
    }

    pub fn protocol(&self) -> MeshProtocol {
        self.protocol
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl ServiceExtension for GatewayRouteExtension {
    fn type_name(&self) -> &str {
        self.type_name
    }

    fn register(&self, service: &ServiceFacade, scope: &PrivateScope) -> Result<()> {
        let gateway = self
            .gateway
            .clone()
            .unwrap_or_else(|| service.default_gateway().clone());
        let gateway_connections = gateway.connections.clone();

        let (id, protocol, prefix) = (self.resource_id, self.protocol, self.prefix.clone());
        let routes = scope.clone();
        service.on_workload_ready(move |workload| {
            let route = GatewayRoute {
                name: routes.resource_name(id),
                mesh: gateway.mesh.clone(),
                virtual_gateway: gateway.name.clone(),
                protocol,
                prefix: prefix.clone(),
                target_virtual_service: workload.virtual_service.name().to_string(),
            };
            routes.emit(id, ResourceKind::GatewayRoute, &route).map(drop)
        })?;

        let rules = scope.clone();
        service.on_connections_ready(move |connections| {
            rules
                .emit_ingress_rules(&connections.allow_default_port_from(&gateway_connections))
                .map(drop)
        })
    }
}

/// HTTP/1.1 gateway route
pub fn http_gateway_route(options: GatewayRouteOptions) -> Result<Rc<dyn ServiceExtension>> {
    Ok(Rc::new(GatewayRouteExtension::new(
        "HttpGatewayRouteExtension",
        "HttpGatewayRoute",
        MeshProtocol::Http,
        options,
    )?))
}

/// HTTP/2 gateway route
pub fn http2_gateway_route(options: GatewayRouteOptions) -> Result<Rc<dyn ServiceExtension>> {
    Ok(Rc::new(GatewayRouteExtension::new(
        "Http2GatewayRouteExtension",
        "Http2GatewayRoute",
        MeshProtocol::Http2,
        options,
    )?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_tags_differ_by_protocol() {
        let http = http_gateway_route(GatewayRouteOptions::default()).unwrap();
        let http2 = http2_gateway_route(GatewayRouteOptions::default()).unwrap();
        assert_eq!(http.type_name(), "HttpGatewayRouteExtension");
        assert_eq!(http2.type_name(), "Http2GatewayRouteExtension");
    }

    #[test]
    fn test_prefix_validated() {
        assert!(http_gateway_route(GatewayRouteOptions::prefix("api")).is_err());
        assert!(http2_gateway_route(GatewayRouteOptions::prefix("/api")).is_ok());
    }
}
