//! HTTP routes on the environment's default router

use std::rc::Rc;

use carver_common::resources::{
    HeaderMatch, HttpMethod, HttpRouteMatch, MeshProtocol, Route, WeightedTarget,
};
use carver_common::{ResourceKind, Result};

use crate::extension::{validate_prefix, ServiceExtension};
use crate::facade::ServiceFacade;
use crate::scope::PrivateScope;

/// Which requests the router sends to this service
#[derive(Clone, Debug, Default)]
pub struct HttpRouteOptions {
    /// Defaults to `/`
    pub prefix_path: Option<String>,
    pub headers: Vec<HeaderMatch>,
    pub method: Option<HttpMethod>,
}

impl HttpRouteOptions {
    pub fn prefix(path: impl Into<String>) -> Self {
        Self {
            prefix_path: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn with_header(mut self, header: HeaderMatch) -> Self {
        self.headers.push(header);
        self
    }

    pub fn with_method(mut self, method: HttpMethod) -> Self {
        self.method = Some(method);
        self
    }
}

/// Routes HTTP and HTTP/2 traffic from the default router to this service
#[derive(Clone, Debug)]
pub struct HttpRouteExtension {
    route_match: HttpRouteMatch,
}

impl HttpRouteExtension {
    pub fn new(options: HttpRouteOptions) -> Result<Self> {
        let prefix = options.prefix_path.unwrap_or_else(|| "/".to_string());
        validate_prefix(&prefix)?;
        Ok(Self {
            route_match: HttpRouteMatch {
                prefix,
                headers: options.headers,
                method: options.method,
            },
        })
    }

    pub fn route_match(&self) -> &HttpRouteMatch {
        &self.route_match
    }
}

impl ServiceExtension for HttpRouteExtension {
    fn type_name(&self) -> &str {
        "HttpRouteExtension"
    }

    fn register(&self, service: &ServiceFacade, scope: &PrivateScope) -> Result<()> {
        let router = service.default_router();

        let route_match = self.route_match.clone();
        let (mesh, virtual_router) = (router.mesh.clone(), router.name.clone());
        let routes = scope.clone();
        service.on_workload_ready(move |workload| {
            let target = WeightedTarget {
                virtual_node: workload.virtual_node.name(),
                weight: 1,
            };
            for (id, protocol) in [("HTTP2", MeshProtocol::Http2), ("HTTP", MeshProtocol::Http)] {
                let route = Route {
                    name: routes.resource_name(id),
                    mesh: mesh.clone(),
                    virtual_router: virtual_router.clone(),
                    protocol,
                    route_match: route_match.clone(),
                    targets: vec![target.clone()],
                };
                routes.emit(id, ResourceKind::Route, &route)?;
            }
            Ok(())
        })?;

        let router_connections = router.connections.clone();
        let rules = scope.clone();
        service.on_connections_ready(move |connections| {
            rules
                .emit_ingress_rules(&connections.allow_default_port_from(&router_connections))
                .map(drop)
        })
    }
}

pub fn http_route(options: HttpRouteOptions) -> Result<Rc<dyn ServiceExtension>> {
    Ok(Rc::new(HttpRouteExtension::new(options)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use carver_common::Error;

    #[test]
    fn test_prefix_defaults_to_root() {
        let ext = HttpRouteExtension::new(HttpRouteOptions::default()).unwrap();
        assert_eq!(ext.route_match().prefix, "/");
    }

    #[test]
    fn test_relative_prefix_rejected_eagerly() {
        let err = HttpRouteExtension::new(HttpRouteOptions::prefix("path")).unwrap_err();
        match err {
            Error::InvalidPath { path } => assert_eq!(path, "path"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_match_carries_headers_and_method() {
        let ext = HttpRouteExtension::new(
            HttpRouteOptions::prefix("/api")
                .with_header(HeaderMatch::value_is("x-canary", "true"))
                .with_method(HttpMethod::Post),
        )
        .unwrap();
        assert_eq!(ext.route_match().headers.len(), 1);
        assert_eq!(ext.route_match().method, Some(HttpMethod::Post));
    }
}
