//! Service mesh shapes: nodes, services, routes

use serde::{Deserialize, Serialize};

// =============================================================================
// Listeners
// =============================================================================

/// Protocol a mesh listener or route speaks
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeshProtocol {
    Http,
    Http2,
    Grpc,
    Tcp,
}

impl MeshProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Http2 => "http2",
            Self::Grpc => "grpc",
            Self::Tcp => "tcp",
        }
    }
}

impl std::fmt::Display for MeshProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ingress listener of a virtual node
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualNodeListener {
    pub protocol: MeshProtocol,
    pub port: u16,
}

impl VirtualNodeListener {
    pub fn http(port: u16) -> Self {
        Self { protocol: MeshProtocol::Http, port }
    }

    pub fn http2(port: u16) -> Self {
        Self { protocol: MeshProtocol::Http2, port }
    }

    pub fn grpc(port: u16) -> Self {
        Self { protocol: MeshProtocol::Grpc, port }
    }

    pub fn tcp(port: u16) -> Self {
        Self { protocol: MeshProtocol::Tcp, port }
    }
}

// =============================================================================
// Nodes and services
// =============================================================================

/// How the mesh resolves a node's endpoints
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudMapDiscovery {
    pub namespace: String,
    pub service_name: String,
}

/// A virtual node: the mesh's view of one service's tasks
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualNode {
    pub name: String,
    pub mesh: String,
    pub arn: String,
    pub discovery: CloudMapDiscovery,
    #[serde(default)]
    pub listeners: Vec<VirtualNodeListener>,
    /// Virtual service names this node may call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub backends: Vec<String>,
}

/// What a virtual service forwards to
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type", content = "name")]
pub enum VirtualServiceProvider {
    VirtualNode(String),
    VirtualRouter(String),
}

/// A virtual service: the name clients address in the mesh
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualService {
    pub name: String,
    pub mesh: String,
    pub arn: String,
    pub provider: VirtualServiceProvider,
}

// =============================================================================
// Routes
// =============================================================================

/// Value test applied to a request header
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HeaderMatchKind {
    Exact(String),
    Prefix(String),
    Suffix(String),
    Regex(String),
    Range { start: u64, end: u64 },
}

/// Match against one request header
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderMatch {
    pub name: String,
    #[serde(rename = "match")]
    pub kind: HeaderMatchKind,
    /// Match when the test fails instead
    pub invert: bool,
}

impl HeaderMatch {
    fn new(name: impl Into<String>, kind: HeaderMatchKind, invert: bool) -> Self {
        Self {
            name: name.into(),
            kind,
            invert,
        }
    }

    pub fn value_is(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, HeaderMatchKind::Exact(value.into()), false)
    }

    pub fn value_is_not(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, HeaderMatchKind::Exact(value.into()), true)
    }

    pub fn value_starts_with(name: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self::new(name, HeaderMatchKind::Prefix(prefix.into()), false)
    }

    pub fn value_does_not_start_with(name: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self::new(name, HeaderMatchKind::Prefix(prefix.into()), true)
    }

    pub fn value_ends_with(name: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self::new(name, HeaderMatchKind::Suffix(suffix.into()), false)
    }

    pub fn value_does_not_end_with(name: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self::new(name, HeaderMatchKind::Suffix(suffix.into()), true)
    }

    pub fn value_matches_regex(name: impl Into<String>, regex: impl Into<String>) -> Self {
        Self::new(name, HeaderMatchKind::Regex(regex.into()), false)
    }

    pub fn value_does_not_match_regex(name: impl Into<String>, regex: impl Into<String>) -> Self {
        Self::new(name, HeaderMatchKind::Regex(regex.into()), true)
    }

    /// Header value, parsed as a number, lies in `start..end`
    pub fn value_is_in_range(name: impl Into<String>, start: u64, end: u64) -> Self {
        Self::new(name, HeaderMatchKind::Range { start, end }, false)
    }

    pub fn value_is_not_in_range(name: impl Into<String>, start: u64, end: u64) -> Self {
        Self::new(name, HeaderMatchKind::Range { start, end }, true)
    }
}

/// HTTP request method
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Connect,
    Options,
    Trace,
    Patch,
}

/// Request match of an HTTP route
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRouteMatch {
    pub prefix: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<HeaderMatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<HttpMethod>,
}

/// Weighted destination of a route
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightedTarget {
    pub virtual_node: String,
    pub weight: u32,
}

/// A route on a virtual router
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub name: String,
    pub mesh: String,
    pub virtual_router: String,
    pub protocol: MeshProtocol,
    #[serde(rename = "match")]
    pub route_match: HttpRouteMatch,
    pub targets: Vec<WeightedTarget>,
}

/// A route on a virtual gateway, forwarding to a virtual service
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayRoute {
    pub name: String,
    pub mesh: String,
    pub virtual_gateway: String,
    pub protocol: MeshProtocol,
    pub prefix: String,
    pub target_virtual_service: String,
}
