//! Resource shapes exchanged with the infrastructure collaborator
//!
//! These are declarative descriptions only. Nothing here talks to a cloud API.

pub mod appmesh;
pub mod ecs;
pub mod network;

pub use appmesh::{
    CloudMapDiscovery, GatewayRoute, HeaderMatch, HeaderMatchKind, HttpMethod, HttpRouteMatch,
    MeshProtocol, Route, VirtualNode, VirtualNodeListener, VirtualService,
    VirtualServiceProvider, WeightedTarget,
};
pub use ecs::{
    CapacityProvider, CapacityProviderStrategy, CircuitBreaker, CloudMapOptions,
    ContainerDefinition, DnsRecordType, HealthCheck, LogConfiguration, PolicyStatement,
    PortMapping, Protocol, ProxyConfiguration, SecretRef, ServiceProps, SubnetType,
    TaskDefinition, TaskDefinitionProps, Ulimit,
};
pub use network::{Connections, IngressRule, Port, SecurityGroupId};
