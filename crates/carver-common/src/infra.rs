//! Boundary toward the infrastructure collaborator
//!
//! Composition never creates cloud resources itself. Every resource is handed
//! to an [`Infrastructure`] as a [`ProvisionRequest`] and only the returned
//! [`ResourceHandle`] flows back into composition.

use std::cell::RefCell;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::naming::{hash_hex, unique_id};
use crate::Result;

/// Kind of resource being provisioned
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Mesh,
    Vpc,
    Cluster,
    Namespace,
    LoadBalancer,
    LoadBalancerListener,
    SecurityGroup,
    SecurityGroupIngress,
    VirtualGateway,
    VirtualRouter,
    VirtualService,
    VirtualNode,
    Route,
    GatewayRoute,
    TaskDefinition,
    FargateService,
}

impl ResourceKind {
    /// Service segment of the resource's ARN
    fn arn_service(&self) -> &'static str {
        match self {
            Self::Mesh
            | Self::VirtualGateway
            | Self::VirtualRouter
            | Self::VirtualService
            | Self::VirtualNode
            | Self::Route
            | Self::GatewayRoute => "appmesh",
            Self::Vpc | Self::SecurityGroup | Self::SecurityGroupIngress => "ec2",
            Self::Cluster | Self::TaskDefinition | Self::FargateService => "ecs",
            Self::Namespace => "servicediscovery",
            Self::LoadBalancer | Self::LoadBalancerListener => "elasticloadbalancing",
        }
    }

    /// Resource-type segment of the resource's ARN
    fn arn_resource(&self) -> &'static str {
        match self {
            Self::Mesh => "mesh",
            Self::Vpc => "vpc",
            Self::Cluster => "cluster",
            Self::Namespace => "namespace",
            Self::LoadBalancer => "loadbalancer",
            Self::LoadBalancerListener => "listener",
            Self::SecurityGroup => "security-group",
            Self::SecurityGroupIngress => "security-group-rule",
            Self::VirtualGateway => "virtualGateway",
            Self::VirtualRouter => "virtualRouter",
            Self::VirtualService => "virtualService",
            Self::VirtualNode => "virtualNode",
            Self::Route => "route",
            Self::GatewayRoute => "gatewayRoute",
            Self::TaskDefinition => "task-definition",
            Self::FargateService => "service",
        }
    }

    /// Prefix of identifiers for kinds that have a short-id format
    fn id_prefix(&self) -> Option<&'static str> {
        match self {
            Self::SecurityGroup => Some("sg-"),
            Self::SecurityGroupIngress => Some("sgr-"),
            Self::Vpc => Some("vpc-"),
            Self::Namespace => Some("ns-"),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A request to create one resource
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionRequest {
    /// Construct path, unique across everything provisioned
    pub path: String,
    pub kind: ResourceKind,
    /// Finalized configuration of the resource
    pub properties: serde_json::Value,
}

impl ProvisionRequest {
    /// Build a request, serializing `properties`
    pub fn new<P: Serialize>(
        path: impl Into<String>,
        kind: ResourceKind,
        properties: &P,
    ) -> Result<Self> {
        let path = path.into();
        let properties = serde_json::to_value(properties).map_err(|e| {
            crate::Error::serialization_for_kind(kind.to_string(), e.to_string())
        })?;
        Ok(Self {
            path,
            kind,
            properties,
        })
    }
}

/// Opaque identity of a provisioned resource
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceHandle {
    pub path: String,
    pub id: String,
    pub arn: String,
}

/// Creates resources and returns their identities
#[cfg_attr(test, mockall::automock)]
pub trait Infrastructure {
    /// Provision one resource.
    fn provision(&self, request: &ProvisionRequest) -> Result<ResourceHandle>;
}

/// In-memory infrastructure that records requests and derives identities
///
/// Identities are a pure function of the request path, so two runs over the
/// same input produce the same handles.
#[derive(Debug)]
pub struct RecordingInfrastructure {
    region: String,
    account: String,
    requests: RefCell<Vec<ProvisionRequest>>,
}

impl RecordingInfrastructure {
    pub fn new(region: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            account: account.into(),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Every request received so far, in order
    pub fn requests(&self) -> Vec<ProvisionRequest> {
        self.requests.borrow().clone()
    }

    /// Requests of one kind, in order
    pub fn requests_of(&self, kind: ResourceKind) -> Vec<ProvisionRequest> {
        self.requests
            .borrow()
            .iter()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect()
    }

    /// The request recorded for `path`
    pub fn request_at(&self, path: &str) -> Option<ProvisionRequest> {
        self.requests.borrow().iter().find(|r| r.path == path).cloned()
    }

    fn derive_id(kind: ResourceKind, path: &str) -> String {
        match kind.id_prefix() {
            Some(prefix) => format!("{prefix}{}", hash_hex(path, 16)),
            None => unique_id(path),
        }
    }
}

impl Default for RecordingInfrastructure {
    fn default() -> Self {
        Self::new("us-east-1", "123456789012")
    }
}

impl Infrastructure for RecordingInfrastructure {
    fn provision(&self, request: &ProvisionRequest) -> Result<ResourceHandle> {
        let id = Self::derive_id(request.kind, &request.path);
        let arn = format!(
            "arn:aws:{}:{}:{}:{}/{}",
            request.kind.arn_service(),
            self.region,
            self.account,
            request.kind.arn_resource(),
            id
        );
        debug!(path = %request.path, kind = %request.kind, id = %id, "provisioned resource");
        self.requests.borrow_mut().push(request.clone());
        Ok(ResourceHandle {
            path: request.path.clone(),
            id,
            arn,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use serde_json::json;

    #[test]
    fn test_recording_is_deterministic() {
        let a = RecordingInfrastructure::default();
        let b = RecordingInfrastructure::default();
        let req = ProvisionRequest::new("env/Cluster", ResourceKind::Cluster, &json!({})).unwrap();
        assert_eq!(a.provision(&req).unwrap(), b.provision(&req).unwrap());
    }

    #[test]
    fn test_security_group_ids_are_prefixed() {
        let infra = RecordingInfrastructure::default();
        let req =
            ProvisionRequest::new("svc/SecurityGroup", ResourceKind::SecurityGroup, &json!({}))
                .unwrap();
        let handle = infra.provision(&req).unwrap();
        assert!(handle.id.starts_with("sg-"));
        assert_eq!(handle.id.len(), "sg-".len() + 16);
        assert!(handle.arn.starts_with("arn:aws:ec2:us-east-1:123456789012:security-group/sg-"));
    }

    #[test]
    fn test_requests_recorded_in_order() {
        let infra = RecordingInfrastructure::default();
        for path in ["a", "b", "c"] {
            let req =
                ProvisionRequest::new(path, ResourceKind::Route, &json!({ "p": path })).unwrap();
            infra.provision(&req).unwrap();
        }
        let paths: Vec<String> = infra.requests().into_iter().map(|r| r.path).collect();
        assert_eq!(paths, vec!["a", "b", "c"]);
        assert_eq!(infra.requests_of(ResourceKind::Route).len(), 3);
        assert_eq!(
            infra.request_at("b").unwrap().properties,
            json!({ "p": "b" })
        );
    }

    #[test]
    fn test_mock_infrastructure_failure_propagates() {
        let mut infra = MockInfrastructure::new();
        infra
            .expect_provision()
            .returning(|req| Err(Error::infrastructure_at(req.path.clone(), "quota exceeded")));

        let req = ProvisionRequest::new("svc", ResourceKind::FargateService, &json!({})).unwrap();
        match infra.provision(&req) {
            Err(Error::Infrastructure { path, message }) => {
                assert_eq!(path, "svc");
                assert_eq!(message, "quota exceeded");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
