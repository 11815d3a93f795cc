//! Default router
//!
//! A virtual router with a single HTTP/2 listener, fronted by a virtual
//! service. Services attach routes to it; the gateway forwards to it.

use serde::{Deserialize, Serialize};
use serde_json::json;

use carver_common::resources::{
    Connections, MeshProtocol, Port, SecurityGroupId, VirtualService, VirtualServiceProvider,
};
use carver_common::{Infrastructure, ProvisionRequest, ResourceKind, Result, DEFAULT_LISTENER_PORT};

use crate::environment::MeshRef;

/// Listener of a virtual router
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterListener {
    pub protocol: MeshProtocol,
    pub port: u16,
}

/// A virtual router and the virtual service in front of it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Router {
    pub name: String,
    pub arn: String,
    pub mesh: String,
    pub listeners: Vec<RouterListener>,
    pub virtual_service: VirtualService,
    /// Peers reaching the router arrive from these groups
    pub connections: Connections,
}

impl Router {
    /// Provision a router under `path`.
    pub fn new(path: &str, infra: &dyn Infrastructure, mesh: &MeshRef) -> Result<Self> {
        let listeners = vec![RouterListener {
            protocol: MeshProtocol::Http2,
            port: DEFAULT_LISTENER_PORT,
        }];

        let handle = infra.provision(&ProvisionRequest::new(
            path,
            ResourceKind::VirtualRouter,
            &json!({ "mesh": mesh.name, "listeners": listeners }),
        )?)?;

        let service_path = format!("{path}/Service");
        let provider = VirtualServiceProvider::VirtualRouter(handle.id.clone());
        let service_handle = infra.provision(&ProvisionRequest::new(
            &service_path,
            ResourceKind::VirtualService,
            &json!({ "mesh": mesh.name, "provider": provider }),
        )?)?;

        Ok(Self {
            name: handle.id,
            arn: handle.arn,
            mesh: mesh.name.clone(),
            listeners,
            virtual_service: VirtualService {
                name: service_handle.id,
                mesh: mesh.name.clone(),
                arn: service_handle.arn,
                provider,
            },
            connections: Connections::new(Port::AllTraffic, Vec::new()),
        })
    }

    /// Rebuild a router handle from exported attributes.
    pub fn from_attributes(
        mesh: &MeshRef,
        router_arn: &str,
        virtual_service_arn: &str,
        security_groups: Vec<SecurityGroupId>,
    ) -> Self {
        let name = arn_resource_name(router_arn);
        Self {
            name: name.clone(),
            arn: router_arn.to_string(),
            mesh: mesh.name.clone(),
            listeners: vec![RouterListener {
                protocol: MeshProtocol::Http2,
                port: DEFAULT_LISTENER_PORT,
            }],
            virtual_service: VirtualService {
                name: arn_resource_name(virtual_service_arn),
                mesh: mesh.name.clone(),
                arn: virtual_service_arn.to_string(),
                provider: VirtualServiceProvider::VirtualRouter(name),
            },
            connections: Connections::new(Port::AllTraffic, security_groups),
        }
    }

    /// Traffic through the router originates from these groups too.
    pub fn add_security_groups(&mut self, groups: impl IntoIterator<Item = SecurityGroupId>) {
        for group in groups {
            if !self.connections.security_groups.contains(&group) {
                self.connections.security_groups.push(group);
            }
        }
    }
}

/// Last path segment of an ARN's resource part
pub(crate) fn arn_resource_name(arn: &str) -> String {
    arn.rsplit('/').next().unwrap_or(arn).to_string()
}
