//! Traffic listeners
//!
//! A listener binds against the facade to produce the container port, its
//! transport, and optionally the one mesh-level listener the virtual node
//! accepts. Binding may also attach extensions, as the OIDC proxy listener
//! does with its proxy container.

use std::rc::Rc;

use carver_common::resources::{MeshProtocol, PortMapping, Protocol, VirtualNodeListener};
use carver_common::{Result, DEFAULT_LISTENER_PORT};

use crate::extension::oidc_proxy::{OidcHttpProxyListener, OidcHttpProxyOptions};
use crate::facade::ServiceFacade;

/// What a listener resolved to
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListenerBinding {
    pub container_port: u16,
    pub protocol: Protocol,
    pub mesh_listener: Option<VirtualNodeListener>,
}

impl ListenerBinding {
    pub fn port_mapping(&self) -> PortMapping {
        PortMapping {
            container_port: self.container_port,
            protocol: self.protocol,
        }
    }
}

/// A traffic listener a service or container declares
#[cfg_attr(test, mockall::automock)]
pub trait ServiceListener {
    fn bind(&self, service: &ServiceFacade) -> Result<ListenerBinding>;
}

/// TCP port fronted by a mesh listener of the same port
#[derive(Clone, Copy, Debug)]
struct MeshPortListener {
    protocol: MeshProtocol,
    port: u16,
}

impl ServiceListener for MeshPortListener {
    fn bind(&self, _service: &ServiceFacade) -> Result<ListenerBinding> {
        Ok(ListenerBinding {
            container_port: self.port,
            protocol: Protocol::Tcp,
            mesh_listener: Some(VirtualNodeListener {
                protocol: self.protocol,
                port: self.port,
            }),
        })
    }
}

/// A bare port mapping the mesh never sees
#[derive(Clone, Copy, Debug)]
struct PortMappingListener {
    mapping: PortMapping,
}

impl ServiceListener for PortMappingListener {
    fn bind(&self, _service: &ServiceFacade) -> Result<ListenerBinding> {
        Ok(ListenerBinding {
            container_port: self.mapping.container_port,
            protocol: self.mapping.protocol,
            mesh_listener: None,
        })
    }
}

fn mesh(protocol: MeshProtocol, port: u16) -> Rc<dyn ServiceListener> {
    Rc::new(MeshPortListener { protocol, port })
}

/// HTTP/1.1 on `port` (80 when `None`)
pub fn http1(port: Option<u16>) -> Rc<dyn ServiceListener> {
    mesh(MeshProtocol::Http, port.unwrap_or(DEFAULT_LISTENER_PORT))
}

/// HTTP/2 on `port` (80 when `None`)
pub fn http2(port: Option<u16>) -> Rc<dyn ServiceListener> {
    mesh(MeshProtocol::Http2, port.unwrap_or(DEFAULT_LISTENER_PORT))
}

/// gRPC on `port` (80 when `None`)
pub fn grpc(port: Option<u16>) -> Rc<dyn ServiceListener> {
    mesh(MeshProtocol::Grpc, port.unwrap_or(DEFAULT_LISTENER_PORT))
}

/// Raw TCP with a mesh listener
pub fn tcp(port: u16) -> Rc<dyn ServiceListener> {
    mesh(MeshProtocol::Tcp, port)
}

pub fn tcp_port_mapping(port: u16) -> Rc<dyn ServiceListener> {
    Rc::new(PortMappingListener {
        mapping: PortMapping::tcp(port),
    })
}

pub fn udp_port_mapping(port: u16) -> Rc<dyn ServiceListener> {
    Rc::new(PortMappingListener {
        mapping: PortMapping::udp(port),
    })
}

/// HTTP behind an authenticating OIDC proxy container.
///
/// Credentials and ports are checked here, before anything is registered.
pub fn oidc_http_proxy(options: OidcHttpProxyOptions) -> Result<Rc<dyn ServiceListener>> {
    Ok(Rc::new(OidcHttpProxyListener::new(options)?))
}
