//! Reachability between security groups

use std::fmt;

use serde::{Deserialize, Serialize};

use super::ecs::{PortMapping, Protocol};

/// Identifier of a security group
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecurityGroupId(pub String);

impl SecurityGroupId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SecurityGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Port range a rule opens
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "protocol", content = "port")]
pub enum Port {
    Tcp(u16),
    Udp(u16),
    AllTraffic,
}

impl Port {
    /// The port a container port mapping opens
    pub fn from_mapping(mapping: &PortMapping) -> Self {
        match mapping.protocol {
            Protocol::Tcp => Self::Tcp(mapping.container_port),
            Protocol::Udp => Self::Udp(mapping.container_port),
        }
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(port) => write!(f, "tcp {port}"),
            Self::Udp(port) => write!(f, "udp {port}"),
            Self::AllTraffic => f.write_str("all traffic"),
        }
    }
}

/// An ingress permission from one security group to another
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressRule {
    pub description: String,
    /// Group receiving the traffic
    pub group: SecurityGroupId,
    /// Group the traffic originates from
    pub source: SecurityGroupId,
    pub port: Port,
}

/// Network reachability of a resource: its groups and the port peers reach it on
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connections {
    pub default_port: Port,
    pub security_groups: Vec<SecurityGroupId>,
}

impl Connections {
    pub fn new(default_port: Port, security_groups: Vec<SecurityGroupId>) -> Self {
        Self {
            default_port,
            security_groups,
        }
    }

    /// Rules letting `peer` reach this side on its default port.
    ///
    /// One rule per pair of this side's and the peer's groups.
    pub fn allow_default_port_from(&self, peer: &Connections) -> Vec<IngressRule> {
        let mut rules = Vec::with_capacity(self.security_groups.len() * peer.security_groups.len());
        for group in &self.security_groups {
            for source in &peer.security_groups {
                rules.push(IngressRule {
                    description: format!("from {source}:{}", self.default_port),
                    group: group.clone(),
                    source: source.clone(),
                    port: self.default_port,
                });
            }
        }
        rules
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sg(id: &str) -> SecurityGroupId {
        SecurityGroupId::new(id)
    }

    #[test]
    fn test_allow_default_port_from_pairs_every_group() {
        let service = Connections::new(Port::Tcp(8080), vec![sg("sg-a"), sg("sg-b")]);
        let router = Connections::new(Port::AllTraffic, vec![sg("sg-r")]);

        let rules = service.allow_default_port_from(&router);
        assert_eq!(rules.len(), 2);
        assert!(rules.iter().all(|r| r.source == sg("sg-r")));
        assert!(rules.iter().all(|r| r.port == Port::Tcp(8080)));
        assert_eq!(rules[0].group, sg("sg-a"));
        assert_eq!(rules[1].group, sg("sg-b"));
    }

    #[test]
    fn test_peer_without_groups_yields_no_rules() {
        let service = Connections::new(Port::Tcp(80), vec![sg("sg-a")]);
        let empty = Connections::new(Port::AllTraffic, Vec::new());
        assert!(service.allow_default_port_from(&empty).is_empty());
    }

    #[test]
    fn test_port_from_mapping() {
        assert_eq!(Port::from_mapping(&PortMapping::udp(53)), Port::Udp(53));
        assert_eq!(Port::from_mapping(&PortMapping::tcp(80)), Port::Tcp(80));
    }
}
