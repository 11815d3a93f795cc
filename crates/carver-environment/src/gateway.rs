//! Default gateway
//!
//! An internet-facing load balancer in front of a Fargate-hosted virtual
//! gateway. With certificates the load balancer terminates HTTPS and
//! redirects plain HTTP; without, it serves HTTP only.

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use carver_common::config::{
    default_capacity_provider_strategy, default_service_network_config, Preferences,
};
use carver_common::resources::{Connections, MeshProtocol, Port, SecurityGroupId};
use carver_common::{Infrastructure, ProvisionRequest, ResourceKind, Result};

use crate::environment::{ClusterRef, MeshRef, NamespaceRef, VpcRef};
use crate::router::arn_resource_name;

/// Port the virtual gateway's Envoy listens on
pub const VIRTUAL_GATEWAY_PORT: u16 = 8080;

/// Load balancer listener protocol
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ApplicationProtocol {
    Http,
    Https,
}

/// What a load balancer listener does with a request
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase", tag = "type")]
pub enum ListenerAction {
    /// Forward to the gateway tasks
    Forward { target_port: u16, healthy_http_codes: String },
    /// Redirect to another protocol and port
    Redirect { protocol: ApplicationProtocol, port: u16 },
}

/// A load balancer listener
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerListener {
    pub protocol: ApplicationProtocol,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub certificates: Vec<String>,
    pub action: ListenerAction,
}

/// The gateway's load balancer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadBalancer {
    pub arn: String,
    pub url_scheme: ApplicationProtocol,
    pub listeners: Vec<LoadBalancerListener>,
}

/// A virtual gateway: the mesh's ingress
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Gateway {
    pub name: String,
    pub arn: String,
    pub mesh: String,
    pub listener_protocol: MeshProtocol,
    pub port: u16,
    pub connections: Connections,
    /// Absent for imported gateways
    pub load_balancer: Option<LoadBalancer>,
}

/// Everything a gateway is built against
pub struct GatewayContext<'a> {
    pub infra: &'a dyn Infrastructure,
    pub mesh: &'a MeshRef,
    pub vpc: &'a VpcRef,
    pub cluster: &'a ClusterRef,
    pub namespace: &'a NamespaceRef,
    pub certificates: &'a [String],
    pub preferences: &'a Preferences,
}

impl Gateway {
    /// Provision a gateway under `path`.
    pub fn new(path: &str, ctx: &GatewayContext<'_>) -> Result<Self> {
        let infra = ctx.infra;

        let handle = infra.provision(&ProvisionRequest::new(
            path,
            ResourceKind::VirtualGateway,
            &json!({
                "mesh": ctx.mesh.name,
                "listeners": [{ "protocol": MeshProtocol::Http2, "port": VIRTUAL_GATEWAY_PORT }],
            }),
        )?)?;

        let security_group = infra.provision(&ProvisionRequest::new(
            format!("{path}/SecurityGroup"),
            ResourceKind::SecurityGroup,
            &json!({ "vpc": ctx.vpc.id }),
        )?)?;
        let security_groups = vec![SecurityGroupId::new(security_group.id)];

        let network = default_service_network_config(ctx.preferences);
        infra.provision(&ProvisionRequest::new(
            format!("{path}/Fargate"),
            ResourceKind::FargateService,
            &json!({
                "cluster": ctx.cluster.name,
                "virtualGateway": handle.arn,
                "cloudMap": { "namespace": ctx.namespace.name },
                "healthCheckGracePeriodSecs": 1800,
                "circuitBreaker": { "rollback": true },
                "capacityProviderStrategies": default_capacity_provider_strategy(ctx.preferences),
                "assignPublicIp": network.assign_public_ip,
                "vpcSubnets": network.vpc_subnets,
                "securityGroups": security_groups,
            }),
        )?)?;

        let load_balancer = Self::provision_load_balancer(path, ctx)?;
        debug!(
            gateway = %handle.id,
            scheme = ?load_balancer.url_scheme,
            "provisioned default gateway"
        );

        Ok(Self {
            name: handle.id,
            arn: handle.arn,
            mesh: ctx.mesh.name.clone(),
            listener_protocol: MeshProtocol::Http2,
            port: VIRTUAL_GATEWAY_PORT,
            connections: Connections::new(Port::AllTraffic, security_groups),
            load_balancer: Some(load_balancer),
        })
    }

    fn provision_load_balancer(path: &str, ctx: &GatewayContext<'_>) -> Result<LoadBalancer> {
        let infra = ctx.infra;
        let lb_path = format!("{path}/LoadBalancer");
        let handle = infra.provision(&ProvisionRequest::new(
            &lb_path,
            ResourceKind::LoadBalancer,
            &json!({ "vpc": ctx.vpc.id, "internetFacing": true }),
        )?)?;

        let forward = ListenerAction::Forward {
            target_port: VIRTUAL_GATEWAY_PORT,
            healthy_http_codes: "200,404".to_string(),
        };

        let (url_scheme, listeners) = if ctx.certificates.is_empty() {
            let http = LoadBalancerListener {
                protocol: ApplicationProtocol::Http,
                port: 80,
                certificates: Vec::new(),
                action: forward,
            };
            (ApplicationProtocol::Http, vec![("HTTP", http)])
        } else {
            let redirect = LoadBalancerListener {
                protocol: ApplicationProtocol::Http,
                port: 80,
                certificates: Vec::new(),
                action: ListenerAction::Redirect {
                    protocol: ApplicationProtocol::Https,
                    port: 443,
                },
            };
            let https = LoadBalancerListener {
                protocol: ApplicationProtocol::Https,
                port: 443,
                certificates: ctx.certificates.to_vec(),
                action: forward,
            };
            (
                ApplicationProtocol::Https,
                vec![("HTTP", redirect), ("HTTPS", https)],
            )
        };

        for (id, listener) in &listeners {
            infra.provision(&ProvisionRequest::new(
                format!("{lb_path}/{id}"),
                ResourceKind::LoadBalancerListener,
                listener,
            )?)?;
        }

        Ok(LoadBalancer {
            arn: handle.arn,
            url_scheme,
            listeners: listeners.into_iter().map(|(_, l)| l).collect(),
        })
    }

    /// Rebuild a gateway handle from exported attributes.
    pub fn from_attributes(
        mesh: &MeshRef,
        virtual_gateway_arn: &str,
        security_groups: Vec<SecurityGroupId>,
    ) -> Self {
        Self {
            name: arn_resource_name(virtual_gateway_arn),
            arn: virtual_gateway_arn.to_string(),
            mesh: mesh.name.clone(),
            listener_protocol: MeshProtocol::Http2,
            port: VIRTUAL_GATEWAY_PORT,
            connections: Connections::new(Port::AllTraffic, security_groups),
            load_balancer: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::NamespaceType;
    use carver_common::RecordingInfrastructure;

    struct Fixture {
        mesh: MeshRef,
        vpc: VpcRef,
        cluster: ClusterRef,
        namespace: NamespaceRef,
    }

    fn fixture() -> Fixture {
        Fixture {
            mesh: MeshRef {
                name: "mesh".to_string(),
                arn: "arn:mesh".to_string(),
            },
            vpc: VpcRef::imported("vpc-1"),
            cluster: ClusterRef {
                name: "cluster".to_string(),
                arn: "arn:cluster".to_string(),
                has_ec2_capacity: false,
                security_groups: Vec::new(),
            },
            namespace: NamespaceRef {
                namespace_type: NamespaceType::DnsPrivate,
                name: "prod".to_string(),
                id: "ns-1".to_string(),
                arn: "arn:ns".to_string(),
            },
        }
    }

    fn build(infra: &RecordingInfrastructure, certificates: &[String]) -> Gateway {
        let f = fixture();
        let prefs = Preferences::default();
        let ctx = GatewayContext {
            infra,
            mesh: &f.mesh,
            vpc: &f.vpc,
            cluster: &f.cluster,
            namespace: &f.namespace,
            certificates,
            preferences: &prefs,
        };
        Gateway::new("env/Gateway", &ctx).unwrap()
    }

    #[test]
    fn test_http_only_without_certificates() {
        let infra = RecordingInfrastructure::default();
        let gateway = build(&infra, &[]);

        let lb = gateway.load_balancer.unwrap();
        assert_eq!(lb.url_scheme, ApplicationProtocol::Http);
        assert_eq!(lb.listeners.len(), 1);
        assert!(matches!(lb.listeners[0].action, ListenerAction::Forward { .. }));
        assert_eq!(gateway.connections.security_groups.len(), 1);
    }

    #[test]
    fn test_https_with_redirect_when_certificates_given() {
        let infra = RecordingInfrastructure::default();
        let gateway = build(&infra, &["arn:cert".to_string()]);

        let lb = gateway.load_balancer.unwrap();
        assert_eq!(lb.url_scheme, ApplicationProtocol::Https);
        assert_eq!(
            lb.listeners[0].action,
            ListenerAction::Redirect {
                protocol: ApplicationProtocol::Https,
                port: 443
            }
        );
        assert_eq!(lb.listeners[1].certificates, vec!["arn:cert".to_string()]);
        assert!(infra.request_at("env/Gateway/LoadBalancer/HTTPS").is_some());
    }

    #[test]
    fn test_gateway_service_uses_gateway_security_group() {
        let infra = RecordingInfrastructure::default();
        let gateway = build(&infra, &[]);

        let service = infra.request_at("env/Gateway/Fargate").unwrap();
        assert_eq!(
            service.properties["securityGroups"][0],
            gateway.connections.security_groups[0].as_str()
        );
        assert_eq!(service.properties["circuitBreaker"]["rollback"], true);
    }
}
