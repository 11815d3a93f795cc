//! Environment construction
//!
//! An environment owns the pieces every service shares: the mesh, the VPC,
//! the cluster, the discovery namespace, and the default gateway and router.
//! Each piece is either supplied by the caller or provisioned here.

use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use carver_common::config::{Preferences, PreferencesSource};
use carver_common::resources::{CapacityProvider, MeshProtocol, SecurityGroupId, SubnetType};
use carver_common::{Error, Infrastructure, ProvisionRequest, ResourceKind, Result};

use crate::gateway::{Gateway, GatewayContext};
use crate::manifest::EnvironmentManifestV1;
use crate::router::Router;

// =============================================================================
// Handles
// =============================================================================

/// Service discovery namespace kind
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NamespaceType {
    DnsPrivate,
    DnsPublic,
    Http,
}

impl NamespaceType {
    /// Whether services can register into this kind of namespace
    pub fn is_supported(&self) -> bool {
        matches!(self, Self::DnsPrivate | Self::DnsPublic)
    }
}

impl fmt::Display for NamespaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::DnsPrivate => "DNS_PRIVATE",
            Self::DnsPublic => "DNS_PUBLIC",
            Self::Http => "HTTP",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeshRef {
    pub name: String,
    pub arn: String,
}

/// One subnet group of a VPC
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubnetConfig {
    pub name: String,
    pub subnet_type: SubnetType,
    pub cidr_mask: u8,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VpcRef {
    pub id: String,
    /// Empty when the VPC was imported
    #[serde(default)]
    pub subnets: Vec<SubnetConfig>,
}

impl VpcRef {
    /// Reference an existing VPC
    pub fn imported(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            subnets: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterRef {
    pub name: String,
    pub arn: String,
    pub has_ec2_capacity: bool,
    #[serde(default)]
    pub security_groups: Vec<SecurityGroupId>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceRef {
    pub namespace_type: NamespaceType,
    pub name: String,
    pub id: String,
    pub arn: String,
}

// =============================================================================
// Environment
// =============================================================================

/// What the caller supplies; anything unset is provisioned
#[derive(Clone, Debug, Default)]
pub struct EnvironmentProps {
    pub region: String,
    pub mesh: Option<MeshRef>,
    pub vpc: Option<VpcRef>,
    pub namespace: Option<NamespaceRef>,
    /// Certificate ARNs installed on the gateway load balancer
    pub certificates: Vec<String>,
}

/// A built environment
pub struct Environment {
    id: String,
    region: String,
    mesh: MeshRef,
    vpc: VpcRef,
    cluster: ClusterRef,
    namespace: NamespaceRef,
    default_gateway: Gateway,
    default_router: Router,
    preferences: Preferences,
    infra: Rc<dyn Infrastructure>,
}

/// The identities an environment exports
#[derive(Clone, Copy, Debug)]
pub struct EnvironmentIdentities<'a> {
    pub cluster: &'a ClusterRef,
    pub mesh: &'a MeshRef,
    pub namespace: &'a NamespaceRef,
    pub default_gateway: &'a Gateway,
    pub default_router: &'a Router,
}

impl Environment {
    /// Build an environment, provisioning whatever `props` leaves unset.
    ///
    /// # Errors
    ///
    /// - `Validation` when a private DNS namespace is given without a VPC
    /// - `UnsupportedNamespaceType` for namespaces other than public/private DNS
    /// - whatever the infrastructure returns
    pub fn new(
        id: impl Into<String>,
        props: EnvironmentProps,
        infra: Rc<dyn Infrastructure>,
        preferences: Preferences,
    ) -> Result<Self> {
        let id = id.into();
        let EnvironmentProps {
            region,
            mesh,
            vpc,
            namespace,
            certificates,
        } = props;

        if let Some(ns) = &namespace {
            if ns.namespace_type == NamespaceType::DnsPrivate && vpc.is_none() {
                return Err(Error::validation_for_field(
                    "vpc",
                    "a vpc must be provided along with a private DNS namespace",
                ));
            }
            if !ns.namespace_type.is_supported() {
                return Err(Error::UnsupportedNamespaceType {
                    namespace_type: ns.namespace_type.to_string(),
                });
            }
        }

        let mesh = match mesh {
            Some(mesh) => mesh,
            None => default_mesh(&id, infra.as_ref())?,
        };
        let vpc = match vpc {
            Some(vpc) => vpc,
            None => default_vpc(&id, infra.as_ref(), &preferences)?,
        };
        let cluster = provision_cluster(&id, infra.as_ref(), &vpc)?;
        let namespace = match namespace {
            Some(ns) => ns,
            None => default_namespace(&id, infra.as_ref(), &vpc)?,
        };

        let default_gateway = Gateway::new(
            &format!("{id}/Gateway"),
            &GatewayContext {
                infra: infra.as_ref(),
                mesh: &mesh,
                vpc: &vpc,
                cluster: &cluster,
                namespace: &namespace,
                certificates: &certificates,
                preferences: &preferences,
            },
        )?;

        let mut default_router = Router::new(&format!("{id}/Router"), infra.as_ref(), &mesh)?;

        // The gateway forwards everything to the router by default.
        infra.provision(&ProvisionRequest::new(
            format!("{id}/Gateway/Router"),
            ResourceKind::GatewayRoute,
            &json!({
                "mesh": mesh.name,
                "virtualGateway": default_gateway.name,
                "protocol": MeshProtocol::Http2,
                "prefix": "/",
                "targetVirtualService": default_router.virtual_service.name,
            }),
        )?)?;

        // Traffic arriving through the router really comes from the gateway.
        default_router.add_security_groups(default_gateway.connections.security_groups.clone());

        info!(
            environment = %id,
            mesh = %mesh.name,
            namespace = %namespace.name,
            "environment built"
        );

        Ok(Self {
            id,
            region,
            mesh,
            vpc,
            cluster,
            namespace,
            default_gateway,
            default_router,
            preferences,
            infra,
        })
    }

    /// Build an environment with preferences read from `source`.
    ///
    /// Pass [`carver_common::config::OsEnvPreferences`] to honour the
    /// `CARVER_*` process variables.
    pub fn from_preferences_source(
        id: impl Into<String>,
        props: EnvironmentProps,
        infra: Rc<dyn Infrastructure>,
        source: &dyn PreferencesSource,
    ) -> Result<Self> {
        Self::new(id, props, infra, Preferences::load(source))
    }

    /// Rebuild an environment from an exported manifest without provisioning.
    pub fn from_manifest(
        id: impl Into<String>,
        region: impl Into<String>,
        manifest: &EnvironmentManifestV1,
        infra: Rc<dyn Infrastructure>,
        preferences: Preferences,
    ) -> Result<Self> {
        let id = id.into();
        let ns = &manifest.namespace_attributes;
        if !ns.namespace_type.is_supported() {
            return Err(Error::UnsupportedNamespaceType {
                namespace_type: ns.namespace_type.to_string(),
            });
        }

        let mesh = MeshRef {
            name: crate::router::arn_resource_name(&manifest.mesh_arn),
            arn: manifest.mesh_arn.clone(),
        };
        let cluster_attrs = &manifest.cluster_attributes;
        let cluster = ClusterRef {
            name: cluster_attrs.cluster_name.clone(),
            arn: cluster_attrs.cluster_arn.clone().unwrap_or_default(),
            has_ec2_capacity: cluster_attrs.has_ec2_capacity.unwrap_or(false),
            security_groups: to_groups(&cluster_attrs.security_group_ids),
        };
        let namespace = NamespaceRef {
            namespace_type: ns.namespace_type,
            name: ns.namespace_name.clone(),
            id: ns.namespace_id.clone(),
            arn: ns.namespace_arn.clone(),
        };
        let gw = &manifest.default_gateway_attributes;
        let default_gateway = Gateway::from_attributes(
            &mesh,
            &gw.virtual_gateway_arn,
            to_groups(&gw.security_group_ids),
        );
        let rt = &manifest.default_router_attributes;
        let default_router = Router::from_attributes(
            &mesh,
            &rt.virtual_router_arn,
            &rt.virtual_service_arn,
            to_groups(&rt.security_group_ids),
        );

        debug!(environment = %id, mesh = %mesh.name, "environment imported from manifest");

        Ok(Self {
            id,
            region: region.into(),
            mesh,
            vpc: VpcRef::imported(manifest.vpc_id.clone()),
            cluster,
            namespace,
            default_gateway,
            default_router,
            preferences,
            infra,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn mesh(&self) -> &MeshRef {
        &self.mesh
    }

    pub fn vpc(&self) -> &VpcRef {
        &self.vpc
    }

    pub fn cluster(&self) -> &ClusterRef {
        &self.cluster
    }

    pub fn namespace(&self) -> &NamespaceRef {
        &self.namespace
    }

    pub fn default_gateway(&self) -> &Gateway {
        &self.default_gateway
    }

    pub fn default_router(&self) -> &Router {
        &self.default_router
    }

    pub fn preferences(&self) -> &Preferences {
        &self.preferences
    }

    /// The collaborator services in this environment provision through
    pub fn infra(&self) -> &dyn Infrastructure {
        self.infra.as_ref()
    }

    /// The five identities other stacks need to join this environment
    pub fn identities(&self) -> EnvironmentIdentities<'_> {
        EnvironmentIdentities {
            cluster: &self.cluster,
            mesh: &self.mesh,
            namespace: &self.namespace,
            default_gateway: &self.default_gateway,
            default_router: &self.default_router,
        }
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("id", &self.id)
            .field("region", &self.region)
            .field("mesh", &self.mesh)
            .field("cluster", &self.cluster.name)
            .field("namespace", &self.namespace.name)
            .finish_non_exhaustive()
    }
}

fn to_groups(ids: &[String]) -> Vec<SecurityGroupId> {
    ids.iter().cloned().map(SecurityGroupId).collect()
}

fn default_mesh(id: &str, infra: &dyn Infrastructure) -> Result<MeshRef> {
    let handle = infra.provision(&ProvisionRequest::new(
        format!("{id}/Mesh"),
        ResourceKind::Mesh,
        &json!({ "egressFilter": "ALLOW_ALL" }),
    )?)?;
    Ok(MeshRef {
        name: handle.id,
        arn: handle.arn,
    })
}

/// Public-only when services use public networking; otherwise public
/// subnets for the gateway and private subnets for services.
fn default_vpc(id: &str, infra: &dyn Infrastructure, prefs: &Preferences) -> Result<VpcRef> {
    let subnets = if prefs.use_public_service_networking {
        vec![SubnetConfig {
            name: "public".to_string(),
            subnet_type: SubnetType::Public,
            cidr_mask: 22,
        }]
    } else {
        vec![
            SubnetConfig {
                name: "gateway".to_string(),
                subnet_type: SubnetType::Public,
                cidr_mask: 24,
            },
            SubnetConfig {
                name: "services".to_string(),
                subnet_type: SubnetType::Private,
                cidr_mask: 22,
            },
        ]
    };
    let handle = infra.provision(&ProvisionRequest::new(
        format!("{id}/Vpc"),
        ResourceKind::Vpc,
        &json!({ "subnetConfiguration": subnets }),
    )?)?;
    Ok(VpcRef {
        id: handle.id,
        subnets,
    })
}

fn provision_cluster(id: &str, infra: &dyn Infrastructure, vpc: &VpcRef) -> Result<ClusterRef> {
    let handle = infra.provision(&ProvisionRequest::new(
        format!("{id}/Cluster"),
        ResourceKind::Cluster,
        &json!({
            "vpc": vpc.id,
            "capacityProviders": [CapacityProvider::Standard, CapacityProvider::Spot],
        }),
    )?)?;
    Ok(ClusterRef {
        name: handle.id,
        arn: handle.arn,
        has_ec2_capacity: false,
        security_groups: Vec::new(),
    })
}

fn default_namespace(id: &str, infra: &dyn Infrastructure, vpc: &VpcRef) -> Result<NamespaceRef> {
    let name = id.to_lowercase();
    let handle = infra.provision(&ProvisionRequest::new(
        format!("{id}/Namespace"),
        ResourceKind::Namespace,
        &json!({ "type": NamespaceType::DnsPrivate, "name": name, "vpc": vpc.id }),
    )?)?;
    Ok(NamespaceRef {
        namespace_type: NamespaceType::DnsPrivate,
        name,
        id: handle.id,
        arn: handle.arn,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use carver_common::RecordingInfrastructure;

    fn recording() -> Rc<RecordingInfrastructure> {
        Rc::new(RecordingInfrastructure::default())
    }

    fn props() -> EnvironmentProps {
        EnvironmentProps {
            region: "us-east-1".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_environment_provisions_everything() {
        let infra = recording();
        let env = Environment::new("Prod", props(), infra.clone(), Preferences::default()).unwrap();

        assert_eq!(infra.requests_of(ResourceKind::Mesh).len(), 1);
        assert_eq!(infra.requests_of(ResourceKind::Vpc).len(), 1);
        assert_eq!(infra.requests_of(ResourceKind::Cluster).len(), 1);
        assert_eq!(env.namespace().name, "prod");
        assert_eq!(env.namespace().namespace_type, NamespaceType::DnsPrivate);

        let mesh = infra.request_at("Prod/Mesh").unwrap();
        assert_eq!(mesh.properties["egressFilter"], "ALLOW_ALL");
        let cluster = infra.request_at("Prod/Cluster").unwrap();
        assert_eq!(
            cluster.properties["capacityProviders"],
            json!(["FARGATE", "FARGATE_SPOT"])
        );
    }

    #[test]
    fn test_private_vpc_has_gateway_and_services_subnets() {
        let env = Environment::new("Prod", props(), recording(), Preferences::default()).unwrap();
        let names: Vec<&str> = env.vpc().subnets.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["gateway", "services"]);
    }

    #[test]
    fn test_public_networking_vpc_is_public_only() {
        let prefs = Preferences {
            use_public_service_networking: true,
            ..Default::default()
        };
        let env = Environment::new("Prod", props(), recording(), prefs).unwrap();
        assert_eq!(env.vpc().subnets.len(), 1);
        assert_eq!(env.vpc().subnets[0].subnet_type, SubnetType::Public);
    }

    mockall::mock! {
        Prefs {}
        impl PreferencesSource for Prefs {
            fn public_service_networking(&self) -> bool;
            fn use_spot_capacity(&self) -> bool;
        }
    }

    #[test]
    fn test_preferences_read_from_source() {
        let mut source = MockPrefs::new();
        source.expect_public_service_networking().times(1).return_const(true);
        source.expect_use_spot_capacity().times(1).return_const(true);

        let env = Environment::from_preferences_source("Prod", props(), recording(), &source)
            .unwrap();

        assert!(env.preferences().use_spot_capacity);
        assert!(env.preferences().use_public_service_networking);
        assert_eq!(env.vpc().subnets.len(), 1);
        assert_eq!(env.vpc().subnets[0].subnet_type, SubnetType::Public);
    }

    #[test]
    fn test_given_mesh_is_not_provisioned() {
        let infra = recording();
        let mesh = MeshRef {
            name: "shared".to_string(),
            arn: "arn:aws:appmesh:us-east-1:1:mesh/shared".to_string(),
        };
        let env = Environment::new(
            "Prod",
            EnvironmentProps {
                mesh: Some(mesh.clone()),
                ..props()
            },
            infra.clone(),
            Preferences::default(),
        )
        .unwrap();
        assert_eq!(env.mesh(), &mesh);
        assert!(infra.requests_of(ResourceKind::Mesh).is_empty());
    }

    #[test]
    fn test_private_namespace_without_vpc_rejected() {
        let props = EnvironmentProps {
            namespace: Some(NamespaceRef {
                namespace_type: NamespaceType::DnsPrivate,
                name: "corp".to_string(),
                id: "ns-1".to_string(),
                arn: "arn:ns".to_string(),
            }),
            ..props()
        };
        let err = Environment::new("Prod", props, recording(), Preferences::default()).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn test_http_namespace_unsupported() {
        let props = EnvironmentProps {
            vpc: Some(VpcRef::imported("vpc-1")),
            namespace: Some(NamespaceRef {
                namespace_type: NamespaceType::Http,
                name: "corp".to_string(),
                id: "ns-1".to_string(),
                arn: "arn:ns".to_string(),
            }),
            ..props()
        };
        let err = Environment::new("Prod", props, recording(), Preferences::default()).unwrap_err();
        match err {
            Error::UnsupportedNamespaceType { namespace_type } => {
                assert_eq!(namespace_type, "HTTP")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_router_carries_gateway_security_groups() {
        let env = Environment::new("Prod", props(), recording(), Preferences::default()).unwrap();
        assert_eq!(
            env.default_router().connections.security_groups,
            env.default_gateway().connections.security_groups
        );
    }

    #[test]
    fn test_gateway_routes_to_router() {
        let infra = recording();
        let env = Environment::new("Prod", props(), infra.clone(), Preferences::default()).unwrap();
        let route = infra.request_at("Prod/Gateway/Router").unwrap();
        assert_eq!(route.kind, ResourceKind::GatewayRoute);
        assert_eq!(route.properties["protocol"], "http2");
        assert_eq!(
            route.properties["targetVirtualService"],
            env.default_router().virtual_service.name.as_str()
        );
    }

    mockall::mock! {
        Infra {}
        impl Infrastructure for Infra {
            fn provision(
                &self,
                request: &ProvisionRequest,
            ) -> Result<carver_common::ResourceHandle>;
        }
    }

    #[test]
    fn test_infrastructure_failure_aborts_construction() {
        let mut infra = MockInfra::new();
        infra
            .expect_provision()
            .withf(|req| req.kind == ResourceKind::Mesh)
            .times(1)
            .returning(|req| Err(Error::infrastructure_at(req.path.clone(), "mesh limit reached")));

        let err = Environment::new("Prod", props(), Rc::new(infra), Preferences::default())
            .unwrap_err();
        match err {
            Error::Infrastructure { path, .. } => assert_eq!(path, "Prod/Mesh"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_identities_expose_handles() {
        let env = Environment::new("Prod", props(), recording(), Preferences::default()).unwrap();
        let ids = env.identities();
        assert_eq!(ids.mesh, env.mesh());
        assert_eq!(ids.cluster.name, env.cluster().name);
        assert_eq!(ids.default_router.arn, env.default_router().arn);
    }
}
