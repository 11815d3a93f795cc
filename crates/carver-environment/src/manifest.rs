//! Versioned environment manifest
//!
//! A JSON document carrying an environment's identities so another
//! deployment can join it. Storing the document remotely is someone
//! else's job; this module only renders and parses it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::environment::{Environment, NamespaceType};

/// Version written into every manifest
pub const MANIFEST_VERSION_V1: &str = "1.0.0";

/// Errors raised while reading a manifest
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The document is not JSON
    #[error("cannot load an environment from {source_name} - parsing error: {message}")]
    Parse { source_name: String, message: String },

    /// The document's major version is not 1
    #[error("cannot load an environment from {source_name} - unsupported manifest version {version}")]
    UnsupportedVersion { source_name: String, version: String },

    /// The document claims version 1 but lacks required fields
    #[error("cannot load an environment from {source_name} - invalid v1 manifest: {message}")]
    Invalid { source_name: String, message: String },
}

impl From<ManifestError> for carver_common::Error {
    fn from(err: ManifestError) -> Self {
        carver_common::Error::serialization_for_kind("EnvironmentManifest", err.to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestNamespace {
    pub namespace_type: NamespaceType,
    pub namespace_name: String,
    pub namespace_id: String,
    pub namespace_arn: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestCluster {
    pub cluster_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_arn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_ec2_capacity: Option<bool>,
    #[serde(default)]
    pub security_group_ids: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestGateway {
    pub virtual_gateway_arn: String,
    #[serde(default)]
    pub security_group_ids: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestRouter {
    pub virtual_router_arn: String,
    pub virtual_service_arn: String,
    #[serde(default)]
    pub security_group_ids: Vec<String>,
}

/// Version 1 of the environment manifest
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentManifestV1 {
    pub version: String,
    /// Export a consumer should import to keep the origin deployment alive
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cross_stack_dependency_export_name: Option<String>,
    pub vpc_id: String,
    pub mesh_arn: String,
    pub namespace_attributes: ManifestNamespace,
    pub cluster_attributes: ManifestCluster,
    pub default_gateway_attributes: ManifestGateway,
    pub default_router_attributes: ManifestRouter,
}

impl EnvironmentManifestV1 {
    /// Capture an environment's identities.
    pub fn from_environment(env: &Environment, export_name: Option<String>) -> Self {
        let ids = env.identities();
        let group_ids = |groups: &[carver_common::resources::SecurityGroupId]| {
            groups.iter().map(|g| g.to_string()).collect::<Vec<_>>()
        };

        Self {
            version: MANIFEST_VERSION_V1.to_string(),
            cross_stack_dependency_export_name: export_name,
            vpc_id: env.vpc().id.clone(),
            mesh_arn: ids.mesh.arn.clone(),
            namespace_attributes: ManifestNamespace {
                namespace_type: ids.namespace.namespace_type,
                namespace_name: ids.namespace.name.clone(),
                namespace_id: ids.namespace.id.clone(),
                namespace_arn: ids.namespace.arn.clone(),
            },
            cluster_attributes: ManifestCluster {
                cluster_name: ids.cluster.name.clone(),
                cluster_arn: Some(ids.cluster.arn.clone()),
                has_ec2_capacity: Some(ids.cluster.has_ec2_capacity),
                security_group_ids: group_ids(&ids.cluster.security_groups),
            },
            default_gateway_attributes: ManifestGateway {
                virtual_gateway_arn: ids.default_gateway.arn.clone(),
                security_group_ids: group_ids(&ids.default_gateway.connections.security_groups),
            },
            default_router_attributes: ManifestRouter {
                virtual_router_arn: ids.default_router.arn.clone(),
                virtual_service_arn: ids.default_router.virtual_service.arn.clone(),
                security_group_ids: group_ids(&ids.default_router.connections.security_groups),
            },
        }
    }

    /// Render as pretty-printed JSON.
    pub fn to_json(&self) -> carver_common::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Entry point for reading manifests of any version
pub struct EnvironmentManifest;

impl EnvironmentManifest {
    /// Parse a manifest document. `source_name` names where it came from in errors.
    pub fn parse(source_name: &str, doc: &str) -> Result<EnvironmentManifestV1, ManifestError> {
        let value: serde_json::Value =
            serde_json::from_str(doc).map_err(|e| ManifestError::Parse {
                source_name: source_name.to_string(),
                message: e.to_string(),
            })?;

        let version = value
            .get("version")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default();
        if major_version(version) != Some(1) {
            return Err(ManifestError::UnsupportedVersion {
                source_name: source_name.to_string(),
                version: version.to_string(),
            });
        }

        serde_json::from_value(value).map_err(|e| ManifestError::Invalid {
            source_name: source_name.to_string(),
            message: e.to_string(),
        })
    }
}

fn major_version(version: &str) -> Option<u64> {
    version.split('.').next()?.parse().ok()
}
