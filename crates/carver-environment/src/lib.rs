//! Carver environments
//!
//! - **Environment**: mesh, VPC, cluster and discovery namespace shared by services
//! - **Gateway**: internet-facing ingress into the mesh
//! - **Router**: default virtual router services attach HTTP routes to
//! - **Manifest**: versioned JSON export/import of an environment's identities

pub mod environment;
pub mod gateway;
pub mod manifest;
pub mod router;

pub use environment::{
    ClusterRef, Environment, EnvironmentIdentities, EnvironmentProps, MeshRef, NamespaceRef,
    NamespaceType, VpcRef,
};
pub use gateway::Gateway;
pub use manifest::{EnvironmentManifest, EnvironmentManifestV1, ManifestError};
pub use router::Router;
