//! Service naming strategies

use carver_common::naming::unique_id;

/// How a service names itself in the mesh and in service discovery
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServiceName {
    /// Derive every name from a single DNS host label
    HostName(String),
}

impl ServiceName {
    pub fn host_name(host: impl Into<String>) -> Self {
        Self::HostName(host.into())
    }

    /// Host name strategy over a unique id derived from the service id
    pub fn from_service_id(service_id: &str) -> Self {
        Self::HostName(unique_id(service_id))
    }

    /// Explicit ECS service name. Host names leave it to the platform.
    pub fn service_name(&self) -> Option<String> {
        match self {
            Self::HostName(_) => None,
        }
    }

    pub fn cloud_map_service_name(&self) -> String {
        match self {
            Self::HostName(host) => host.clone(),
        }
    }

    pub fn virtual_node_name(&self, namespace: &str) -> String {
        match self {
            Self::HostName(host) => format!("{host}-{namespace}"),
        }
    }

    pub fn virtual_service_name(&self, namespace: &str) -> String {
        match self {
            Self::HostName(host) => format!("{host}.{namespace}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_name_strategy() {
        let name = ServiceName::host_name("frontend");
        assert_eq!(name.service_name(), None);
        assert_eq!(name.cloud_map_service_name(), "frontend");
        assert_eq!(name.virtual_node_name("prod"), "frontend-prod");
        assert_eq!(name.virtual_service_name("prod"), "frontend.prod");
    }

    #[test]
    fn test_default_host_is_unique_id() {
        let name = ServiceName::from_service_id("Frontend");
        let host = name.cloud_map_service_name();
        assert!(host.starts_with("frontend"));
        assert_eq!(host.len(), "frontend".len() + 8);
    }
}
