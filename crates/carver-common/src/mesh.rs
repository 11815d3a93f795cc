//! Mesh sidecar constants
//!
//! Values the Envoy sidecar and the task's proxy configuration must agree on.

/// Envoy image injected into every meshed task
pub const ENVOY_IMAGE: &str = "public.ecr.aws/appmesh/aws-appmesh-envoy:v1.16.1.0-prod";

/// Name of the injected Envoy container
pub const ENVOY_CONTAINER_NAME: &str = "envoy";

/// UID Envoy runs as; its traffic bypasses the iptables redirect
pub const ENVOY_USER_ID: u32 = 1337;

/// GID whose traffic bypasses the redirect
pub const ENVOY_IGNORED_GID: u32 = 1338;

/// Port Envoy accepts redirected inbound traffic on
pub const PROXY_INGRESS_PORT: u16 = 15000;

/// Port Envoy accepts redirected outbound traffic on
pub const PROXY_EGRESS_PORT: u16 = 15001;

/// Envoy admin port used by the readiness check
pub const ENVOY_ADMIN_PORT: u16 = 9901;

/// Task metadata and instance metadata endpoints, never redirected
pub const EGRESS_IGNORED_IPS: [&str; 2] = ["169.254.170.2", "169.254.169.254"];

/// Log stream prefix of the Envoy container
pub const ENVOY_LOG_STREAM_PREFIX: &str = "envoy";

/// Open file limit for Envoy
pub const ENVOY_NOFILE_LIMIT: u64 = 1_024_000;

/// IAM action Envoy needs to stream its configuration from the mesh
pub const STREAM_AGGREGATED_RESOURCES_ACTION: &str = "appmesh:StreamAggregatedResources";

/// Readiness probe run inside the Envoy container
pub fn envoy_health_check_command() -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!("curl -s http://127.0.0.1:{ENVOY_ADMIN_PORT}/ready | grep -q LIVE"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_check_targets_admin_port() {
        let cmd = envoy_health_check_command();
        assert_eq!(&cmd[..2], ["sh", "-c"]);
        assert!(cmd[2].contains("127.0.0.1:9901/ready"));
    }

    #[test]
    fn test_proxy_ports_distinct() {
        assert_ne!(PROXY_INGRESS_PORT, PROXY_EGRESS_PORT);
        assert_ne!(ENVOY_USER_ID, ENVOY_IGNORED_GID);
    }
}
