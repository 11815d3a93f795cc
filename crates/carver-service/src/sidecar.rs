//! Mandatory mesh sidecar
//!
//! Every service's task runs an Envoy proxy that joins the mesh as the
//! service's virtual node. Traffic to the application ports is redirected
//! through it by the task's proxy configuration.

use carver_common::mesh::{
    envoy_health_check_command, EGRESS_IGNORED_IPS, ENVOY_CONTAINER_NAME, ENVOY_IGNORED_GID,
    ENVOY_IMAGE, ENVOY_LOG_STREAM_PREFIX, ENVOY_NOFILE_LIMIT, ENVOY_USER_ID, PROXY_EGRESS_PORT,
    PROXY_INGRESS_PORT, STREAM_AGGREGATED_RESOURCES_ACTION,
};
use carver_common::resources::{
    ContainerDefinition, HealthCheck, LogConfiguration, PolicyStatement, ProxyConfiguration,
    Ulimit,
};
use carver_common::Result;
use tracing::debug;

use crate::workload::TaskDefinitionRef;

/// Something applied directly to a task definition, outside the extension
/// lifecycle.
pub trait TaskDefinitionExtension {
    fn extend(&self, task: &TaskDefinitionRef) -> Result<()>;
}

/// The Envoy proxy container plus the permissions and proxy configuration it
/// needs.
#[derive(Clone, Debug)]
pub struct EnvoySidecar {
    container_name: String,
    endpoint_arn: String,
    region: String,
}

impl EnvoySidecar {
    /// `endpoint_arn` is the virtual node the proxy serves as.
    pub fn new(endpoint_arn: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            container_name: ENVOY_CONTAINER_NAME.to_string(),
            endpoint_arn: endpoint_arn.into(),
            region: region.into(),
        }
    }

    fn container(&self) -> ContainerDefinition {
        let mut container = ContainerDefinition::new(&self.container_name, ENVOY_IMAGE)
            .with_env("APPMESH_VIRTUAL_NODE_NAME", &self.endpoint_arn)
            .with_env("AWS_REGION", &self.region)
            .with_env("ENABLE_ENVOY_STATS_TAGS", "1")
            .with_env("ENABLE_ENVOY_DOG_STATSD", "1");
        container.user = Some(ENVOY_USER_ID.to_string());
        container.health_check = Some(HealthCheck {
            command: envoy_health_check_command(),
            interval_secs: 5,
            timeout_secs: 2,
            retries: 3,
            start_period_secs: Some(10),
        });
        container.ulimits = vec![Ulimit {
            name: "nofile".to_string(),
            soft_limit: ENVOY_NOFILE_LIMIT,
            hard_limit: ENVOY_NOFILE_LIMIT,
        }];
        container.logging = Some(LogConfiguration::aws_logs(ENVOY_LOG_STREAM_PREFIX));
        container
    }
}

impl TaskDefinitionExtension for EnvoySidecar {
    fn extend(&self, task: &TaskDefinitionRef) -> Result<()> {
        // Read before the proxy container exists so it never counts as the app.
        let app_ports: Vec<u16> = task
            .default_port_mappings()
            .iter()
            .map(|m| m.container_port)
            .collect();

        task.add_container(self.container())?;
        task.add_to_task_role_policy(PolicyStatement {
            actions: vec![STREAM_AGGREGATED_RESOURCES_ACTION.to_string()],
            resources: vec![self.endpoint_arn.clone()],
        });
        task.set_proxy_configuration(ProxyConfiguration {
            container_name: self.container_name.clone(),
            app_ports: app_ports.clone(),
            proxy_ingress_port: PROXY_INGRESS_PORT,
            proxy_egress_port: PROXY_EGRESS_PORT,
            ignored_uid: ENVOY_USER_ID,
            ignored_gid: ENVOY_IGNORED_GID,
            egress_ignored_ips: EGRESS_IGNORED_IPS.iter().map(|ip| ip.to_string()).collect(),
        });

        debug!(node = %self.endpoint_arn, ?app_ports, "attached envoy sidecar");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carver_common::resources::{PortMapping, TaskDefinition, TaskDefinitionProps};
    use carver_common::ResourceHandle;

    fn task() -> TaskDefinitionRef {
        TaskDefinitionRef::new(
            TaskDefinition::new("frontend", TaskDefinitionProps::default()),
            ResourceHandle {
                path: "Frontend/TaskDefinition".to_string(),
                id: "frontend".to_string(),
                arn: "arn:task".to_string(),
            },
        )
    }

    #[test]
    fn test_proxy_configuration_uses_app_ports() {
        let task = task();
        task.add_container(
            ContainerDefinition::new("Main", "nginx").with_port_mapping(PortMapping::tcp(8080)),
        )
        .unwrap();

        task.add_extension(&EnvoySidecar::new("arn:node", "us-east-1"))
            .unwrap();

        let snapshot = task.snapshot();
        let proxy = snapshot.proxy_configuration.unwrap();
        assert_eq!(proxy.container_name, "envoy");
        assert_eq!(proxy.app_ports, vec![8080]);
        assert_eq!(proxy.proxy_ingress_port, 15000);
        assert_eq!(proxy.ignored_uid, 1337);
        assert_eq!(proxy.egress_ignored_ips.len(), 2);
    }

    #[test]
    fn test_envoy_container_shape() {
        let task = task();
        task.add_extension(&EnvoySidecar::new("arn:node", "eu-west-1"))
            .unwrap();

        let snapshot = task.snapshot();
        let envoy = snapshot.container("envoy").unwrap();
        assert_eq!(envoy.user.as_deref(), Some("1337"));
        assert_eq!(envoy.environment["APPMESH_VIRTUAL_NODE_NAME"], "arn:node");
        assert_eq!(envoy.environment["AWS_REGION"], "eu-west-1");
        assert_eq!(envoy.ulimits[0].soft_limit, 1_024_000);
        assert_eq!(envoy.health_check.as_ref().unwrap().retries, 3);
        assert_eq!(
            snapshot.task_role_statements[0].actions,
            vec!["appmesh:StreamAggregatedResources".to_string()]
        );
    }

    #[test]
    fn test_no_app_ports_without_containers() {
        let task = task();
        task.add_extension(&EnvoySidecar::new("arn:node", "us-east-1"))
            .unwrap();
        assert!(task
            .snapshot()
            .proxy_configuration
            .unwrap()
            .app_ports
            .is_empty());
    }
}
