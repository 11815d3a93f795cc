//! Task and service shapes handed to the container orchestrator

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::network::SecurityGroupId;

// =============================================================================
// Containers
// =============================================================================

/// Transport protocol of a container port mapping
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

/// A port exposed by a container
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
    /// Port the container listens on
    pub container_port: u16,
    /// Transport protocol
    pub protocol: Protocol,
}

impl PortMapping {
    /// TCP port mapping
    pub fn tcp(container_port: u16) -> Self {
        Self {
            container_port,
            protocol: Protocol::Tcp,
        }
    }

    /// UDP port mapping
    pub fn udp(container_port: u16) -> Self {
        Self {
            container_port,
            protocol: Protocol::Udp,
        }
    }
}

/// Where a container secret is read from at task start
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase", tag = "source")]
pub enum SecretRef {
    /// A secrets manager secret, optionally a single JSON field of it
    SecretsManager {
        secret_arn: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        field: Option<String>,
    },
    /// A parameter store parameter
    Parameter { parameter_name: String },
}

/// Container health check
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheck {
    pub command: Vec<String>,
    pub interval_secs: u32,
    pub timeout_secs: u32,
    pub retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_period_secs: Option<u32>,
}

/// Resource limit applied inside the container
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ulimit {
    pub name: String,
    pub soft_limit: u64,
    pub hard_limit: u64,
}

/// Container log shipping
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfiguration {
    /// Log driver (e.g., "awslogs")
    pub driver: String,
    /// Prefix for log stream names
    pub stream_prefix: String,
}

impl LogConfiguration {
    /// Ship logs to the cloud log service under `stream_prefix`
    pub fn aws_logs(stream_prefix: impl Into<String>) -> Self {
        Self {
            driver: "awslogs".to_string(),
            stream_prefix: stream_prefix.into(),
        }
    }
}

/// A container inside a task definition
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerDefinition {
    pub name: String,
    pub image: String,
    /// Whether the task stops when this container stops
    pub essential: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_limit_mib: Option<u32>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub secrets: BTreeMap<String, SecretRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub port_mappings: Vec<PortMapping>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheck>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ulimits: Vec<Ulimit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<LogConfiguration>,
}

impl ContainerDefinition {
    /// Create an essential container with nothing else set
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            essential: true,
            memory_limit_mib: None,
            environment: BTreeMap::new(),
            secrets: BTreeMap::new(),
            port_mappings: Vec::new(),
            user: None,
            health_check: None,
            ulimits: Vec::new(),
            logging: None,
        }
    }

    /// Add an environment variable
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Add a secret
    pub fn with_secret(mut self, key: impl Into<String>, secret: SecretRef) -> Self {
        self.secrets.insert(key.into(), secret);
        self
    }

    /// Add a port mapping
    pub fn with_port_mapping(mut self, mapping: PortMapping) -> Self {
        self.port_mappings.push(mapping);
        self
    }
}

// =============================================================================
// Task definition
// =============================================================================

/// Compute shape of a task
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefinitionProps {
    /// CPU units (1024 = one vCPU)
    pub cpu: u32,
    pub memory_limit_mib: u32,
}

impl Default for TaskDefinitionProps {
    fn default() -> Self {
        Self {
            cpu: 256,
            memory_limit_mib: 512,
        }
    }
}

/// Transparent proxy settings for a meshed task
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyConfiguration {
    pub container_name: String,
    pub app_ports: Vec<u16>,
    pub proxy_ingress_port: u16,
    pub proxy_egress_port: u16,
    pub ignored_uid: u32,
    pub ignored_gid: u32,
    pub egress_ignored_ips: Vec<String>,
}

/// A permission granted to the task role
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyStatement {
    pub actions: Vec<String>,
    pub resources: Vec<String>,
}

/// The final shape of a task definition
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefinition {
    pub family: String,
    pub props: TaskDefinitionProps,
    #[serde(default)]
    pub containers: Vec<ContainerDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_configuration: Option<ProxyConfiguration>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub task_role_statements: Vec<PolicyStatement>,
}

impl TaskDefinition {
    /// Create a task definition with no containers
    pub fn new(family: impl Into<String>, props: TaskDefinitionProps) -> Self {
        Self {
            family: family.into(),
            props,
            containers: Vec::new(),
            proxy_configuration: None,
            task_role_statements: Vec::new(),
        }
    }

    /// The first essential container, if any
    pub fn default_container(&self) -> Option<&ContainerDefinition> {
        self.containers.iter().find(|c| c.essential)
    }

    pub fn container(&self, name: &str) -> Option<&ContainerDefinition> {
        self.containers.iter().find(|c| c.name == name)
    }
}

// =============================================================================
// Service
// =============================================================================

/// Capacity pool a task can be placed on
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CapacityProvider {
    #[serde(rename = "FARGATE")]
    Standard,
    #[serde(rename = "FARGATE_SPOT")]
    Spot,
}

impl CapacityProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "FARGATE",
            Self::Spot => "FARGATE_SPOT",
        }
    }
}

impl std::fmt::Display for CapacityProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relative share of tasks placed on a capacity provider
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityProviderStrategy {
    pub capacity_provider: CapacityProvider,
    pub weight: u32,
    /// Tasks always placed on this provider before weights apply
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<u32>,
}

impl CapacityProviderStrategy {
    pub fn new(capacity_provider: CapacityProvider, weight: u32) -> Self {
        Self {
            capacity_provider,
            weight,
            base: None,
        }
    }
}

/// Which subnets of the VPC to place tasks in
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SubnetType {
    Public,
    Private,
}

/// DNS record kind registered for each task
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DnsRecordType {
    A,
    #[serde(rename = "SRV")]
    Srv,
}

/// Service discovery registration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudMapOptions {
    /// Namespace the service registers into
    pub namespace: String,
    /// Discovery name; the service id is used when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub dns_record_type: DnsRecordType,
    pub dns_ttl_secs: u32,
}

impl CloudMapOptions {
    /// A records with a 10 second TTL
    pub fn new(namespace: impl Into<String>, name: Option<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name,
            dns_record_type: DnsRecordType::A,
            dns_ttl_secs: 10,
        }
    }
}

/// Deployment circuit breaker
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreaker {
    /// Roll back to the last good deployment when tripped
    pub rollback: bool,
}

/// Construction properties of a service
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceProps {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    pub cluster: String,
    pub task_definition: String,
    pub cloud_map: CloudMapOptions,
    pub circuit_breaker: CircuitBreaker,
    pub min_healthy_percent: u32,
    pub max_healthy_percent: u32,
    pub capacity_provider_strategies: Vec<CapacityProviderStrategy>,
    pub assign_public_ip: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc_subnets: Option<SubnetType>,
    /// Security groups attached to tasks; one is created when empty
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub security_groups: Vec<SecurityGroupId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired_count: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_task_shape() {
        let props = TaskDefinitionProps::default();
        assert_eq!(props.cpu, 256);
        assert_eq!(props.memory_limit_mib, 512);
    }

    #[test]
    fn test_default_container_skips_non_essential() {
        let mut task = TaskDefinition::new("svc", TaskDefinitionProps::default());
        let mut init = ContainerDefinition::new("init", "busybox");
        init.essential = false;
        task.containers.push(init);
        task.containers.push(
            ContainerDefinition::new("Main", "nginx").with_port_mapping(PortMapping::tcp(80)),
        );

        let default = task.default_container().unwrap();
        assert_eq!(default.name, "Main");
        assert_eq!(default.port_mappings, vec![PortMapping::tcp(80)]);
    }

    #[test]
    fn test_capacity_provider_wire_names() {
        let json = serde_json::to_value(CapacityProviderStrategy::new(CapacityProvider::Spot, 100))
            .unwrap();
        assert_eq!(json["capacityProvider"], "FARGATE_SPOT");
        assert_eq!(json["weight"], 100);
        assert!(json.get("base").is_none());
    }

    #[test]
    fn test_container_skips_empty_collections() {
        let json = serde_json::to_value(ContainerDefinition::new("Main", "nginx")).unwrap();
        assert!(json.get("environment").is_none());
        assert!(json.get("portMappings").is_none());
        assert_eq!(json["essential"], true);
    }

    #[test]
    fn test_cloud_map_defaults() {
        let options = CloudMapOptions::new("prod", None);
        assert_eq!(options.dns_record_type, DnsRecordType::A);
        assert_eq!(options.dns_ttl_secs, 10);
    }
}
