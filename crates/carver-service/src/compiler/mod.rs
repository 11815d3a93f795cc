//! Service compiler
//!
//! Runs the construction sequence for one [`ServiceSpec`] against an
//! environment and returns the built [`Service`].
//!
//! # Sequence
//!
//! 1. Every extension flows through the extension-added channel into the
//!    registry, declared ones first in list order.
//! 2. Service-level listeners are bound. Across every binding recorded on
//!    the facade at most one may carry a mesh listener.
//! 3. The task-definition chain filters the baseline task shape; the task
//!    definition is provisioned.
//! 4. The service chain filters the baseline service; the service, its
//!    virtual node and its virtual service are provisioned.
//! 5. Workload-ready is published. Service-level listeners are then attached
//!    to the default container and the environment variables are frozen into
//!    every published container.
//! 6. The Envoy sidecar is attached, seeing the final port mappings.
//! 7. Connections are computed and connections-ready is published.

mod phase;

pub use phase::ConstructionPhase;

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use serde_json::json;
use tracing::{debug, info};

use carver_common::config::{default_capacity_provider_strategy, default_service_network_config};
use carver_common::resources::{
    CircuitBreaker, CloudMapDiscovery, CloudMapOptions, Connections, Port, SecurityGroupId,
    ServiceProps, TaskDefinition, TaskDefinitionProps, VirtualNode, VirtualService,
    VirtualServiceProvider,
};
use carver_common::{Error, ResourceHandle, ResourceKind, Result};
use carver_environment::Environment;

use crate::extension::ServiceExtension;
use crate::facade::{EnvVars, ServiceFacade};
use crate::listener::{ListenerBinding, ServiceListener};
use crate::name::ServiceName;
use crate::registry::ExtensionRegistry;
use crate::scope::{EmittedResource, ResourceSink};
use crate::sidecar::EnvoySidecar;
use crate::workload::{
    FargateServiceHandle, TaskDefinitionRef, VirtualNodeRef, VirtualServiceHandle, WorkloadReady,
};

/// Minimum share of tasks kept healthy during a deployment
const MIN_HEALTHY_PERCENT: u32 = 100;

/// Maximum share of tasks running during a deployment
const MAX_HEALTHY_PERCENT: u32 = 200;

// =============================================================================
// Input
// =============================================================================

/// What to build: an id, an optional naming strategy, extensions and
/// service-level listeners.
#[derive(Clone)]
pub struct ServiceSpec {
    pub id: String,
    pub name: Option<ServiceName>,
    pub extensions: Vec<Rc<dyn ServiceExtension>>,
    pub listeners: Vec<Rc<dyn ServiceListener>>,
}

impl ServiceSpec {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            extensions: Vec::new(),
            listeners: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: ServiceName) -> Self {
        self.name = Some(name);
        self
    }

    pub fn with_extension(mut self, extension: Rc<dyn ServiceExtension>) -> Self {
        self.extensions.push(extension);
        self
    }

    pub fn with_listener(mut self, listener: Rc<dyn ServiceListener>) -> Self {
        self.listeners.push(listener);
        self
    }
}

impl fmt::Debug for ServiceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceSpec")
            .field("id", &self.id)
            .field("name", &self.name)
            .field(
                "extensions",
                &self.extensions.iter().map(|e| e.type_name()).collect::<Vec<_>>(),
            )
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

// =============================================================================
// Output
// =============================================================================

/// Names the service resolved to
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceNames {
    pub service_name: Option<String>,
    pub cloud_map: String,
    pub virtual_node: String,
    pub virtual_service: String,
}

impl ServiceNames {
    fn resolve(name: &ServiceName, namespace: &str) -> Self {
        Self {
            service_name: name.service_name(),
            cloud_map: name.cloud_map_service_name(),
            virtual_node: name.virtual_node_name(namespace),
            virtual_service: name.virtual_service_name(namespace),
        }
    }
}

/// A fully composed service
#[derive(Clone, Debug)]
pub struct Service {
    id: String,
    names: ServiceNames,
    task_definition: TaskDefinition,
    task_definition_handle: ResourceHandle,
    service_props: ServiceProps,
    service_handle: ResourceHandle,
    virtual_node: VirtualNode,
    virtual_service: VirtualService,
    connections: Connections,
    environment: EnvVars,
    extension_namespaces: Vec<String>,
    resources: Vec<EmittedResource>,
    listener_bindings: Vec<ListenerBinding>,
}

impl Service {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn names(&self) -> &ServiceNames {
        &self.names
    }

    /// Final task definition including every container and the sidecar
    pub fn task_definition(&self) -> &TaskDefinition {
        &self.task_definition
    }

    pub fn task_definition_handle(&self) -> &ResourceHandle {
        &self.task_definition_handle
    }

    /// Service props after every filter ran
    pub fn service_props(&self) -> &ServiceProps {
        &self.service_props
    }

    pub fn service_handle(&self) -> &ResourceHandle {
        &self.service_handle
    }

    pub fn virtual_node(&self) -> &VirtualNode {
        &self.virtual_node
    }

    pub fn virtual_service(&self) -> &VirtualService {
        &self.virtual_service
    }

    pub fn connections(&self) -> &Connections {
        &self.connections
    }

    /// Environment variables frozen into the published containers
    pub fn environment(&self) -> &EnvVars {
        &self.environment
    }

    /// Private namespaces in registration order
    pub fn extension_namespaces(&self) -> &[String] {
        &self.extension_namespaces
    }

    /// Extension-emitted resources in emission order
    pub fn resources(&self) -> &[EmittedResource] {
        &self.resources
    }

    pub fn resources_of(&self, kind: ResourceKind) -> impl Iterator<Item = &EmittedResource> {
        self.resources.iter().filter(move |r| r.request.kind == kind)
    }

    pub fn listener_bindings(&self) -> &[ListenerBinding] {
        &self.listener_bindings
    }
}

// =============================================================================
// Compiler
// =============================================================================

/// Builds services inside one environment
pub struct ServiceCompiler {
    environment: Rc<Environment>,
}

impl ServiceCompiler {
    pub fn new(environment: Rc<Environment>) -> Self {
        Self { environment }
    }

    pub fn environment(&self) -> &Rc<Environment> {
        &self.environment
    }

    /// Compose one service.
    ///
    /// # Errors
    ///
    /// - `DuplicateExtension` when an extension instance is attached twice
    /// - `MultipleMeshListeners` when more than one binding carries a mesh listener
    /// - `Validation` when service-level listeners have no container to attach to
    /// - `EnvironmentFrozen` when variables are published after the freeze
    /// - anything an extension, listener or the infrastructure returns
    pub fn compile(&self, spec: &ServiceSpec) -> Result<Service> {
        Construction::new(Rc::clone(&self.environment), spec).run()
    }
}

/// State of one run of the sequence
struct Construction<'a> {
    spec: &'a ServiceSpec,
    environment: Rc<Environment>,
    names: ServiceNames,
    name: ServiceName,
    facade: ServiceFacade,
    sink: ResourceSink,
    registry: Rc<ExtensionRegistry>,
    merged_env: Rc<RefCell<EnvVars>>,
    phase: Cell<ConstructionPhase>,
}

impl<'a> Construction<'a> {
    fn new(environment: Rc<Environment>, spec: &'a ServiceSpec) -> Self {
        let name = spec
            .name
            .clone()
            .unwrap_or_else(|| ServiceName::from_service_id(&spec.id));
        let names = ServiceNames::resolve(&name, &environment.namespace().name);
        let sink = ResourceSink::new(Rc::clone(&environment));

        Self {
            spec,
            facade: ServiceFacade::new(&spec.id, Rc::clone(&environment)),
            registry: Rc::new(ExtensionRegistry::new(&spec.id, sink.clone())),
            environment,
            names,
            name,
            sink,
            merged_env: Rc::new(RefCell::new(EnvVars::new())),
            phase: Cell::new(ConstructionPhase::Created),
        }
    }

    fn enter(&self, phase: ConstructionPhase) {
        debug_assert_eq!(self.phase.get().next(), Some(phase));
        self.phase.set(phase);
        debug!(service = %self.spec.id, phase = ?phase, "construction phase");
    }

    fn path(&self, id: &str) -> String {
        format!("{}/{id}", self.spec.id)
    }

    fn run(&self) -> Result<Service> {
        self.enter(ConstructionPhase::ExtensionsRegistering);
        self.registry.attach(&self.facade)?;
        let merged = Rc::clone(&self.merged_env);
        self.facade.on_env_vars(move |vars| {
            merged
                .borrow_mut()
                .extend(vars.iter().map(|(k, v)| (k.clone(), v.clone())));
            Ok(())
        })?;
        for extension in &self.spec.extensions {
            self.facade.add_service_extension(Rc::clone(extension))?;
        }

        self.enter(ConstructionPhase::ListenersBinding);
        let service_bindings = self
            .spec
            .listeners
            .iter()
            .map(|listener| self.facade.bind_listener(listener.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        self.check_mesh_listeners()?;

        self.enter(ConstructionPhase::TaskDefFiltering);
        let task_definition = self.build_task_definition()?;

        self.enter(ConstructionPhase::ServiceBuilding);
        let service = self.build_service(&task_definition)?;
        let virtual_node = self.build_virtual_node()?;
        let virtual_service = self.build_virtual_service(&virtual_node)?;

        self.enter(ConstructionPhase::WorkloadPublishing);
        self.facade.publish_workload_ready(WorkloadReady {
            task_definition: task_definition.clone(),
            service: service.clone(),
            virtual_node: virtual_node.clone(),
            virtual_service: virtual_service.clone(),
        })?;
        self.attach_service_listeners(&task_definition, &virtual_node, &service_bindings)?;
        let environment = self.freeze_environment()?;

        self.enter(ConstructionPhase::SidecarAttaching);
        task_definition.add_extension(&EnvoySidecar::new(
            virtual_node.arn(),
            self.environment.region(),
        ))?;

        self.enter(ConstructionPhase::ConnectionsPublishing);
        let default_port = task_definition
            .default_port_mappings()
            .first()
            .map(Port::from_mapping)
            .unwrap_or(Port::AllTraffic);
        let connections = Connections::new(default_port, service.security_groups().to_vec());
        self.facade.publish_connections_ready(connections.clone())?;

        self.enter(ConstructionPhase::Done);
        let built = Service {
            id: self.spec.id.clone(),
            names: self.names.clone(),
            task_definition: task_definition.snapshot(),
            task_definition_handle: task_definition.handle().clone(),
            service_props: service.props().clone(),
            service_handle: service.handle().clone(),
            virtual_node: virtual_node.snapshot(),
            virtual_service: virtual_service.get().clone(),
            connections,
            environment,
            extension_namespaces: self.registry.namespaces(),
            resources: self.sink.emitted(),
            listener_bindings: self.facade.listener_bindings(),
        };

        info!(
            service = %built.id,
            extensions = built.extension_namespaces.len(),
            containers = built.task_definition.containers.len(),
            resources = built.resources.len(),
            "service composed"
        );
        Ok(built)
    }

    fn check_mesh_listeners(&self) -> Result<()> {
        let count = self
            .facade
            .listener_bindings()
            .iter()
            .filter(|b| b.mesh_listener.is_some())
            .count();
        if count > 1 {
            return Err(Error::MultipleMeshListeners { count });
        }
        Ok(())
    }

    fn build_task_definition(&self) -> Result<TaskDefinitionRef> {
        let props = self
            .facade
            .filter_task_definition_props(TaskDefinitionProps::default());
        let task = TaskDefinition::new(self.names.cloud_map.clone(), props);
        let handle = self
            .sink
            .provision(self.path("TaskDefinition"), ResourceKind::TaskDefinition, &task)?;
        Ok(TaskDefinitionRef::new(task, handle))
    }

    fn base_service_props(&self, task_definition: &TaskDefinitionRef) -> ServiceProps {
        let env = &self.environment;
        let network = default_service_network_config(env.preferences());
        ServiceProps {
            service_name: self.name.service_name(),
            cluster: env.cluster().name.clone(),
            task_definition: task_definition.arn().to_string(),
            cloud_map: CloudMapOptions::new(
                env.namespace().name.clone(),
                Some(self.names.cloud_map.clone()),
            ),
            circuit_breaker: CircuitBreaker { rollback: true },
            min_healthy_percent: MIN_HEALTHY_PERCENT,
            max_healthy_percent: MAX_HEALTHY_PERCENT,
            capacity_provider_strategies: default_capacity_provider_strategy(env.preferences()),
            assign_public_ip: network.assign_public_ip,
            vpc_subnets: network.vpc_subnets,
            security_groups: Vec::new(),
            desired_count: None,
        }
    }

    fn build_service(&self, task_definition: &TaskDefinitionRef) -> Result<FargateServiceHandle> {
        let mut props = self
            .facade
            .filter_service_props(self.base_service_props(task_definition));

        if props.security_groups.is_empty() {
            let group = self.sink.provision(
                self.path("Service/SecurityGroup"),
                ResourceKind::SecurityGroup,
                &json!({ "vpc": self.environment.vpc().id }),
            )?;
            props.security_groups.push(SecurityGroupId::new(group.id));
        }

        let handle = self
            .sink
            .provision(self.path("Service"), ResourceKind::FargateService, &props)?;
        Ok(FargateServiceHandle::new(handle, props))
    }

    fn build_virtual_node(&self) -> Result<VirtualNodeRef> {
        let discovery = CloudMapDiscovery {
            namespace: self.environment.namespace().name.clone(),
            service_name: self.names.cloud_map.clone(),
        };
        let mesh = self.environment.mesh().name.clone();
        let handle = self.sink.provision(
            self.path("VirtualNode"),
            ResourceKind::VirtualNode,
            &json!({
                "name": self.names.virtual_node,
                "mesh": mesh,
                "discovery": discovery,
            }),
        )?;

        Ok(VirtualNodeRef::new(VirtualNode {
            name: self.names.virtual_node.clone(),
            mesh,
            arn: handle.arn,
            discovery,
            listeners: Vec::new(),
            backends: Vec::new(),
        }))
    }

    fn build_virtual_service(&self, node: &VirtualNodeRef) -> Result<VirtualServiceHandle> {
        let provider = VirtualServiceProvider::VirtualNode(node.name());
        let mesh = self.environment.mesh().name.clone();
        let handle = self.sink.provision(
            self.path("VirtualService"),
            ResourceKind::VirtualService,
            &json!({
                "name": self.names.virtual_service,
                "mesh": mesh,
                "provider": provider,
            }),
        )?;

        Ok(VirtualServiceHandle::new(VirtualService {
            name: self.names.virtual_service.clone(),
            mesh,
            arn: handle.arn,
            provider,
        }))
    }

    fn attach_service_listeners(
        &self,
        task_definition: &TaskDefinitionRef,
        virtual_node: &VirtualNodeRef,
        bindings: &[ListenerBinding],
    ) -> Result<()> {
        if bindings.is_empty() {
            return Ok(());
        }
        let container = task_definition.default_container().ok_or_else(|| {
            Error::validation_for_field(
                "listeners",
                "service listeners were declared but no extension added a container",
            )
        })?;

        container.add_port_mappings(bindings.iter().map(ListenerBinding::port_mapping))?;
        for listener in bindings.iter().filter_map(|b| b.mesh_listener) {
            virtual_node.add_listener(listener);
        }
        Ok(())
    }

    /// Stop accepting variables and write the merged set into every
    /// published container, including ones published later.
    fn freeze_environment(&self) -> Result<EnvVars> {
        self.facade.freeze_environment();
        let frozen = self.merged_env.borrow().clone();
        debug!(service = %self.spec.id, keys = frozen.len(), "environment frozen");

        let snapshot = frozen.clone();
        self.facade
            .on_container_definition_published(move |container| {
                container.merge_environment(&snapshot)
            })?;
        Ok(frozen)
    }
}

impl Drop for Construction<'_> {
    fn drop(&mut self) {
        self.facade.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension::{self, ContainerOptions, TaskSizeOptions};
    use crate::listener::{self, MockServiceListener};
    use crate::scope::PrivateScope;
    use crate::testing;
    use carver_common::resources::{PortMapping, VirtualNodeListener};

    fn compiler() -> ServiceCompiler {
        let (env, _) = testing::environment();
        ServiceCompiler::new(env)
    }

    fn mesh_binding(port: u16) -> Rc<dyn ServiceListener> {
        let mut listener = MockServiceListener::new();
        listener.expect_bind().times(1).returning(move |_| {
            Ok(ListenerBinding {
                container_port: port,
                protocol: carver_common::resources::Protocol::Tcp,
                mesh_listener: Some(VirtualNodeListener::http(port)),
            })
        });
        Rc::new(listener)
    }

    /// Publishes variables when connections are ready, after the freeze.
    struct LateEnv;

    impl ServiceExtension for LateEnv {
        fn type_name(&self) -> &str {
            "LateEnv"
        }

        fn register(&self, service: &ServiceFacade, _scope: &PrivateScope) -> Result<()> {
            let publisher = service.clone();
            service.on_connections_ready(move |_| {
                publisher.add_env_vars(EnvVars::from([("LATE".to_string(), "1".to_string())]))
            })
        }
    }

    #[test]
    fn test_empty_service_gets_sidecar_and_security_group() {
        let (env, infra) = testing::environment();
        let service = ServiceCompiler::new(env)
            .compile(&ServiceSpec::new("Frontend"))
            .unwrap();

        let containers = &service.task_definition().containers;
        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0].name, "envoy");
        assert_eq!(service.connections().default_port, Port::AllTraffic);
        assert_eq!(service.connections().security_groups.len(), 1);
        assert!(infra.request_at("Frontend/Service/SecurityGroup").is_some());
    }

    #[test]
    fn test_default_service_props() {
        let service = compiler()
            .compile(&ServiceSpec::new("Frontend").with_name(ServiceName::host_name("frontend")))
            .unwrap();

        let props = service.service_props();
        assert_eq!(props.service_name, None);
        assert_eq!(props.min_healthy_percent, 100);
        assert_eq!(props.max_healthy_percent, 200);
        assert!(props.circuit_breaker.rollback);
        assert_eq!(props.cloud_map.name.as_deref(), Some("frontend"));
        assert_eq!(props.cloud_map.dns_ttl_secs, 10);
        assert!(!props.assign_public_ip);
        assert_eq!(service.names().virtual_node, "frontend-production");
        assert_eq!(service.names().virtual_service, "frontend.production");
        assert_eq!(service.virtual_node().name, "frontend-production");
    }

    #[test]
    fn test_two_mesh_listeners_rejected() {
        let spec = ServiceSpec::new("Frontend")
            .with_listener(mesh_binding(80))
            .with_listener(mesh_binding(8080));

        match compiler().compile(&spec).unwrap_err() {
            Error::MultipleMeshListeners { count } => assert_eq!(count, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_container_and_service_listeners_counted_together() {
        let spec = ServiceSpec::new("Frontend")
            .with_extension(extension::container(
                ContainerOptions::new("nginx").with_listener(listener::http2(None)),
            ))
            .with_listener(listener::grpc(Some(50051)));

        let err = compiler().compile(&spec).unwrap_err();
        assert!(matches!(err, Error::MultipleMeshListeners { count: 2 }));
    }

    #[test]
    fn test_service_listeners_attach_to_default_container() {
        let spec = ServiceSpec::new("Frontend")
            .with_extension(extension::container(ContainerOptions::new("nginx")))
            .with_listener(listener::http1(Some(8080)))
            .with_listener(listener::udp_port_mapping(53));

        let service = compiler().compile(&spec).unwrap();
        let main = service.task_definition().container("Main").unwrap();
        assert_eq!(
            main.port_mappings,
            vec![PortMapping::tcp(8080), PortMapping::udp(53)]
        );
        assert_eq!(service.virtual_node().listeners, vec![VirtualNodeListener::http(8080)]);
        assert_eq!(service.connections().default_port, Port::Tcp(8080));
        assert_eq!(
            service.task_definition().proxy_configuration.as_ref().unwrap().app_ports,
            vec![8080, 53]
        );
    }

    #[test]
    fn test_service_listeners_without_container_rejected() {
        let spec = ServiceSpec::new("Frontend").with_listener(listener::http1(None));
        match compiler().compile(&spec).unwrap_err() {
            Error::Validation { field, .. } => assert_eq!(field.as_deref(), Some("listeners")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_task_size_filter_applies() {
        let spec = ServiceSpec::new("Frontend").with_extension(extension::task_size(
            TaskSizeOptions {
                cpu: 1024,
                memory_limit_mib: 2048,
            },
        ));
        let service = compiler().compile(&spec).unwrap();
        assert_eq!(service.task_definition().props.cpu, 1024);
        assert_eq!(service.task_definition().props.memory_limit_mib, 2048);
    }

    #[test]
    fn test_env_vars_after_freeze_abort_construction() {
        let spec = ServiceSpec::new("Frontend").with_extension(Rc::new(LateEnv));
        match compiler().compile(&spec).unwrap_err() {
            Error::EnvironmentFrozen { keys } => assert_eq!(keys, vec!["LATE".to_string()]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_spot_preference_sets_default_strategy() {
        let (env, _) = testing::environment_with(carver_common::Preferences {
            use_public_service_networking: true,
            use_spot_capacity: true,
        });
        let service = ServiceCompiler::new(env)
            .compile(&ServiceSpec::new("Frontend"))
            .unwrap();

        let props = service.service_props();
        assert_eq!(props.capacity_provider_strategies[0].weight, 1000);
        assert!(props.assign_public_ip);
        assert_eq!(props.vpc_subnets, None);
    }
}
