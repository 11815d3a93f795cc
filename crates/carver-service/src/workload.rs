//! Handles to the resources a service is built around
//!
//! The task definition and the virtual node stay mutable until composition
//! finishes: extensions add containers and listeners to them from
//! workload-ready handlers. The service itself and the virtual service are
//! fixed once created.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use carver_common::resources::{
    ContainerDefinition, PolicyStatement, PortMapping, ProxyConfiguration, SecurityGroupId,
    ServiceProps, TaskDefinition, TaskDefinitionProps, VirtualNode, VirtualNodeListener,
    VirtualService,
};
use carver_common::{Error, ResourceHandle, Result};

use crate::sidecar::TaskDefinitionExtension;

// =============================================================================
// Task definition
// =============================================================================

/// Shared, mutable handle to the service's task definition
#[derive(Clone)]
pub struct TaskDefinitionRef {
    task: Rc<RefCell<TaskDefinition>>,
    handle: Rc<ResourceHandle>,
}

impl TaskDefinitionRef {
    pub(crate) fn new(task: TaskDefinition, handle: ResourceHandle) -> Self {
        Self {
            task: Rc::new(RefCell::new(task)),
            handle: Rc::new(handle),
        }
    }

    pub fn arn(&self) -> &str {
        &self.handle.arn
    }

    pub fn handle(&self) -> &ResourceHandle {
        &self.handle
    }

    pub fn props(&self) -> TaskDefinitionProps {
        self.task.borrow().props
    }

    /// Add a container. Names must be unique within the task.
    pub fn add_container(&self, container: ContainerDefinition) -> Result<ContainerRef> {
        let mut task = self.task.borrow_mut();
        if task.container(&container.name).is_some() {
            return Err(Error::validation_for_field(
                "containerName",
                format!("task definition already has a container named {}", container.name),
            ));
        }
        let name = container.name.clone();
        task.containers.push(container);
        Ok(ContainerRef {
            task: self.clone(),
            name,
        })
    }

    /// The first essential container, if any.
    pub fn default_container(&self) -> Option<ContainerRef> {
        let name = self.task.borrow().default_container()?.name.clone();
        Some(ContainerRef {
            task: self.clone(),
            name,
        })
    }

    /// Port mappings of the default container
    pub fn default_port_mappings(&self) -> Vec<PortMapping> {
        self.task
            .borrow()
            .default_container()
            .map(|c| c.port_mappings.clone())
            .unwrap_or_default()
    }

    pub fn add_to_task_role_policy(&self, statement: PolicyStatement) {
        self.task.borrow_mut().task_role_statements.push(statement);
    }

    pub fn set_proxy_configuration(&self, proxy: ProxyConfiguration) {
        self.task.borrow_mut().proxy_configuration = Some(proxy);
    }

    /// Apply a task-definition-level extension such as the mesh sidecar.
    pub fn add_extension(&self, extension: &dyn TaskDefinitionExtension) -> Result<()> {
        extension.extend(self)
    }

    /// The task definition as it stands now
    pub fn snapshot(&self) -> TaskDefinition {
        self.task.borrow().clone()
    }

    fn update_container<R>(
        &self,
        name: &str,
        f: impl FnOnce(&mut ContainerDefinition) -> R,
    ) -> Result<R> {
        let mut task = self.task.borrow_mut();
        let container = task
            .containers
            .iter_mut()
            .find(|c| c.name == name)
            .ok_or_else(|| {
                Error::validation_for_field("containerName", format!("no container named {name}"))
            })?;
        Ok(f(container))
    }

    fn read_container(&self, name: &str) -> Option<ContainerDefinition> {
        self.task.borrow().container(name).cloned()
    }
}

impl fmt::Debug for TaskDefinitionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDefinitionRef")
            .field("arn", &self.handle.arn)
            .field("containers", &self.task.borrow().containers.len())
            .finish()
    }
}

/// A container inside a [`TaskDefinitionRef`]
#[derive(Clone, Debug)]
pub struct ContainerRef {
    task: TaskDefinitionRef,
    name: String,
}

impl ContainerRef {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_port_mappings(&self, mappings: impl IntoIterator<Item = PortMapping>) -> Result<()> {
        self.task
            .update_container(&self.name, |c| c.port_mappings.extend(mappings))
    }

    /// Overlay `environment` on the container's own variables.
    pub fn merge_environment(&self, environment: &BTreeMap<String, String>) -> Result<()> {
        self.task.update_container(&self.name, |c| {
            c.environment
                .extend(environment.iter().map(|(k, v)| (k.clone(), v.clone())))
        })
    }

    /// The container definition as it stands now
    pub fn snapshot(&self) -> Option<ContainerDefinition> {
        self.task.read_container(&self.name)
    }
}

// =============================================================================
// Service
// =============================================================================

/// Identity and final configuration of the Fargate service
#[derive(Clone, Debug)]
pub struct FargateServiceHandle {
    inner: Rc<(ResourceHandle, ServiceProps)>,
}

impl FargateServiceHandle {
    pub(crate) fn new(handle: ResourceHandle, props: ServiceProps) -> Self {
        Self {
            inner: Rc::new((handle, props)),
        }
    }

    pub fn arn(&self) -> &str {
        &self.inner.0.arn
    }

    pub fn handle(&self) -> &ResourceHandle {
        &self.inner.0
    }

    pub fn props(&self) -> &ServiceProps {
        &self.inner.1
    }

    pub fn security_groups(&self) -> &[SecurityGroupId] {
        &self.inner.1.security_groups
    }
}

// =============================================================================
// Mesh
// =============================================================================

/// Shared, mutable handle to the service's virtual node
#[derive(Clone, Debug)]
pub struct VirtualNodeRef {
    node: Rc<RefCell<VirtualNode>>,
}

impl VirtualNodeRef {
    pub(crate) fn new(node: VirtualNode) -> Self {
        Self {
            node: Rc::new(RefCell::new(node)),
        }
    }

    pub fn name(&self) -> String {
        self.node.borrow().name.clone()
    }

    pub fn arn(&self) -> String {
        self.node.borrow().arn.clone()
    }

    pub fn add_listener(&self, listener: VirtualNodeListener) {
        self.node.borrow_mut().listeners.push(listener);
    }

    /// Allow outbound traffic to a virtual service.
    pub fn add_backend(&self, virtual_service: impl Into<String>) {
        let virtual_service = virtual_service.into();
        let mut node = self.node.borrow_mut();
        if !node.backends.contains(&virtual_service) {
            node.backends.push(virtual_service);
        }
    }

    pub fn listeners(&self) -> Vec<VirtualNodeListener> {
        self.node.borrow().listeners.clone()
    }

    pub fn snapshot(&self) -> VirtualNode {
        self.node.borrow().clone()
    }
}

/// The virtual service fronting this service's node
#[derive(Clone, Debug)]
pub struct VirtualServiceHandle {
    inner: Rc<VirtualService>,
}

impl VirtualServiceHandle {
    pub(crate) fn new(virtual_service: VirtualService) -> Self {
        Self {
            inner: Rc::new(virtual_service),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn arn(&self) -> &str {
        &self.inner.arn
    }

    pub fn get(&self) -> &VirtualService {
        &self.inner
    }
}

/// Published once the task definition, service and mesh identities exist
#[derive(Clone, Debug)]
pub struct WorkloadReady {
    pub task_definition: TaskDefinitionRef,
    pub service: FargateServiceHandle,
    pub virtual_node: VirtualNodeRef,
    pub virtual_service: VirtualServiceHandle,
}

#[cfg(test)]
mod tests {
    use super::*;
    use carver_common::resources::{CloudMapDiscovery, Protocol};

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
    fn test_duplicate_container_name_rejected() {
        let task = task();
        task.add_container(ContainerDefinition::new("Main", "nginx")).unwrap();
        let err = task
            .add_container(ContainerDefinition::new("Main", "nginx"))
            .unwrap_err();
        assert!(err.to_string().contains("Main"));
    }

    #[test]
    fn test_container_updates_are_visible_through_task() {
        let task = task();
        let main = task.add_container(ContainerDefinition::new("Main", "nginx")).unwrap();
        main.add_port_mappings([PortMapping::tcp(8080)]).unwrap();
        main.merge_environment(&BTreeMap::from([("FOO".to_string(), "1".to_string())]))
            .unwrap();

        let default = task.default_container().unwrap();
        assert_eq!(default.name(), "Main");
        assert_eq!(task.default_port_mappings()[0].protocol, Protocol::Tcp);
        assert_eq!(task.snapshot().containers[0].environment["FOO"], "1");
    }

    #[test]
    fn test_merge_environment_overrides_static_values() {
        let task = task();
        let main = task
            .add_container(ContainerDefinition::new("Main", "nginx").with_env("FOO", "static"))
            .unwrap();
        main.merge_environment(&BTreeMap::from([("FOO".to_string(), "merged".to_string())]))
            .unwrap();
        assert_eq!(main.snapshot().unwrap().environment["FOO"], "merged");
    }

    #[test]
    fn test_backends_deduplicated() {
        let node = VirtualNodeRef::new(VirtualNode {
            name: "frontend-prod".to_string(),
            mesh: "mesh".to_string(),
            arn: "arn:node".to_string(),
            discovery: CloudMapDiscovery {
                namespace: "prod".to_string(),
                service_name: "frontend".to_string(),
            },
            listeners: Vec::new(),
            backends: Vec::new(),
        });
        node.add_backend("backend.prod");
        node.add_backend("backend.prod");
        assert_eq!(node.snapshot().backends, vec!["backend.prod".to_string()]);
    }
}
