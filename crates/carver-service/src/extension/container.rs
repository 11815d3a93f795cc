//! The application container

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use carver_common::resources::{ContainerDefinition, SecretRef};
use carver_common::Result;

use crate::extension::ServiceExtension;
use crate::facade::ServiceFacade;
use crate::listener::{ListenerBinding, ServiceListener};
use crate::scope::PrivateScope;

/// Container name used when none is given
pub const DEFAULT_CONTAINER_NAME: &str = "Main";

/// Hard memory limit used when none is given
pub const DEFAULT_CONTAINER_MEMORY_MIB: u32 = 512;

/// What to run and which listeners it serves
#[derive(Clone)]
pub struct ContainerOptions {
    pub image: String,
    pub name: Option<String>,
    pub memory_limit_mib: Option<u32>,
    pub environment: BTreeMap<String, String>,
    pub secrets: BTreeMap<String, SecretRef>,
    pub listeners: Vec<Rc<dyn ServiceListener>>,
}

impl ContainerOptions {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            name: None,
            memory_limit_mib: None,
            environment: BTreeMap::new(),
            secrets: BTreeMap::new(),
            listeners: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_memory_limit_mib(mut self, memory: u32) -> Self {
        self.memory_limit_mib = Some(memory);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    pub fn with_secret(mut self, key: impl Into<String>, secret: SecretRef) -> Self {
        self.secrets.insert(key.into(), secret);
        self
    }

    pub fn with_listener(mut self, listener: Rc<dyn ServiceListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    fn definition(&self, bindings: &[ListenerBinding]) -> ContainerDefinition {
        let mut container = ContainerDefinition::new(
            self.name.as_deref().unwrap_or(DEFAULT_CONTAINER_NAME),
            &self.image,
        );
        container.memory_limit_mib =
            Some(self.memory_limit_mib.unwrap_or(DEFAULT_CONTAINER_MEMORY_MIB));
        container.environment = self.environment.clone();
        container.secrets = self.secrets.clone();
        container.port_mappings = bindings.iter().map(ListenerBinding::port_mapping).collect();
        container
    }
}

impl fmt::Debug for ContainerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerOptions")
            .field("image", &self.image)
            .field("name", &self.name)
            .field("memory_limit_mib", &self.memory_limit_mib)
            .field("environment", &self.environment.keys().collect::<Vec<_>>())
            .field("secrets", &self.secrets.keys().collect::<Vec<_>>())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// Adds the service's main container once the task definition exists.
///
/// Listeners are bound at registration so a listener that injects its own
/// extension does so before the workload is built.
#[derive(Clone, Debug)]
pub struct ContainerExtension {
    options: ContainerOptions,
}

impl ContainerExtension {
    pub fn new(options: ContainerOptions) -> Self {
        Self { options }
    }
}

impl ServiceExtension for ContainerExtension {
    fn type_name(&self) -> &str {
        "ContainerExtension"
    }

    fn register(&self, service: &ServiceFacade, _scope: &PrivateScope) -> Result<()> {
        let bindings = self
            .options
            .listeners
            .iter()
            .map(|listener| service.bind_listener(listener.as_ref()))
            .collect::<Result<Vec<_>>>()?;

        let definition = self.options.definition(&bindings);
        let publisher = service.clone();
        service.on_workload_ready(move |workload| {
            let container = workload.task_definition.add_container(definition.clone())?;
            for listener in bindings.iter().filter_map(|b| b.mesh_listener) {
                workload.virtual_node.add_listener(listener);
            }
            publisher.publish_container_definition(container)
        })
    }
}

pub fn container(options: ContainerOptions) -> Rc<dyn ServiceExtension> {
    Rc::new(ContainerExtension::new(options))
}
