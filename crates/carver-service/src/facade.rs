//! The service composition facade
//!
//! Extensions never see the service under construction or each other. They
//! get a [`ServiceFacade`]: five replaying lifecycle channels, two filter
//! chains, and read-only access to the environment. Every subscription,
//! whenever it is made, first replays what already happened.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use carver_common::resources::{Connections, ServiceProps, TaskDefinitionProps};
use carver_common::{Error, EventChannel, FilterChain, Result};
use carver_environment::{Environment, Gateway, Router};

use crate::extension::ServiceExtension;
use crate::listener::{ListenerBinding, ServiceListener};
use crate::workload::{ContainerRef, WorkloadReady};

/// Environment variables published by one extension
pub type EnvVars = BTreeMap<String, String>;

/// Handle extensions use to observe and shape one service.
///
/// Clones share the same channels and chains.
#[derive(Clone)]
pub struct ServiceFacade {
    inner: Rc<FacadeInner>,
}

struct FacadeInner {
    service_id: String,
    environment: Rc<Environment>,
    task_definition_props: FilterChain<TaskDefinitionProps>,
    service_props: FilterChain<ServiceProps>,
    workload_ready: EventChannel<WorkloadReady>,
    connections_ready: EventChannel<Connections>,
    container_published: EventChannel<ContainerRef>,
    env_vars_added: EventChannel<EnvVars>,
    extension_added: EventChannel<Rc<dyn ServiceExtension>>,
    bindings: RefCell<Vec<ListenerBinding>>,
    env_frozen: Cell<bool>,
}

impl ServiceFacade {
    pub(crate) fn new(service_id: impl Into<String>, environment: Rc<Environment>) -> Self {
        Self {
            inner: Rc::new(FacadeInner {
                service_id: service_id.into(),
                environment,
                task_definition_props: FilterChain::new("task-definition-props"),
                service_props: FilterChain::new("service-props"),
                workload_ready: EventChannel::replaying(),
                connections_ready: EventChannel::replaying(),
                container_published: EventChannel::replaying(),
                env_vars_added: EventChannel::replaying(),
                extension_added: EventChannel::replaying(),
                bindings: RefCell::new(Vec::new()),
                env_frozen: Cell::new(false),
            }),
        }
    }

    pub fn service_id(&self) -> &str {
        &self.inner.service_id
    }

    pub fn environment(&self) -> &Rc<Environment> {
        &self.inner.environment
    }

    pub fn default_router(&self) -> &Router {
        self.inner.environment.default_router()
    }

    pub fn default_gateway(&self) -> &Gateway {
        self.inner.environment.default_gateway()
    }

    // =========================================================================
    // Filters
    // =========================================================================

    /// Append a transform over the task definition's construction props.
    pub fn add_task_definition_props_filter<F>(&self, filter: F)
    where
        F: Fn(TaskDefinitionProps) -> TaskDefinitionProps + 'static,
    {
        self.inner.task_definition_props.add(filter);
    }

    /// Append a transform over the service's construction props.
    pub fn add_service_props_filter<F>(&self, filter: F)
    where
        F: Fn(ServiceProps) -> ServiceProps + 'static,
    {
        self.inner.service_props.add(filter);
    }

    pub(crate) fn filter_task_definition_props(
        &self,
        base: TaskDefinitionProps,
    ) -> TaskDefinitionProps {
        self.inner.task_definition_props.filter(base)
    }

    pub(crate) fn filter_service_props(&self, base: ServiceProps) -> ServiceProps {
        self.inner.service_props.filter(base)
    }

    // =========================================================================
    // Environment variables
    // =========================================================================

    /// Publish environment variables for the service's containers.
    ///
    /// Fails with `EnvironmentFrozen` once the workload's environment has
    /// been written into its containers.
    pub fn add_env_vars(&self, vars: EnvVars) -> Result<()> {
        if self.inner.env_frozen.get() {
            return Err(Error::EnvironmentFrozen {
                keys: vars.into_keys().collect(),
            });
        }
        debug!(
            service = %self.inner.service_id,
            keys = ?vars.keys().collect::<Vec<_>>(),
            "environment variables published"
        );
        self.inner.env_vars_added.publish(vars)
    }

    pub fn on_env_vars<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(&EnvVars) -> Result<()> + 'static,
    {
        self.inner.env_vars_added.subscribe(handler)
    }

    pub fn is_environment_frozen(&self) -> bool {
        self.inner.env_frozen.get()
    }

    pub(crate) fn freeze_environment(&self) {
        self.inner.env_frozen.set(true);
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    pub fn on_workload_ready<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(&WorkloadReady) -> Result<()> + 'static,
    {
        self.inner.workload_ready.subscribe(handler)
    }

    pub fn on_connections_ready<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(&Connections) -> Result<()> + 'static,
    {
        self.inner.connections_ready.subscribe(handler)
    }

    pub fn on_container_definition_published<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(&ContainerRef) -> Result<()> + 'static,
    {
        self.inner.container_published.subscribe(handler)
    }

    pub fn on_service_extension_added<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(&Rc<dyn ServiceExtension>) -> Result<()> + 'static,
    {
        self.inner.extension_added.subscribe(handler)
    }

    /// Announce a container this extension created.
    pub fn publish_container_definition(&self, container: ContainerRef) -> Result<()> {
        debug!(
            service = %self.inner.service_id,
            container = %container.name(),
            "container published"
        );
        self.inner.container_published.publish(container)
    }

    /// Attach another extension. It is registered before this call returns.
    pub fn add_service_extension(&self, extension: Rc<dyn ServiceExtension>) -> Result<()> {
        self.inner.extension_added.publish(extension)
    }

    pub(crate) fn publish_workload_ready(&self, event: WorkloadReady) -> Result<()> {
        self.inner.workload_ready.publish(event)
    }

    pub(crate) fn publish_connections_ready(&self, connections: Connections) -> Result<()> {
        self.inner.connections_ready.publish(connections)
    }

    // =========================================================================
    // Listeners
    // =========================================================================

    /// Bind a listener and record the result for the mesh listener check.
    pub fn bind_listener(&self, listener: &dyn ServiceListener) -> Result<ListenerBinding> {
        let binding = listener.bind(self)?;
        debug!(
            service = %self.inner.service_id,
            port = binding.container_port,
            mesh = binding.mesh_listener.is_some(),
            "listener bound"
        );
        self.inner.bindings.borrow_mut().push(binding.clone());
        Ok(binding)
    }

    /// Every binding recorded so far, in bind order
    pub fn listener_bindings(&self) -> Vec<ListenerBinding> {
        self.inner.bindings.borrow().clone()
    }

    /// Drop every subscriber and filter. Both usually hold a facade clone,
    /// so they would otherwise keep the facade alive.
    pub(crate) fn release(&self) {
        self.inner.task_definition_props.clear();
        self.inner.service_props.clear();
        self.inner.workload_ready.clear_subscribers();
        self.inner.connections_ready.clear_subscribers();
        self.inner.container_published.clear_subscribers();
        self.inner.env_vars_added.clear_subscribers();
        self.inner.extension_added.clear_subscribers();
    }
}

impl fmt::Debug for ServiceFacade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceFacade")
            .field("service_id", &self.inner.service_id)
            .field("workload_ready", &self.inner.workload_ready)
            .field("connections_ready", &self.inner.connections_ready)
            .field("env_frozen", &self.inner.env_frozen.get())
            .finish()
    }
}
