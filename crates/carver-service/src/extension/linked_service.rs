//! Service-to-service links

use std::collections::BTreeMap;
use std::rc::Rc;

use carver_common::Result;

use crate::compiler::Service;
use crate::extension::ServiceExtension;
use crate::facade::ServiceFacade;
use crate::scope::PrivateScope;

#[derive(Clone, Debug)]
pub struct LinkedServiceOptions {
    /// Suffix of the injected variable: `BACKEND_{name}`, or `BACKEND` when unset
    pub name: Option<String>,
    /// The service to call
    pub service: Rc<Service>,
}

/// Lets this service call another one through the mesh
#[derive(Clone, Debug)]
pub struct LinkedServiceExtension {
    options: LinkedServiceOptions,
}

impl LinkedServiceExtension {
    pub fn new(options: LinkedServiceOptions) -> Self {
        Self { options }
    }

    /// Name of the environment variable carrying the linked address
    pub fn env_name(&self) -> String {
        match &self.options.name {
            Some(name) => format!("BACKEND_{name}"),
            None => "BACKEND".to_string(),
        }
    }
}

impl ServiceExtension for LinkedServiceExtension {
    fn type_name(&self) -> &str {
        "LinkedServiceExtension"
    }

    fn register(&self, service: &ServiceFacade, scope: &PrivateScope) -> Result<()> {
        let linked_name = self.options.service.virtual_service().name.clone();
        let env_name = self.env_name();
        let publisher = service.clone();
        service.on_workload_ready(move |workload| {
            workload.virtual_node.add_backend(linked_name.clone());
            publisher.add_env_vars(BTreeMap::from([(env_name.clone(), linked_name.clone())]))
        })?;

        let linked = Rc::clone(&self.options.service);
        let rules = scope.clone();
        service.on_connections_ready(move |connections| {
            rules
                .emit_ingress_rules(&linked.connections().allow_default_port_from(connections))
                .map(drop)
        })
    }
}

pub fn linked_service(options: LinkedServiceOptions) -> Rc<dyn ServiceExtension> {
    Rc::new(LinkedServiceExtension::new(options))
}
