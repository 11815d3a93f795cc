//! Extension registry
//!
//! Declared and dynamically added extensions both arrive on the facade's
//! extension-added channel; the registry is its first subscriber, so one
//! routine registers all of them. Each instance is registered at most once
//! and gets a private namespace `{type}{ordinal}` with ordinals counted per
//! type tag.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::debug;

use carver_common::{Error, Result};

use crate::extension::ServiceExtension;
use crate::facade::ServiceFacade;
use crate::scope::{PrivateScope, ResourceSink};

/// Tracks the extensions attached to one service
pub struct ExtensionRegistry {
    service_id: String,
    sink: ResourceSink,
    registered: RefCell<Vec<Rc<dyn ServiceExtension>>>,
    ordinals: RefCell<HashMap<String, usize>>,
    namespaces: RefCell<Vec<String>>,
}

impl ExtensionRegistry {
    pub fn new(service_id: impl Into<String>, sink: ResourceSink) -> Self {
        Self {
            service_id: service_id.into(),
            sink,
            registered: RefCell::new(Vec::new()),
            ordinals: RefCell::new(HashMap::new()),
            namespaces: RefCell::new(Vec::new()),
        }
    }

    /// Register every extension published on `facade` from now on.
    pub fn attach(self: &Rc<Self>, facade: &ServiceFacade) -> Result<()> {
        let registry = Rc::clone(self);
        let service = facade.clone();
        facade.on_service_extension_added(move |extension| registry.register(&service, extension))
    }

    /// Register one extension instance.
    pub fn register(
        &self,
        facade: &ServiceFacade,
        extension: &Rc<dyn ServiceExtension>,
    ) -> Result<()> {
        let type_name = extension.type_name().to_string();

        if self
            .registered
            .borrow()
            .iter()
            .any(|seen| same_instance(seen, extension))
        {
            return Err(Error::duplicate_extension(type_name));
        }

        let namespace = self.next_namespace(&type_name)?;
        self.registered.borrow_mut().push(Rc::clone(extension));

        let scope = PrivateScope::new(&self.service_id, namespace, self.sink.clone());
        debug!(
            service = %self.service_id,
            extension = %type_name,
            scope = %scope.namespace(),
            "registering extension"
        );
        extension.register(facade, &scope)
    }

    fn next_namespace(&self, type_name: &str) -> Result<String> {
        let mut ordinals = self.ordinals.borrow_mut();
        let ordinal = ordinals.entry(type_name.to_string()).or_insert(0);
        let namespace = format!("{type_name}{ordinal}");

        // "Ab" + 10 and "Ab1" + 0 would otherwise share a scope.
        let mut namespaces = self.namespaces.borrow_mut();
        if namespaces.contains(&namespace) {
            return Err(Error::validation(format!(
                "extension namespace {namespace} is already taken by another extension type"
            )));
        }

        *ordinal += 1;
        namespaces.push(namespace.clone());
        Ok(namespace)
    }

    /// Namespaces assigned so far, in registration order
    pub fn namespaces(&self) -> Vec<String> {
        self.namespaces.borrow().clone()
    }

    /// Type tags of the registered extensions, in registration order
    pub fn type_names(&self) -> Vec<String> {
        self.registered
            .borrow()
            .iter()
            .map(|e| e.type_name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.registered.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.registered.borrow().is_empty()
    }
}

fn same_instance(a: &Rc<dyn ServiceExtension>, b: &Rc<dyn ServiceExtension>) -> bool {
    Rc::as_ptr(a).cast::<()>() == Rc::as_ptr(b).cast::<()>()
}
