//! Private scopes
//!
//! Every extension instance gets a scope named `{type}{ordinal}` rooted at
//! `{serviceId}/Extension{type}{ordinal}`. Resources an extension emits are
//! keyed by `{scopePath}/{id}`; the shared [`ResourceSink`] rejects a key it
//! has already seen, whichever scope produced it.

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use serde::Serialize;
use tracing::debug;

use carver_common::naming::unique_id;
use carver_common::resources::IngressRule;
use carver_common::{Error, ProvisionRequest, ResourceHandle, ResourceKind, Result};
use carver_environment::Environment;

/// A resource emitted by an extension, with the identity it was given
#[derive(Clone, Debug, PartialEq)]
pub struct EmittedResource {
    pub request: ProvisionRequest,
    pub handle: ResourceHandle,
}

/// Forwards provisioning to the environment's infrastructure and remembers
/// every path it has handed out.
#[derive(Clone)]
pub struct ResourceSink {
    inner: Rc<SinkInner>,
}

struct SinkInner {
    environment: Rc<Environment>,
    paths: RefCell<HashSet<String>>,
    emitted: RefCell<Vec<EmittedResource>>,
}

impl ResourceSink {
    pub fn new(environment: Rc<Environment>) -> Self {
        Self {
            inner: Rc::new(SinkInner {
                environment,
                paths: RefCell::new(HashSet::new()),
                emitted: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Provision a resource the sequencer itself owns. Not listed in
    /// [`emitted`](Self::emitted).
    pub fn provision<P: Serialize>(
        &self,
        path: impl Into<String>,
        kind: ResourceKind,
        properties: &P,
    ) -> Result<ResourceHandle> {
        let request = ProvisionRequest::new(path, kind, properties)?;
        self.claim(&request.path)?;
        self.inner.environment.infra().provision(&request)
    }

    /// Provision a resource on behalf of an extension and record it.
    pub fn emit<P: Serialize>(
        &self,
        path: impl Into<String>,
        kind: ResourceKind,
        properties: &P,
    ) -> Result<ResourceHandle> {
        let request = ProvisionRequest::new(path, kind, properties)?;
        self.claim(&request.path)?;
        let handle = self.inner.environment.infra().provision(&request)?;
        self.inner.emitted.borrow_mut().push(EmittedResource {
            request,
            handle: handle.clone(),
        });
        Ok(handle)
    }

    fn claim(&self, path: &str) -> Result<()> {
        if !self.inner.paths.borrow_mut().insert(path.to_string()) {
            return Err(Error::DuplicateResourceId {
                path: path.to_string(),
            });
        }
        Ok(())
    }

    /// Extension-emitted resources in emission order
    pub fn emitted(&self) -> Vec<EmittedResource> {
        self.inner.emitted.borrow().clone()
    }
}

impl fmt::Debug for ResourceSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceSink")
            .field("paths", &self.inner.paths.borrow().len())
            .field("emitted", &self.inner.emitted.borrow().len())
            .finish()
    }
}

/// Naming scope handed to one extension instance
#[derive(Clone, Debug)]
pub struct PrivateScope {
    namespace: String,
    path: String,
    sink: ResourceSink,
}

impl PrivateScope {
    pub(crate) fn new(service_id: &str, namespace: String, sink: ResourceSink) -> Self {
        let path = format!("{service_id}/Extension{namespace}");
        Self {
            namespace,
            path,
            sink,
        }
    }

    /// `{type}{ordinal}`, unique within the service
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Key a resource with this scope's path.
    pub fn child_path(&self, id: &str) -> String {
        format!("{}/{id}", self.path)
    }

    /// A stable physical name for a resource under this scope.
    pub fn resource_name(&self, id: &str) -> String {
        unique_id(&self.child_path(id))
    }

    /// Emit one resource at `{path}/{id}`.
    pub fn emit<P: Serialize>(
        &self,
        id: &str,
        kind: ResourceKind,
        properties: &P,
    ) -> Result<ResourceHandle> {
        let handle = self.sink.emit(self.child_path(id), kind, properties)?;
        debug!(scope = %self.namespace, resource = %id, kind = %kind, "emitted resource");
        Ok(handle)
    }

    /// Emit one ingress resource per rule.
    pub fn emit_ingress_rules(&self, rules: &[IngressRule]) -> Result<Vec<ResourceHandle>> {
        rules
            .iter()
            .map(|rule| {
                let id = format!("From{}To{}", rule.source, rule.group);
                self.emit(&id, ResourceKind::SecurityGroupIngress, rule)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use carver_common::resources::{Connections, Port, SecurityGroupId};
    use serde_json::json;

    fn scope(sink: &ResourceSink, namespace: &str) -> PrivateScope {
        PrivateScope::new("Frontend", namespace.to_string(), sink.clone())
    }

    #[test]
    fn test_scope_path_includes_namespace() {
        let (env, _) = testing::environment();
        let scope = scope(&ResourceSink::new(env), "HttpRouteExtension1");
        assert_eq!(scope.path(), "Frontend/ExtensionHttpRouteExtension1");
        assert_eq!(
            scope.child_path("HTTP2"),
            "Frontend/ExtensionHttpRouteExtension1/HTTP2"
        );
    }

    #[test]
    fn test_same_id_in_different_scopes_does_not_collide() {
        let (env, infra) = testing::environment();
        let sink = ResourceSink::new(env);
        let first = scope(&sink, "HttpRouteExtension0");
        let second = scope(&sink, "HttpRouteExtension1");

        first.emit("HTTP", ResourceKind::Route, &json!({})).unwrap();
        second.emit("HTTP", ResourceKind::Route, &json!({})).unwrap();

        assert_eq!(sink.emitted().len(), 2);
        assert!(infra
            .request_at("Frontend/ExtensionHttpRouteExtension1/HTTP")
            .is_some());
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let (env, _) = testing::environment();
        let sink = ResourceSink::new(env);
        let scope = scope(&sink, "ContainerExtension0");

        scope.emit("Thing", ResourceKind::Route, &json!({})).unwrap();
        let err = scope
            .emit("Thing", ResourceKind::Route, &json!({}))
            .unwrap_err();
        match err {
            Error::DuplicateResourceId { path } => {
                assert_eq!(path, "Frontend/ExtensionContainerExtension0/Thing")
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(sink.emitted().len(), 1);
    }

    #[test]
    fn test_sequencer_resources_are_not_listed_as_emitted() {
        let (env, _) = testing::environment();
        let sink = ResourceSink::new(env);
        sink.provision("Frontend/TaskDefinition", ResourceKind::TaskDefinition, &json!({}))
            .unwrap();
        assert!(sink.emitted().is_empty());
        assert!(sink
            .provision("Frontend/TaskDefinition", ResourceKind::TaskDefinition, &json!({}))
            .is_err());
    }

    #[test]
    fn test_ingress_rules_emitted_per_pair() {
        let (env, _) = testing::environment();
        let sink = ResourceSink::new(env);
        let scope = scope(&sink, "HttpRouteExtension0");

        let service = Connections::new(Port::Tcp(80), vec![SecurityGroupId::new("sg-svc")]);
        let peer = Connections::new(
            Port::AllTraffic,
            vec![SecurityGroupId::new("sg-a"), SecurityGroupId::new("sg-b")],
        );
        let handles = scope
            .emit_ingress_rules(&service.allow_default_port_from(&peer))
            .unwrap();

        assert_eq!(handles.len(), 2);
        let emitted = sink.emitted();
        assert_eq!(emitted[0].request.kind, ResourceKind::SecurityGroupIngress);
        assert_eq!(emitted[0].request.properties["source"], "sg-a");
        assert!(emitted[1].request.path.ends_with("/Fromsg-bTosg-svc"));
    }
}
