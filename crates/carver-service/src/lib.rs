//! Carver service composition
//!
//! A service is assembled from independently written extensions that never
//! see each other. They talk to the service only through a
//! [`ServiceFacade`]: subscribing to lifecycle events, publishing
//! environment variables and containers, and appending filters to the
//! task-definition and service property chains.
//!
//! # Construction sequence
//!
//! [`ServiceCompiler::compile`] drives a fixed order:
//! 1. register extensions (declared and dynamically added)
//! 2. bind service-level listeners, reject more than one mesh listener
//! 3. filter and build the task definition
//! 4. filter and build the service, then its mesh identities
//! 5. publish workload-ready, freeze environment variables
//! 6. attach the Envoy sidecar
//! 7. compute connections and publish connections-ready
//!
//! # Usage
//!
//! ```text
//! let compiler = ServiceCompiler::new(environment);
//! let spec = ServiceSpec::new("Frontend")
//!     .with_extension(extension::container(
//!         ContainerOptions::new("nginx").with_listener(listener::http2(None)),
//!     ))
//!     .with_extension(extension::http_route(HttpRouteOptions::prefix("/path"))?);
//! let service = compiler.compile(&spec)?;
//! ```

pub mod compiler;
pub mod extension;
pub mod facade;
pub mod listener;
pub mod name;
pub mod registry;
pub mod scope;
pub mod sidecar;
pub mod workload;

pub use compiler::{ConstructionPhase, Service, ServiceCompiler, ServiceNames, ServiceSpec};
pub use extension::ServiceExtension;
pub use facade::ServiceFacade;
pub use listener::{ListenerBinding, ServiceListener};
pub use name::ServiceName;
pub use scope::{EmittedResource, PrivateScope, ResourceSink};
pub use sidecar::{EnvoySidecar, TaskDefinitionExtension};
pub use workload::{
    ContainerRef, FargateServiceHandle, TaskDefinitionRef, VirtualNodeRef, VirtualServiceHandle,
    WorkloadReady,
};

#[cfg(test)]
pub(crate) mod testing {
    use std::rc::Rc;

    use carver_common::config::Preferences;
    use carver_common::RecordingInfrastructure;
    use carver_environment::{Environment, EnvironmentProps};

    /// An environment built against recording infrastructure
    pub fn environment() -> (Rc<Environment>, Rc<RecordingInfrastructure>) {
        environment_with(Preferences::default())
    }

    pub fn environment_with(
        preferences: Preferences,
    ) -> (Rc<Environment>, Rc<RecordingInfrastructure>) {
        let infra = Rc::new(RecordingInfrastructure::default());
        let env = Environment::new(
            "production",
            EnvironmentProps {
                region: "us-east-1".to_string(),
                ..Default::default()
            },
            infra.clone(),
            preferences,
        )
        .unwrap();
        (Rc::new(env), infra)
    }
}
