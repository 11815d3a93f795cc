//! Authenticating OIDC proxy
//!
//! The [`OidcHttpProxyListener`] maps the application's port and injects an
//! [`OidcHttpProxyExtension`], which runs the proxy as its own container on
//! port 80. The binding's mesh listener points at the proxy port, so it
//! counts against the node's single ingress listener like any other.

use std::collections::BTreeMap;
use std::rc::Rc;

use carver_common::resources::{
    ContainerDefinition, LogConfiguration, PortMapping, Protocol, SecretRef, VirtualNodeListener,
};
use carver_common::{Error, Result};

use crate::extension::ServiceExtension;
use crate::facade::ServiceFacade;
use crate::listener::{ListenerBinding, ServiceListener};
use crate::scope::PrivateScope;

/// Port the proxy listens on
pub const OIDC_PROXY_PORT: u16 = 80;

pub const OIDC_PROXY_IMAGE: &str = "evry/oidc-proxy:v1.3.0";

pub const OIDC_PROXY_CONTAINER_NAME: &str = "OidcHttpProxy";

const OIDC_PROXY_LOG_STREAM_PREFIX: &str = "Http2Proxy";

/// Client credentials given inline
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OidcPlaintextCredentials {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Clone, Debug, Default)]
pub struct OidcHttpProxyOptions {
    /// Port the application listens on behind the proxy
    pub container_port: u16,
    pub discovery_endpoint: String,
    /// Defaults to [`OIDC_PROXY_IMAGE`]
    pub image: Option<String>,
    pub plaintext_credentials: Option<OidcPlaintextCredentials>,
    /// Secrets Manager secret with `clientId` and `clientSecret` fields
    pub secret_credentials_arn: Option<String>,
}

/// Validated proxy settings, shared by the listener and the extension
#[derive(Clone, Debug)]
struct OidcProxyConfig {
    container_port: u16,
    image: String,
    environment: BTreeMap<String, String>,
    secrets: BTreeMap<String, SecretRef>,
}

impl OidcProxyConfig {
    fn from_options(options: OidcHttpProxyOptions) -> Result<Self> {
        if options.container_port == OIDC_PROXY_PORT {
            return Err(Error::validation_for_field(
                "containerPort",
                format!(
                    "cannot add an OIDC proxy on port {OIDC_PROXY_PORT} as it conflicts with the container port {}",
                    options.container_port
                ),
            ));
        }

        let mut environment = BTreeMap::from([
            ("PROXY_HOST".to_string(), "127.0.0.1".to_string()),
            ("PROXY_PORT".to_string(), options.container_port.to_string()),
            ("PROXY_PROTOCOL".to_string(), "http".to_string()),
            ("OID_DISCOVERY".to_string(), options.discovery_endpoint),
            ("OIDC_AUTH_METHOD".to_string(), "client_secret_post".to_string()),
            ("ADD_HOST_HEADER".to_string(), "true".to_string()),
        ]);
        let mut secrets = BTreeMap::new();

        match (options.plaintext_credentials, options.secret_credentials_arn) {
            (Some(_), Some(_)) => {
                return Err(Error::conflicting_credentials(
                    "provide either plaintext or secret credentials, not both",
                ))
            }
            (None, None) => {
                return Err(Error::conflicting_credentials(
                    "provide plaintext or secret credentials",
                ))
            }
            (Some(plaintext), None) => {
                environment.insert("OID_CLIENT_ID".to_string(), plaintext.client_id);
                environment.insert("OID_CLIENT_SECRET".to_string(), plaintext.client_secret);
            }
            (None, Some(secret_arn)) => {
                let fields = [
                    ("OID_CLIENT_ID", "clientId"),
                    ("OID_CLIENT_SECRET", "clientSecret"),
                ];
                for (key, field) in fields {
                    secrets.insert(
                        key.to_string(),
                        SecretRef::SecretsManager {
                            secret_arn: secret_arn.clone(),
                            field: Some(field.to_string()),
                        },
                    );
                }
            }
        }

        Ok(Self {
            container_port: options.container_port,
            image: options.image.unwrap_or_else(|| OIDC_PROXY_IMAGE.to_string()),
            environment,
            secrets,
        })
    }
}

/// Listener placing the application behind an OIDC proxy
#[derive(Clone, Debug)]
pub struct OidcHttpProxyListener {
    config: OidcProxyConfig,
}

impl OidcHttpProxyListener {
    pub fn new(options: OidcHttpProxyOptions) -> Result<Self> {
        Ok(Self {
            config: OidcProxyConfig::from_options(options)?,
        })
    }
}

impl ServiceListener for OidcHttpProxyListener {
    fn bind(&self, service: &ServiceFacade) -> Result<ListenerBinding> {
        service.add_service_extension(Rc::new(OidcHttpProxyExtension {
            config: self.config.clone(),
        }))?;
        Ok(ListenerBinding {
            container_port: self.config.container_port,
            protocol: Protocol::Tcp,
            mesh_listener: Some(VirtualNodeListener::http(OIDC_PROXY_PORT)),
        })
    }
}

/// Runs the OIDC proxy container in front of the application
#[derive(Clone, Debug)]
pub struct OidcHttpProxyExtension {
    config: OidcProxyConfig,
}

impl OidcHttpProxyExtension {
    pub fn new(options: OidcHttpProxyOptions) -> Result<Self> {
        Ok(Self {
            config: OidcProxyConfig::from_options(options)?,
        })
    }
}

impl ServiceExtension for OidcHttpProxyExtension {
    fn type_name(&self) -> &str {
        "OidcHttpProxyExtension"
    }

    fn register(&self, service: &ServiceFacade, _scope: &PrivateScope) -> Result<()> {
        let config = self.config.clone();
        service.on_workload_ready(move |workload| {
            let mut container = ContainerDefinition::new(OIDC_PROXY_CONTAINER_NAME, &config.image)
                .with_port_mapping(PortMapping::tcp(OIDC_PROXY_PORT))
                .with_env("OID_SESSION_NAME", workload.virtual_node.name());
            container.environment.extend(config.environment.clone());
            container.secrets = config.secrets.clone();
            container.logging = Some(LogConfiguration::aws_logs(OIDC_PROXY_LOG_STREAM_PREFIX));

            workload.task_definition.add_container(container).map(drop)
        })
    }
}
