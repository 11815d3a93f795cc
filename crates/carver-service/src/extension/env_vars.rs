//! Static environment variables

use std::rc::Rc;

use carver_common::Result;

use crate::extension::ServiceExtension;
use crate::facade::{EnvVars, ServiceFacade};
use crate::scope::PrivateScope;

/// Publishes a fixed set of environment variables
#[derive(Clone, Debug)]
pub struct EnvVarsExtension {
    vars: EnvVars,
}

impl EnvVarsExtension {
    pub fn new(vars: EnvVars) -> Self {
        Self { vars }
    }
}

impl ServiceExtension for EnvVarsExtension {
    fn type_name(&self) -> &str {
        "EnvVarsExtension"
    }

    fn register(&self, service: &ServiceFacade, _scope: &PrivateScope) -> Result<()> {
        service.add_env_vars(self.vars.clone())
    }
}

pub fn env_vars<I, K, V>(vars: I) -> Rc<dyn ServiceExtension>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    Rc::new(EnvVarsExtension::new(
        vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
    ))
}
