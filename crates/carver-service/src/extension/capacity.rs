//! Capacity provider selection

use std::rc::Rc;

use carver_common::resources::{CapacityProvider, CapacityProviderStrategy};
use carver_common::Result;

use crate::extension::ServiceExtension;
use crate::facade::ServiceFacade;
use crate::scope::PrivateScope;

/// Replaces the service's capacity provider strategies
#[derive(Clone, Debug)]
pub struct CapacityProviderStrategiesExtension {
    strategies: Vec<CapacityProviderStrategy>,
}

impl ServiceExtension for CapacityProviderStrategiesExtension {
    fn type_name(&self) -> &str {
        "UseSpot"
    }

    fn register(&self, service: &ServiceFacade, _scope: &PrivateScope) -> Result<()> {
        let strategies = self.strategies.clone();
        service.add_service_props_filter(move |mut props| {
            props.capacity_provider_strategies = strategies.clone();
            props
        });
        Ok(())
    }
}

pub fn capacity_provider_strategies(
    strategies: Vec<CapacityProviderStrategy>,
) -> Rc<dyn ServiceExtension> {
    Rc::new(CapacityProviderStrategiesExtension { strategies })
}

/// Run mostly on spot capacity, keeping a trickle on standard capacity.
pub fn spot_capacity() -> Rc<dyn ServiceExtension> {
    capacity_provider_strategies(vec![
        CapacityProviderStrategy::new(CapacityProvider::Spot, 100),
        CapacityProviderStrategy::new(CapacityProvider::Standard, 1),
    ])
}
