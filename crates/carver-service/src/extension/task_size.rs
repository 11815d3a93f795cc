//! Task sizing

use std::rc::Rc;

use carver_common::Result;

use crate::extension::ServiceExtension;
use crate::facade::ServiceFacade;
use crate::scope::PrivateScope;

/// CPU units and memory for the service's tasks
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TaskSizeOptions {
    pub cpu: u32,
    pub memory_limit_mib: u32,
}

#[derive(Clone, Copy, Debug)]
pub struct TaskSizeExtension {
    size: TaskSizeOptions,
}

impl ServiceExtension for TaskSizeExtension {
    fn type_name(&self) -> &str {
        "TaskSizeExtension"
    }

    fn register(&self, service: &ServiceFacade, _scope: &PrivateScope) -> Result<()> {
        let size = self.size;
        service.add_task_definition_props_filter(move |mut props| {
            props.cpu = size.cpu;
            props.memory_limit_mib = size.memory_limit_mib;
            props
        });
        Ok(())
    }
}

pub fn task_size(size: TaskSizeOptions) -> Rc<dyn ServiceExtension> {
    Rc::new(TaskSizeExtension { size })
}
