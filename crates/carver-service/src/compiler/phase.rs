//! Construction phases
//!
//! The sequence is linear. Each phase is entered once, in declaration order,
//! and any failure abandons the service.

use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConstructionPhase {
    Created,
    ExtensionsRegistering,
    ListenersBinding,
    TaskDefFiltering,
    ServiceBuilding,
    WorkloadPublishing,
    SidecarAttaching,
    ConnectionsPublishing,
    Done,
}

impl ConstructionPhase {
    /// The phase entered after this one
    pub fn next(self) -> Option<Self> {
        use ConstructionPhase::*;
        match self {
            Created => Some(ExtensionsRegistering),
            ExtensionsRegistering => Some(ListenersBinding),
            ListenersBinding => Some(TaskDefFiltering),
            TaskDefFiltering => Some(ServiceBuilding),
            ServiceBuilding => Some(WorkloadPublishing),
            WorkloadPublishing => Some(SidecarAttaching),
            SidecarAttaching => Some(ConnectionsPublishing),
            ConnectionsPublishing => Some(Done),
            Done => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::ExtensionsRegistering => "extensions-registering",
            Self::ListenersBinding => "listeners-binding",
            Self::TaskDefFiltering => "task-def-filtering",
            Self::ServiceBuilding => "service-building",
            Self::WorkloadPublishing => "workload-publishing",
            Self::SidecarAttaching => "sidecar-attaching",
            Self::ConnectionsPublishing => "connections-publishing",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for ConstructionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
