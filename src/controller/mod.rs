//! Controller module for SearchCluster reconciliation
//! This module contains the generic resource reconciler, fleet tracking of
//! node set StatefulSets, service exposure and the main controller loop.

pub mod client;
pub mod conditions;
pub mod generic;
pub mod label;
#[cfg(test)]
mod mock_platform;
mod reconciler;
pub mod registry;
pub mod resources;
#[cfg(test)]
mod resources_test;
pub mod services;
pub mod sset;
pub mod version;

pub use client::{KubeClient, ManagedResource, PlatformClient};
pub use generic::{reconcile_resource, set_controller_reference, Owner, ReconcileOutcome, ReconcileParams};
pub use reconciler::{apply_cluster, run_controller, ControllerState};
pub use registry::{default_registry, ControllerRegistry, ROLE_ALL, ROLE_NAMESPACE};
pub use resources::TemplateChange;
pub use sset::StatefulSetList;
pub use version::Version;
