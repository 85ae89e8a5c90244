//! Search-K8s: reconciliation core of a Kubernetes operator for managed
//! search clusters
//!
//! This crate provides the SearchCluster custom resource, a generic
//! get-or-create-or-update reconciler, StatefulSet fleet tracking and the
//! cluster's HTTP service exposure.

pub mod controller;
pub mod crd;
pub mod error;

pub use crate::error::{Error, Result};
