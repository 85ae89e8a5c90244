//! Custom Resource Definitions for search-k8s
//!
//! This module defines the Kubernetes CRDs for managing search clusters.

mod search_cluster;
pub mod types;


pub use search_cluster::{SearchCluster, SearchClusterSpec, SearchClusterStatus, DEFAULT_IMAGE};
pub use types::*;
