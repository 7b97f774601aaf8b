//! Native Kubernetes API access through kube-rs.

pub mod apply;
pub mod client;
pub mod descriptor;
pub mod discovery;
pub mod list;

pub use descriptor::ResourceDescriptor;

/// Kubernetes API resource scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceScope {
	/// Resource is namespaced (e.g., Deployment, ConfigMap).
	Namespaced,

	/// Resource is cluster-wide (e.g., Namespace, PersistentVolume).
	ClusterWide,
}
