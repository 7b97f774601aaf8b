//! API resource type descriptors.

use std::fmt;

use kube::{core::GroupVersionKind, discovery::ApiResource};
use serde::{Deserialize, Serialize};

use super::ResourceScope;

/// Identifies a kind of cluster object by group, version, plural resource name and scope.
///
/// Descriptors are plain values: they are built once and then only read, both as
/// lookup keys and as request parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceDescriptor {
	group: String,
	version: String,
	resource: String,
	namespaced: bool,
}

impl ResourceDescriptor {
	pub fn new(
		group: impl Into<String>,
		version: impl Into<String>,
		resource: impl Into<String>,
		namespaced: bool,
	) -> Self {
		Self {
			group: group.into(),
			version: version.into(),
			resource: resource.into(),
			namespaced,
		}
	}

	/// API group, empty for the core group.
	pub fn group(&self) -> &str {
		&self.group
	}

	pub fn version(&self) -> &str {
		&self.version
	}

	/// Plural resource name, as used in request paths.
	pub fn resource(&self) -> &str {
		&self.resource
	}

	pub fn namespaced(&self) -> bool {
		self.namespaced
	}

	pub fn scope(&self) -> ResourceScope {
		if self.namespaced {
			ResourceScope::Namespaced
		} else {
			ResourceScope::ClusterWide
		}
	}

	/// `v1` for the core group, `group/version` otherwise.
	pub fn api_version(&self) -> String {
		if self.group.is_empty() {
			self.version.clone()
		} else {
			format!("{}/{}", self.group, self.version)
		}
	}

	/// Build the kube `ApiResource` used to address this type.
	///
	/// Descriptors do not carry a kind, so the resulting resource only knows the
	/// request path components. That is all list requests need.
	pub fn api_resource(&self) -> ApiResource {
		let gvk = GroupVersionKind::gvk(&self.group, &self.version, "");
		ApiResource::from_gvk_with_plural(&gvk, &self.resource)
	}

	pub fn deployments() -> Self {
		Self::new("apps", "v1", "deployments", true)
	}

	pub fn services() -> Self {
		Self::new("", "v1", "services", true)
	}

	pub fn pods() -> Self {
		Self::new("", "v1", "pods", true)
	}

	pub fn persistent_volume_claims() -> Self {
		Self::new("", "v1", "persistentvolumeclaims", true)
	}

	pub fn persistent_volumes() -> Self {
		Self::new("", "v1", "persistentvolumes", false)
	}

	pub fn namespaces() -> Self {
		Self::new("", "v1", "namespaces", false)
	}
}

impl fmt::Display for ResourceDescriptor {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}.{}", self.resource, self.version)?;
		if !self.group.is_empty() {
			write!(f, ".{}", self.group)?;
		}
		Ok(())
	}
}
