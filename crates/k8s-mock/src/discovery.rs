//! Mock Kubernetes API discovery types.

use std::collections::HashMap;

/// Discovery mode for the mock server.
#[derive(Clone, Copy, Default)]
pub enum DiscoveryMode {
	/// Support aggregated discovery (APIGroupDiscoveryList).
	#[default]
	Aggregated,
	/// Return 406 for aggregated discovery, forcing fallback to legacy endpoints.
	Legacy,
}

/// Pre-configured discovery responses.
pub struct MockDiscovery {
	pub core_resources: Vec<MockApiResource>,
	pub group_resources: HashMap<String, Vec<MockApiResource>>,
}

impl Default for MockDiscovery {
	fn default() -> Self {
		Self {
			core_resources: vec![
				MockApiResource::namespaced("configmaps", "ConfigMap"),
				MockApiResource::namespaced("secrets", "Secret"),
				MockApiResource::namespaced("services", "Service"),
				MockApiResource::namespaced("pods", "Pod"),
				MockApiResource::namespaced("persistentvolumeclaims", "PersistentVolumeClaim"),
				MockApiResource::cluster_scoped("persistentvolumes", "PersistentVolume"),
				MockApiResource::cluster_scoped("namespaces", "Namespace"),
			],
			group_resources: HashMap::from([(
				"apps/v1".to_string(),
				vec![
					MockApiResource::namespaced("deployments", "Deployment"),
					MockApiResource::namespaced("replicasets", "ReplicaSet"),
					MockApiResource::namespaced("statefulsets", "StatefulSet"),
					MockApiResource::namespaced("daemonsets", "DaemonSet"),
				],
			)]),
		}
	}
}

impl MockDiscovery {
	/// Resources served under `api_version` (`v1` for the core group).
	fn served(&self, api_version: &str) -> &[MockApiResource] {
		if api_version == "v1" {
			&self.core_resources
		} else {
			self.group_resources
				.get(api_version)
				.map_or(&[][..], Vec::as_slice)
		}
	}

	/// Look up a resource by its plural name.
	pub fn by_plural(&self, api_version: &str, plural: &str) -> Option<&MockApiResource> {
		self.served(api_version).iter().find(|r| r.name == plural)
	}

	/// Look up a resource by kind.
	pub fn by_kind(&self, api_version: &str, kind: &str) -> Option<&MockApiResource> {
		self.served(api_version).iter().find(|r| r.kind == kind)
	}
}

/// A mock API resource definition.
pub struct MockApiResource {
	pub name: String,
	pub kind: String,
	pub namespaced: bool,
	pub verbs: Vec<String>,
}

impl MockApiResource {
	const VERBS: [&str; 7] = ["create", "delete", "get", "list", "patch", "update", "watch"];

	fn new(name: &str, kind: &str, namespaced: bool) -> Self {
		Self {
			name: name.to_string(),
			kind: kind.to_string(),
			namespaced,
			verbs: Self::VERBS.iter().map(|v| (*v).to_string()).collect(),
		}
	}

	pub fn namespaced(name: &str, kind: &str) -> Self {
		Self::new(name, kind, true)
	}

	pub fn cluster_scoped(name: &str, kind: &str) -> Self {
		Self::new(name, kind, false)
	}
}
