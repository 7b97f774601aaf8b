//! Kubernetes REST path handling.

/// A request path split into its REST components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourcePath {
	/// `v1` for the core group, `group/version` otherwise.
	pub api_version: String,
	pub namespace: Option<String>,
	pub plural: String,
	pub name: Option<String>,
}

impl ResourcePath {
	/// Parse `/api/v1/...` and `/apis/<group>/<version>/...` paths.
	///
	/// Examples:
	/// - `/api/v1/namespaces` -> namespaces collection
	/// - `/api/v1/namespaces/demo` -> the `demo` namespace object
	/// - `/apis/apps/v1/namespaces/demo/deployments/web` -> a namespaced object
	/// - `/apis/apps/v1/deployments` -> deployments across all namespaces
	pub fn parse(path: &str) -> Option<Self> {
		let path = path.trim_end_matches('/');
		let (api_version, rest) = if let Some(rest) = path.strip_prefix("/api/v1") {
			("v1".to_string(), rest)
		} else {
			let rest = path.strip_prefix("/apis/")?;
			let mut parts = rest.splitn(3, '/');
			let group = parts.next()?;
			let version = parts.next()?;
			let rest = parts.next().map_or("", |r| r);
			(format!("{group}/{version}"), rest)
		};

		let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
		let (namespace, plural, name) = match segments.as_slice() {
			[plural] => (None, *plural, None),
			[plural, name] => (None, *plural, Some(*name)),
			["namespaces", ns, plural] => (Some(*ns), *plural, None),
			["namespaces", ns, plural, name, ..] => (Some(*ns), *plural, Some(*name)),
			_ => return None,
		};

		Some(Self {
			api_version,
			namespace: namespace.map(str::to_string),
			plural: plural.to_string(),
			name: name.map(str::to_string),
		})
	}

	fn prefix(&self) -> String {
		if self.api_version.contains('/') {
			format!("/apis/{}", self.api_version)
		} else {
			format!("/api/{}", self.api_version)
		}
	}

	/// The collection this path addresses or belongs to.
	pub fn collection(&self) -> String {
		match &self.namespace {
			Some(ns) => format!("{}/namespaces/{ns}/{}", self.prefix(), self.plural),
			None => format!("{}/{}", self.prefix(), self.plural),
		}
	}
}

/// The collection a namespaced object lives in.
pub fn collection_path(api_version: &str, namespace: Option<&str>, plural: &str) -> String {
	ResourcePath {
		api_version: api_version.to_string(),
		namespace: namespace.map(str::to_string),
		plural: plural.to_string(),
		name: None,
	}
	.collection()
}

/// Extract a cluster-wide path from a namespaced collection path.
///
/// Examples:
/// - `/api/v1/namespaces/default/configmaps` -> Some(`/api/v1/configmaps`)
/// - `/apis/apps/v1/namespaces/default/deployments` -> Some(`/apis/apps/v1/deployments`)
/// - `/api/v1/namespaces` -> None (already cluster-wide for namespaces)
pub fn extract_cluster_wide_path(path: &str) -> Option<String> {
	let ns_idx = path.find("/namespaces/")?;
	let before_ns = &path[..ns_idx];
	let after_ns = &path[ns_idx + "/namespaces/".len()..];
	let slash_idx = after_ns.find('/')?;
	Some(format!("{}{}", before_ns, &after_ns[slash_idx..]))
}

/// Whether a stored collection path belongs to namespace `ns`.
pub fn in_namespace(collection: &str, ns: &str) -> bool {
	collection.contains(&format!("/namespaces/{ns}/"))
}
