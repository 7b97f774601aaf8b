//! API resource discovery.
//!
//! Maps manifest types (apiVersion + kind) to the `ApiResource` and scope needed
//! to address them, and resolves user-facing resource names (`deployments`,
//! `deployments.apps`) to [`ResourceDescriptor`]s.

use std::{
	collections::{HashMap, HashSet},
	sync::Arc,
};

use kube::{
	core::GroupVersionKind,
	discovery::{oneshot::pinned_kind, ApiCapabilities, ApiResource, Scope},
	Client, Discovery,
};
use thiserror::Error;
use tokio::{sync::Semaphore, task::JoinSet};
use tracing::instrument;

use super::{descriptor::ResourceDescriptor, ResourceScope};

#[derive(Debug, Error)]
pub enum DiscoveryError {
	#[error("full API discovery failed")]
	FullDiscovery(#[source] kube::Error),

	#[error("discovery task panicked")]
	TaskPanicked(#[source] tokio::task::JoinError),

	#[error("failed to discover resource {api_version}/{kind}")]
	ResourceDiscovery {
		api_version: String,
		kind: String,
		#[source]
		source: kube::Error,
	},
}

/// Split `apps/v1` into group and version; a bare version belongs to the core group.
pub fn split_api_version(api_version: &str) -> (&str, &str) {
	api_version.split_once('/').unwrap_or(("", api_version))
}

/// Extract the type of a manifest.
pub fn gvk_from_manifest(manifest: &serde_json::Value) -> Option<GroupVersionKind> {
	let api_version = manifest.get("apiVersion")?.as_str()?;
	let kind = manifest.get("kind")?.as_str()?;
	let (group, version) = split_api_version(api_version);
	Some(GroupVersionKind::gvk(group, version, kind))
}

/// Kubernetes version ordering: GA above beta above alpha, then by number.
///
/// `v2` > `v1` > `v1beta2` > `v1beta1` > `v1alpha1`. Unparsable versions sort last.
fn version_priority(version: &str) -> (u8, u32, u32) {
	let Some(rest) = version.strip_prefix('v') else {
		return (0, 0, 0);
	};
	let split = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
	let (major, suffix) = rest.split_at(split);
	let Ok(major) = major.parse() else {
		return (0, 0, 0);
	};
	let (stability, minor) = if suffix.is_empty() {
		(3, 0)
	} else if let Some(n) = suffix.strip_prefix("beta") {
		(2, n.parse().unwrap_or(0))
	} else if let Some(n) = suffix.strip_prefix("alpha") {
		(1, n.parse().unwrap_or(0))
	} else {
		return (0, 0, 0);
	};
	(stability, major, minor)
}

fn scope_of(caps: &ApiCapabilities) -> ResourceScope {
	match caps.scope {
		Scope::Namespaced => ResourceScope::Namespaced,
		Scope::Cluster => ResourceScope::ClusterWide,
	}
}

/// A discovered resource type.
#[derive(Debug, Clone)]
pub struct DiscoveredResource {
	pub api_resource: ApiResource,
	pub scope: ResourceScope,
	pub capabilities: ApiCapabilities,
}

impl DiscoveredResource {
	pub fn descriptor(&self) -> ResourceDescriptor {
		ResourceDescriptor::new(
			&self.api_resource.group,
			&self.api_resource.version,
			&self.api_resource.plural,
			self.scope == ResourceScope::Namespaced,
		)
	}
}

/// Discovery results, indexed by type.
#[derive(Clone, Default)]
pub struct ApiResourceCache {
	resources: HashMap<GroupVersionKind, DiscoveredResource>,
	/// `(group, plural)` of every resource in its group's preferred version.
	preferred: HashMap<(String, String), GroupVersionKind>,
}

impl ApiResourceCache {
	const MAX_CONCURRENT_DISCOVERIES: usize = 8;

	/// Query the cluster's discovery API.
	///
	/// Aggregated discovery is tried first. Clusters without it get either a full
	/// walk of every group (`need_full_discovery`) or targeted lookups of
	/// `required_keys` only.
	#[instrument(skip(client, required_keys), fields(key_count = required_keys.len(), need_full = need_full_discovery))]
	pub async fn build(
		client: &Client,
		required_keys: HashSet<GroupVersionKind>,
		need_full_discovery: bool,
	) -> Result<Self, DiscoveryError> {
		match Discovery::new(client.clone()).run_aggregated().await {
			Ok(discovery) => {
				tracing::debug!("using aggregated discovery");
				Ok(Self::from_discovery(&discovery))
			}
			Err(e) => {
				tracing::debug!(error = %e, "aggregated discovery not available");
				if need_full_discovery {
					let discovery = Discovery::new(client.clone())
						.run()
						.await
						.map_err(DiscoveryError::FullDiscovery)?;
					Ok(Self::from_discovery(&discovery))
				} else {
					Self::build_lazy(client, required_keys).await
				}
			}
		}
	}

	fn from_discovery(discovery: &Discovery) -> Self {
		let mut cache = Self::default();

		for group in discovery.groups() {
			let preferred = group.preferred_version_or_latest().to_string();
			// Older versions stay addressable for manifests that still use them
			for ver in group.versions() {
				for (ar, caps) in group.versioned_resources(ver) {
					let gvk = GroupVersionKind::gvk(&ar.group, &ar.version, &ar.kind);
					if ver == preferred {
						cache
							.preferred
							.insert((ar.group.clone(), ar.plural.clone()), gvk.clone());
					}
					let scope = scope_of(&caps);
					cache.resources.insert(
						gvk,
						DiscoveredResource {
							api_resource: ar,
							scope,
							capabilities: caps,
						},
					);
				}
			}
		}

		cache
	}

	#[instrument(skip(client, keys), fields(key_count = keys.len()))]
	async fn build_lazy(
		client: &Client,
		keys: HashSet<GroupVersionKind>,
	) -> Result<Self, DiscoveryError> {
		let semaphore = Arc::new(Semaphore::new(Self::MAX_CONCURRENT_DISCOVERIES));
		let mut join_set = JoinSet::new();

		for gvk in keys {
			let client = client.clone();
			let semaphore = semaphore.clone();

			join_set.spawn(async move {
				// The semaphore is never closed
				let _permit = semaphore.acquire_owned().await.ok();
				tracing::debug!(api_version = %gvk.api_version(), kind = %gvk.kind, "discovering resource");
				let result = pinned_kind(&client, &gvk).await;
				(gvk, result)
			});
		}

		let mut cache = Self::default();
		let mut first_error = None;

		while let Some(joined) = join_set.join_next().await {
			match joined.map_err(DiscoveryError::TaskPanicked)? {
				(gvk, Ok((api_resource, capabilities))) => {
					cache.resources.insert(
						gvk,
						DiscoveredResource {
							api_resource,
							scope: scope_of(&capabilities),
							capabilities,
						},
					);
				}
				(gvk, Err(e)) => {
					tracing::warn!(api_version = %gvk.api_version(), kind = %gvk.kind, error = %e, "failed to discover resource");
					first_error.get_or_insert((gvk, e));
				}
			}
		}

		// Partial results are still useful; only a total failure is an error
		match first_error {
			Some((gvk, source)) if cache.resources.is_empty() => {
				Err(DiscoveryError::ResourceDiscovery {
					api_version: gvk.api_version(),
					kind: gvk.kind,
					source,
				})
			}
			_ => Ok(cache),
		}
	}

	pub fn lookup(&self, gvk: &GroupVersionKind) -> Option<&DiscoveredResource> {
		self.resources.get(gvk)
	}

	/// Resolve `plural` or `plural.group` to a discovered resource.
	///
	/// The preferred version of the group wins; `pods` means the core group.
	fn resolve_resource(&self, name: &str) -> Option<&DiscoveredResource> {
		let (plural, group) = name.split_once('.').unwrap_or((name, ""));
		let key = (group.to_string(), plural.to_string());

		if let Some(found) = self.preferred.get(&key).and_then(|gvk| self.lookup(gvk)) {
			return Some(found);
		}

		// Lazily built caches have no preference data
		self.resources
			.values()
			.filter(|r| r.api_resource.group == group && r.api_resource.plural == plural)
			.max_by_key(|r| version_priority(&r.api_resource.version))
	}

	pub fn resolve(&self, name: &str) -> Option<ResourceDescriptor> {
		self.resolve_resource(name).map(DiscoveredResource::descriptor)
	}
}
