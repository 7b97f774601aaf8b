//! Applying manifest streams to a cluster.
//!
//! Objects are applied either with server-side apply or with client-side
//! strategic merge patches that fall back to merge patches and creates.

use std::{collections::HashSet, future::Future};

use bon::Builder;
use kube::{
	api::{Api, DynamicObject, Patch, PatchParams, PostParams},
	discovery::ApiResource,
	Client,
};
use thiserror::Error;
use tracing::instrument;

use super::{
	discovery::{ApiResourceCache, DiscoveredResource, DiscoveryError},
	ResourceScope,
};
use crate::{
	config::DEFAULT_FIELD_MANAGER,
	manifest::{decode_documents, DecodeError, Manifest},
};

#[derive(Debug, Error)]
pub enum ApplyError {
	#[error("manifest missing apiVersion or kind")]
	MissingApiVersionOrKind,

	#[error("manifest missing metadata.name")]
	MissingName,

	#[error("unknown resource type: {api_version}/{kind}")]
	UnknownResourceType { api_version: String, kind: String },

	#[error("building API resource cache")]
	BuildingApiCache(#[source] Box<DiscoveryError>),

	#[error("applying {kind}/{name}")]
	ApplyFailed {
		kind: String,
		name: String,
		#[source]
		source: Box<kube::Error>,
	},

	#[error("converting manifest to DynamicObject")]
	ManifestConversion(#[source] serde_json::Error),

	#[error("decoding manifest stream")]
	Decode(#[from] DecodeError),
}

/// Something that can apply a serialized manifest stream to a cluster.
pub trait Applier {
	fn apply(&self, payload: &[u8]) -> impl Future<Output = Result<(), ApplyError>> + Send;
}

#[derive(Clone, Builder)]
pub struct ApplyEngine {
	client: Client,
	/// Namespace for namespaced objects that carry none.
	#[builder(into)]
	default_namespace: String,
	#[builder(default = true)]
	server_side: bool,
	#[builder(default)]
	force: bool,
	#[builder(into, default = DEFAULT_FIELD_MANAGER.to_string())]
	field_manager: String,
}

impl Applier for ApplyEngine {
	#[instrument(skip_all, fields(bytes = payload.len(), server_side = self.server_side))]
	async fn apply(&self, payload: &[u8]) -> Result<(), ApplyError> {
		let manifests = decode_documents(payload)?;
		if manifests.is_empty() {
			return Ok(());
		}

		let mut required_keys = HashSet::new();
		for manifest in &manifests {
			required_keys.insert(manifest.gvk().ok_or(ApplyError::MissingApiVersionOrKind)?);
		}
		let cache = ApiResourceCache::build(&self.client, required_keys, false)
			.await
			.map_err(|e| ApplyError::BuildingApiCache(Box::new(e)))?;

		for manifest in &manifests {
			self.apply_manifest(&cache, manifest).await?;
		}
		Ok(())
	}
}

impl ApplyEngine {
	/// Apply a single manifest whose type is present in `cache`.
	#[instrument(skip_all, fields(
		kind = manifest.kind().unwrap_or("unknown"),
		name = manifest.name().unwrap_or("unknown"),
	))]
	pub async fn apply_manifest(
		&self,
		cache: &ApiResourceCache,
		manifest: &Manifest,
	) -> Result<(), ApplyError> {
		let gvk = manifest.gvk().ok_or(ApplyError::MissingApiVersionOrKind)?;
		let name = manifest.name().ok_or(ApplyError::MissingName)?.to_string();

		let discovered = cache
			.lookup(&gvk)
			.ok_or_else(|| ApplyError::UnknownResourceType {
				api_version: gvk.api_version(),
				kind: gvk.kind.clone(),
			})?;

		let namespace = self.namespace_for(manifest, discovered);
		let api = self.dynamic_api(&discovered.api_resource, namespace.as_deref());
		let body = ensure_annotations(manifest.as_value());

		let failed = |source: kube::Error| ApplyError::ApplyFailed {
			kind: gvk.kind.clone(),
			name: name.clone(),
			source: Box::new(source),
		};

		if self.server_side {
			let params = PatchParams {
				field_manager: Some(self.field_manager.clone()),
				force: self.force,
				..Default::default()
			};
			api.patch(&name, &params, &Patch::Apply(&body))
				.await
				.map_err(failed)?;
			return Ok(());
		}

		let params = PatchParams::default();
		let result = api.patch(&name, &params, &Patch::Strategic(&body)).await;
		match result {
			Ok(_) => {}
			// Custom resources do not support strategic merge
			Err(kube::Error::Api(ref err)) if err.code == 415 => {
				tracing::debug!("strategic merge unsupported, using merge patch");
				api.patch(&name, &params, &Patch::Merge(&body))
					.await
					.map_err(failed)?;
			}
			Err(kube::Error::Api(ref err)) if err.code == 404 => {
				tracing::debug!("object does not exist, creating");
				let obj: DynamicObject =
					serde_json::from_value(body).map_err(ApplyError::ManifestConversion)?;
				api.create(&PostParams::default(), &obj)
					.await
					.map_err(failed)?;
			}
			Err(e) => return Err(failed(e)),
		}
		Ok(())
	}

	fn namespace_for(&self, manifest: &Manifest, discovered: &DiscoveredResource) -> Option<String> {
		match discovered.scope {
			ResourceScope::Namespaced => Some(
				manifest
					.namespace()
					.filter(|ns| !ns.is_empty())
					.unwrap_or(&self.default_namespace)
					.to_string(),
			),
			ResourceScope::ClusterWide => None,
		}
	}

	fn dynamic_api(&self, ar: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
		match namespace {
			Some(ns) => Api::namespaced_with(self.client.clone(), ns, ar),
			None => Api::all_with(self.client.clone(), ar),
		}
	}
}

/// kubectl always sends `metadata.annotations`; some admission webhooks rely on it.
fn ensure_annotations(manifest: &serde_json::Value) -> serde_json::Value {
	let mut manifest = manifest.clone();
	if let Some(serde_json::Value::Object(metadata)) = manifest.get_mut("metadata") {
		metadata
			.entry("annotations")
			.or_insert_with(|| serde_json::json!({}));
	}
	manifest
}
