//! HTTP-based mock Kubernetes server using wiremock.
//!
//! This provides a real HTTP server that can be used with actual kubeconfig-based
//! connections. Objects live in a shared in-memory map keyed by collection path
//! and name; list requests honor `limit` and `continue`.

use std::{
	collections::{HashMap, HashSet},
	sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use bon::Builder;
use kube::config::{
	AuthInfo, Cluster, Context, Kubeconfig, NamedAuthInfo, NamedCluster, NamedContext,
};
use serde_json::{json, Value};
use tracing::{debug, trace};
use wiremock::{
	matchers::{header_regex, method, path, path_regex},
	Mock, MockServer, Request, ResponseTemplate,
};

use super::{
	discovery::{DiscoveryMode, MockApiResource, MockDiscovery},
	helpers::{merge_json, namespace_and_name, status_failure, strip_strategic_merge_directives},
	paths::{collection_path, extract_cluster_wide_path, in_namespace, ResourcePath},
};

/// Type alias for the shared mutable resources map.
pub type SharedResources = Arc<RwLock<HashMap<(String, String), Value>>>;

const APPLY_PATCH_CONTENT_TYPE: &str = "application/apply-patch+yaml";

/// A mock Kubernetes server exposed over HTTP.
#[derive(Builder)]
pub struct HttpMockK8sServer {
	#[builder(default)]
	discovery_mode: DiscoveryMode,
	/// Resources to serve as raw manifests. The server derives API paths from
	/// apiVersion/kind using the discovery data.
	#[builder(default)]
	resources: Vec<Value>,
	/// Collection paths (e.g. `/apis/apps/v1/namespaces/demo/deployments`) that
	/// answer every request with 403 Forbidden.
	#[builder(default)]
	forbidden: Vec<String>,
}

/// A running HTTP mock server instance.
pub struct RunningHttpMockK8sServer {
	server: MockServer,
	resources: SharedResources,
}

impl HttpMockK8sServer {
	/// Start the mock server with all configured resources.
	pub async fn start(self) -> RunningHttpMockK8sServer {
		let server = MockServer::start().await;
		let discovery = MockDiscovery::default();

		debug!(uri = %server.uri(), "Started mock K8s server");

		let mut resources: HashMap<(String, String), Value> = HashMap::new();
		for manifest in self.resources {
			if let Some((api_path, name)) = api_path_for_manifest(&manifest, &discovery) {
				trace!(api_path = %api_path, name = %name, "Registered resource");
				resources.insert((api_path, name), manifest);
			}
		}

		let ns_key = ("/api/v1/namespaces".to_string(), "default".to_string());
		resources.entry(ns_key).or_insert_with(|| {
			json!({
				"apiVersion": "v1",
				"kind": "Namespace",
				"metadata": { "name": "default" }
			})
		});

		let shared_resources = Arc::new(RwLock::new(resources));

		mount_version(&server).await;
		mount_discovery(&server, &discovery, self.discovery_mode).await;

		let state = State {
			discovery: Arc::new(discovery),
			resources: Arc::clone(&shared_resources),
			forbidden: Arc::new(self.forbidden.into_iter().collect()),
		};
		mount_resources(&server, &state).await;

		RunningHttpMockK8sServer {
			server,
			resources: shared_resources,
		}
	}
}

/// Derive the collection path and name for a manifest using discovery data.
fn api_path_for_manifest(manifest: &Value, discovery: &MockDiscovery) -> Option<(String, String)> {
	let api_version = manifest.get("apiVersion")?.as_str()?;
	let kind = manifest.get("kind")?.as_str()?;
	let name = manifest.pointer("/metadata/name")?.as_str()?.to_string();
	let resource = discovery.by_kind(api_version, kind)?;

	let namespace = resource.namespaced.then(|| {
		manifest
			.pointer("/metadata/namespace")
			.and_then(Value::as_str)
			.unwrap_or("default")
	});

	Some((collection_path(api_version, namespace, &resource.name), name))
}

impl RunningHttpMockK8sServer {
	/// Get the server's URI (e.g., "http://127.0.0.1:12345").
	pub fn uri(&self) -> String {
		self.server.uri()
	}

	/// Create a Kubeconfig pointing to this mock server.
	pub fn kubeconfig(&self) -> Kubeconfig {
		self.kubeconfig_with_context("mock-context")
	}

	/// Create a Kubeconfig pointing to this mock server with a custom context name.
	pub fn kubeconfig_with_context(&self, context_name: &str) -> Kubeconfig {
		let cluster_name = "mock-cluster";
		let user_name = "mock-user";

		Kubeconfig {
			clusters: vec![NamedCluster {
				name: cluster_name.to_string(),
				cluster: Some(Cluster {
					server: Some(self.uri()),
					insecure_skip_tls_verify: Some(true),
					..Default::default()
				}),
			}],
			contexts: vec![NamedContext {
				name: context_name.to_string(),
				context: Some(Context {
					cluster: cluster_name.to_string(),
					user: Some(user_name.to_string()),
					namespace: Some("default".to_string()),
					..Default::default()
				}),
			}],
			auth_infos: vec![NamedAuthInfo {
				name: user_name.to_string(),
				auth_info: Some(AuthInfo::default()),
			}],
			current_context: Some(context_name.to_string()),
			..Default::default()
		}
	}

	/// The stored object `name` in collection `api_path`.
	pub fn resource(&self, api_path: &str, name: &str) -> Option<Value> {
		self.resources
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.get(&(api_path.to_string(), name.to_string()))
			.cloned()
	}

	/// Number of objects stored in collection `api_path`.
	pub fn count(&self, api_path: &str) -> usize {
		self.resources
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.keys()
			.filter(|(p, _)| p == api_path)
			.count()
	}

	/// Requests received so far with the given method and exact path.
	pub async fn requests(&self, http_method: &str, request_path: &str) -> Vec<Request> {
		self.server
			.received_requests()
			.await
			.unwrap_or_default()
			.into_iter()
			.filter(|r| r.method.as_str() == http_method && r.url.path() == request_path)
			.collect()
	}
}

/// Everything the resource handlers share.
#[derive(Clone)]
struct State {
	discovery: Arc<MockDiscovery>,
	resources: SharedResources,
	forbidden: Arc<HashSet<String>>,
}

fn respond(code: u16, body: Value) -> ResponseTemplate {
	ResponseTemplate::new(code).set_body_json(body)
}

fn not_found(message: &str) -> ResponseTemplate {
	respond(404, status_failure(404, "NotFound", message))
}

fn query_param(req: &Request, key: &str) -> Option<String> {
	req.url
		.query_pairs()
		.find(|(k, _)| k == key)
		.map(|(_, v)| v.into_owned())
}

impl State {
	fn read(&self) -> RwLockReadGuard<'_, HashMap<(String, String), Value>> {
		self.resources.read().unwrap_or_else(PoisonError::into_inner)
	}

	fn write(&self) -> RwLockWriteGuard<'_, HashMap<(String, String), Value>> {
		self.resources.write().unwrap_or_else(PoisonError::into_inner)
	}

	/// Resolve a request to a served resource type, or the error response to send.
	fn route(&self, req: &Request) -> Result<(ResourcePath, &MockApiResource), ResponseTemplate> {
		let parsed = ResourcePath::parse(req.url.path())
			.ok_or_else(|| not_found("the server could not find the requested resource"))?;
		let resource = self
			.discovery
			.by_plural(&parsed.api_version, &parsed.plural)
			.ok_or_else(|| not_found("the server could not find the requested resource"))?;

		let collection = parsed.collection();
		if self.forbidden.contains(&collection) {
			let message = format!("{} is forbidden: User cannot access {collection}", parsed.plural);
			return Err(respond(403, status_failure(403, "Forbidden", &message)));
		}
		Ok((parsed, resource))
	}

	fn handle_get(&self, req: &Request) -> ResponseTemplate {
		let (parsed, resource) = match self.route(req) {
			Ok(routed) => routed,
			Err(response) => return response,
		};
		let collection = parsed.collection();

		if let Some(name) = &parsed.name {
			return match self.read().get(&(collection, name.clone())) {
				Some(object) => respond(200, object.clone()),
				None => not_found(&format!("{} \"{name}\" not found", parsed.plural)),
			};
		}

		let cluster_wide = parsed.namespace.is_none() && resource.namespaced;
		let mut items: Vec<Value> = self
			.read()
			.iter()
			.filter(|((stored, _), _)| {
				if cluster_wide {
					extract_cluster_wide_path(stored).is_some_and(|p| p == collection)
				} else {
					*stored == collection
				}
			})
			.map(|(_, v)| v.clone())
			.collect();
		items.sort_by_key(namespace_and_name);

		let total = items.len();
		let offset = match query_param(req, "continue").map(|c| c.parse::<usize>()) {
			None => 0,
			Some(Ok(offset)) => offset.min(total),
			Some(Err(_)) => {
				return respond(
					400,
					status_failure(400, "BadRequest", "invalid continue token"),
				)
			}
		};
		let end = query_param(req, "limit")
			.and_then(|l| l.parse::<usize>().ok())
			.filter(|l| *l > 0)
			.map_or(total, |limit| (offset + limit).min(total));

		let mut metadata = json!({ "resourceVersion": "1" });
		if end < total {
			metadata["continue"] = Value::String(end.to_string());
		}

		// Like a real server, the type is only given once for the whole list
		let page: Vec<Value> = items[offset..end]
			.iter()
			.cloned()
			.map(|mut item| {
				if let Some(object) = item.as_object_mut() {
					object.remove("apiVersion");
					object.remove("kind");
				}
				item
			})
			.collect();

		respond(
			200,
			json!({
				"kind": format!("{}List", resource.kind),
				"apiVersion": parsed.api_version,
				"metadata": metadata,
				"items": page,
			}),
		)
	}

	fn handle_post(&self, req: &Request) -> ResponseTemplate {
		let (parsed, resource) = match self.route(req) {
			Ok(routed) => routed,
			Err(response) => return response,
		};
		let is_dry_run = query_param(req, "dryRun").is_some();

		let mut body: Value = serde_json::from_slice(&req.body).unwrap_or(Value::Null);
		let Some(name) = body
			.pointer("/metadata/name")
			.and_then(Value::as_str)
			.map(str::to_string)
		else {
			return respond(
				422,
				status_failure(422, "Invalid", "metadata.name: Required value"),
			);
		};
		if let (Some(ns), true) = (&parsed.namespace, resource.namespaced) {
			if let Some(Value::Object(metadata)) = body.get_mut("metadata") {
				metadata
					.entry("namespace")
					.or_insert_with(|| Value::String(ns.clone()));
			}
		}

		let key = (parsed.collection(), name);
		let mut resources = self.write();
		if resources.contains_key(&key) {
			let message = format!("{} \"{}\" already exists", parsed.plural, key.1);
			return respond(409, status_failure(409, "AlreadyExists", &message));
		}
		if !is_dry_run {
			resources.insert(key, body.clone());
		}
		respond(201, body)
	}

	fn handle_patch(&self, req: &Request) -> ResponseTemplate {
		let (parsed, _) = match self.route(req) {
			Ok(routed) => routed,
			Err(response) => return response,
		};
		let Some(name) = parsed.name.clone() else {
			return respond(405, status_failure(405, "MethodNotAllowed", "PATCH on a collection"));
		};
		let is_dry_run = query_param(req, "dryRun").is_some();
		let is_apply = req
			.headers
			.get("content-type")
			.and_then(|v| v.to_str().ok())
			.is_some_and(|ct| ct.starts_with(APPLY_PATCH_CONTENT_TYPE));

		let patch: Value = serde_json::from_slice(&req.body).unwrap_or(Value::Null);
		let key = (parsed.collection(), name);

		let mut resources = self.write();
		let merged = match resources.get(&key) {
			Some(existing) => merge_json(existing.clone(), patch),
			// Server-side apply creates missing objects, other patches do not
			None if is_apply => patch,
			None => return not_found(&format!("{} \"{}\" not found", parsed.plural, key.1)),
		};
		let result = strip_strategic_merge_directives(merged);

		if !is_dry_run {
			resources.insert(key, result.clone());
		}
		respond(200, result)
	}

	fn handle_delete(&self, req: &Request) -> ResponseTemplate {
		let (parsed, _) = match self.route(req) {
			Ok(routed) => routed,
			Err(response) => return response,
		};
		let Some(name) = parsed.name.clone() else {
			return respond(405, status_failure(405, "MethodNotAllowed", "DELETE on a collection"));
		};

		let mut resources = self.write();
		let Some(removed) = resources.remove(&(parsed.collection(), name.clone())) else {
			return not_found(&format!("{} \"{name}\" not found", parsed.plural));
		};

		// Namespace deletion takes every object inside with it
		if parsed.api_version == "v1" && parsed.plural == "namespaces" {
			resources.retain(|(stored, _), _| !in_namespace(stored, &name));
		}
		respond(200, removed)
	}
}

async fn mount_version(server: &MockServer) {
	Mock::given(method("GET"))
		.and(path("/version"))
		.respond_with(respond(
			200,
			json!({
				"major": "1",
				"minor": "31",
				"gitVersion": "v1.31.0",
				"gitCommit": "fake",
				"gitTreeState": "clean",
				"buildDate": "2024-08-13T00:00:00Z",
				"goVersion": "go1.22.5",
				"compiler": "gc",
				"platform": "linux/amd64"
			}),
		))
		.mount(server)
		.await;
}

fn scope_name(r: &MockApiResource) -> &'static str {
	if r.namespaced {
		"Namespaced"
	} else {
		"Cluster"
	}
}

fn aggregated_group(group: &str, version: &str, resources: &[MockApiResource]) -> Value {
	let resources: Vec<_> = resources
		.iter()
		.map(|r| {
			json!({
				"resource": r.name,
				"responseKind": { "group": group, "version": version, "kind": r.kind },
				"scope": scope_name(r),
				"verbs": r.verbs,
			})
		})
		.collect();

	json!({
		"metadata": { "name": group },
		"versions": [{
			"version": version,
			"resources": resources,
			"freshness": "Current"
		}]
	})
}

fn legacy_resource_list(group_version: &str, resources: &[MockApiResource]) -> Value {
	let resources: Vec<_> = resources
		.iter()
		.map(|r| {
			json!({
				"name": r.name,
				"singularName": "",
				"namespaced": r.namespaced,
				"kind": r.kind,
				"verbs": r.verbs,
			})
		})
		.collect();

	json!({
		"kind": "APIResourceList",
		"apiVersion": "v1",
		"groupVersion": group_version,
		"resources": resources
	})
}

fn aggregated_list(items: Vec<Value>) -> Vec<u8> {
	serde_json::to_vec(&json!({
		"kind": "APIGroupDiscoveryList",
		"apiVersion": "apidiscovery.k8s.io/v2",
		"items": items
	}))
	.expect("serializing discovery JSON should never fail")
}

async fn mount_discovery(server: &MockServer, discovery: &MockDiscovery, mode: DiscoveryMode) {
	// The Content-Type must name the aggregated format for clients to parse it
	const AGGREGATED_DISCOVERY_CONTENT_TYPE: &str =
		"application/json;g=apidiscovery.k8s.io;v=v2;as=APIGroupDiscoveryList";

	let core_body = aggregated_list(vec![aggregated_group("", "v1", &discovery.core_resources)]);
	let apis_body = aggregated_list(
		discovery
			.group_resources
			.iter()
			.map(|(gv, rs)| {
				let (group, version) = gv.split_once('/').unwrap_or(("", gv));
				aggregated_group(group, version, rs)
			})
			.collect(),
	);

	for (discovery_path, body) in [("/api", core_body), ("/apis", apis_body)] {
		let response = match mode {
			// set_body_raw keeps the Content-Type, set_body_json would overwrite it
			DiscoveryMode::Aggregated => {
				ResponseTemplate::new(200).set_body_raw(body, AGGREGATED_DISCOVERY_CONTENT_TYPE)
			}
			DiscoveryMode::Legacy => ResponseTemplate::new(406),
		};
		Mock::given(method("GET"))
			.and(path(discovery_path))
			.and(header_regex("accept", "apidiscovery"))
			.respond_with(response)
			.mount(server)
			.await;
	}

	// Legacy discovery endpoints
	Mock::given(method("GET"))
		.and(path("/api"))
		.respond_with(respond(
			200,
			json!({
				"kind": "APIVersions",
				"versions": ["v1"],
				"serverAddressByClientCIDRs": []
			}),
		))
		.mount(server)
		.await;

	let groups: Vec<_> = discovery
		.group_resources
		.keys()
		.map(|gv| {
			let (group, version) = gv.split_once('/').unwrap_or(("", gv));
			json!({
				"name": group,
				"versions": [{"groupVersion": gv, "version": version}],
				"preferredVersion": {"groupVersion": gv, "version": version}
			})
		})
		.collect();

	Mock::given(method("GET"))
		.and(path("/apis"))
		.respond_with(respond(
			200,
			json!({ "kind": "APIGroupList", "apiVersion": "v1", "groups": groups }),
		))
		.mount(server)
		.await;

	Mock::given(method("GET"))
		.and(path("/api/v1"))
		.respond_with(respond(
			200,
			legacy_resource_list("v1", &discovery.core_resources),
		))
		.mount(server)
		.await;

	for (gv, rs) in &discovery.group_resources {
		Mock::given(method("GET"))
			.and(path(format!("/apis/{gv}")))
			.respond_with(respond(200, legacy_resource_list(gv, rs)))
			.mount(server)
			.await;
	}
}

/// Discovery mocks are more specific and must win over these catch-alls.
const RESOURCE_PRIORITY: u8 = 10;

async fn mount_resources(server: &MockServer, state: &State) {
	let resource_paths = || path_regex(r"^/api(s)?/.*");

	let get_state = state.clone();
	Mock::given(method("GET"))
		.and(resource_paths())
		.respond_with(move |req: &Request| get_state.handle_get(req))
		.with_priority(RESOURCE_PRIORITY)
		.mount(server)
		.await;

	let post_state = state.clone();
	Mock::given(method("POST"))
		.and(resource_paths())
		.respond_with(move |req: &Request| post_state.handle_post(req))
		.with_priority(RESOURCE_PRIORITY)
		.mount(server)
		.await;

	let patch_state = state.clone();
	Mock::given(method("PATCH"))
		.and(resource_paths())
		.respond_with(move |req: &Request| patch_state.handle_patch(req))
		.with_priority(RESOURCE_PRIORITY)
		.mount(server)
		.await;

	let delete_state = state.clone();
	Mock::given(method("DELETE"))
		.and(resource_paths())
		.respond_with(move |req: &Request| delete_state.handle_delete(req))
		.with_priority(RESOURCE_PRIORITY)
		.mount(server)
		.await;
}
