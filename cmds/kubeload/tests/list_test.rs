//! Paginated listing against the HTTP mock server.

use assert_matches::assert_matches;
use k8s_mock::http::{HttpMockK8sServer, RunningHttpMockK8sServer};
use kubeload::{
	config::ClusterConfig,
	k8s::{
		client::ClusterConnection,
		list::{ListError, PaginatedLister, RequestScope, PAGE_SIZE},
		ResourceDescriptor,
	},
};
use serde_json::json;

fn deployment(namespace: &str, name: &str) -> serde_json::Value {
	json!({
		"apiVersion": "apps/v1",
		"kind": "Deployment",
		"metadata": { "name": name, "namespace": namespace },
		"spec": { "replicas": 1 }
	})
}

fn persistent_volume(name: &str) -> serde_json::Value {
	json!({
		"apiVersion": "v1",
		"kind": "PersistentVolume",
		"metadata": { "name": name },
		"spec": { "capacity": { "storage": "1Gi" } }
	})
}

async fn lister(server: &RunningHttpMockK8sServer) -> PaginatedLister {
	let conn = ClusterConnection::connect_with_kubeconfig(&ClusterConfig::default(), server.kubeconfig())
		.await
		.expect("connection should succeed");
	PaginatedLister::new(conn.client().clone())
}

fn query(req: &wiremock::Request, key: &str) -> Option<String> {
	req.url
		.query_pairs()
		.find(|(k, _)| k == key)
		.map(|(_, v)| v.into_owned())
}

#[tokio::test]
async fn test_three_hundred_objects_take_two_rounds() {
	let resources = (0..300)
		.map(|i| deployment("demo", &format!("web-{i:03}")))
		.collect();
	let server = HttpMockK8sServer::builder()
		.resources(resources)
		.build()
		.start()
		.await;

	let items = lister(&server)
		.await
		.list(&ResourceDescriptor::deployments(), Some("demo"))
		.await
		.expect("listing should succeed");

	assert_eq!(items.len(), 300);
	assert_eq!(items[0].metadata.name.as_deref(), Some("web-000"));
	assert_eq!(items[299].metadata.name.as_deref(), Some("web-299"));

	let requests = server
		.requests("GET", "/apis/apps/v1/namespaces/demo/deployments")
		.await;
	assert_eq!(requests.len(), 2);
	assert_eq!(query(&requests[0], "limit"), Some(PAGE_SIZE.to_string()));
	assert_eq!(query(&requests[0], "continue"), None);
	assert_eq!(query(&requests[1], "continue").as_deref(), Some("250"));
}

#[tokio::test]
async fn test_exactly_one_page() {
	let resources = (0..250)
		.map(|i| deployment("demo", &format!("web-{i:03}")))
		.collect();
	let server = HttpMockK8sServer::builder()
		.resources(resources)
		.build()
		.start()
		.await;

	let items = lister(&server)
		.await
		.list(&ResourceDescriptor::deployments(), Some("demo"))
		.await
		.unwrap();

	assert_eq!(items.len(), 250);
	let requests = server
		.requests("GET", "/apis/apps/v1/namespaces/demo/deployments")
		.await;
	assert_eq!(requests.len(), 1);
}

#[tokio::test]
async fn test_empty_namespace_lists_whole_cluster() {
	let server = HttpMockK8sServer::builder()
		.resources(vec![
			deployment("demo", "a"),
			deployment("other", "b"),
		])
		.build()
		.start()
		.await;
	let lister = lister(&server).await;

	for namespace in [None, Some("")] {
		let items = lister
			.list(&ResourceDescriptor::deployments(), namespace)
			.await
			.unwrap();
		let names: Vec<_> = items
			.iter()
			.map(|o| o.metadata.name.as_deref().unwrap())
			.collect();
		assert_eq!(names, vec!["a", "b"]);
	}

	let requests = server.requests("GET", "/apis/apps/v1/deployments").await;
	assert_eq!(requests.len(), 2);
}

#[tokio::test]
async fn test_cluster_scoped_type_ignores_namespace() {
	let server = HttpMockK8sServer::builder()
		.resources(vec![persistent_volume("pv-1"), persistent_volume("pv-2")])
		.build()
		.start()
		.await;

	let items = lister(&server)
		.await
		.list(&ResourceDescriptor::persistent_volumes(), Some("demo"))
		.await
		.unwrap();

	assert_eq!(items.len(), 2);
	assert_eq!(
		server.requests("GET", "/api/v1/persistentvolumes").await.len(),
		1
	);
	assert!(server
		.requests("GET", "/api/v1/namespaces/demo/persistentvolumes")
		.await
		.is_empty());
}

#[tokio::test]
async fn test_unserved_type_yields_nothing() {
	let server = HttpMockK8sServer::builder().build().start().await;
	let widgets = ResourceDescriptor::new("example.com", "v1", "widgets", true);

	let items = lister(&server)
		.await
		.list(&widgets, Some("demo"))
		.await
		.expect("an unserved type is not an error");

	assert!(items.is_empty());
}

#[tokio::test]
async fn test_forbidden_namespace_fails() {
	let server = HttpMockK8sServer::builder()
		.resources(vec![deployment("secret-team", "a")])
		.forbidden(vec![
			"/apis/apps/v1/namespaces/secret-team/deployments".to_string()
		])
		.build()
		.start()
		.await;

	let result = lister(&server)
		.await
		.list(&ResourceDescriptor::deployments(), Some("secret-team"))
		.await;

	assert_matches!(
		&result,
		Err(ListError::Forbidden { scope: RequestScope::Namespace(ns), .. }) if ns == "secret-team"
	);
	let message = result.unwrap_err().to_string();
	assert_eq!(
		message,
		"no access to list deployments.v1.apps in the namespace \"secret-team\""
	);
}

#[tokio::test]
async fn test_list_all_concatenates_in_order() {
	let server = HttpMockK8sServer::builder()
		.resources(vec![
			deployment("demo", "web"),
			json!({
				"apiVersion": "v1",
				"kind": "Service",
				"metadata": { "name": "web", "namespace": "demo" }
			}),
			persistent_volume("pv-1"),
		])
		.build()
		.start()
		.await;

	let items = lister(&server)
		.await
		.list_all(
			&[
				ResourceDescriptor::deployments(),
				ResourceDescriptor::services(),
				ResourceDescriptor::persistent_volumes(),
			],
			Some("demo"),
		)
		.await
		.unwrap();

	let types: Vec<_> = items
		.iter()
		.map(|o| {
			let types = o.types.as_ref().expect("item type is filled from the list");
			(types.api_version.as_str(), types.kind.as_str())
		})
		.collect();
	assert_eq!(
		types,
		vec![
			("apps/v1", "Deployment"),
			("v1", "Service"),
			("v1", "PersistentVolume")
		]
	);
}

#[tokio::test]
async fn test_list_all_stops_at_forbidden_type() {
	let server = HttpMockK8sServer::builder()
		.forbidden(vec!["/api/v1/namespaces/demo/services".to_string()])
		.build()
		.start()
		.await;

	let result = lister(&server)
		.await
		.list_all(
			&[
				ResourceDescriptor::deployments(),
				ResourceDescriptor::services(),
				ResourceDescriptor::pods(),
			],
			Some("demo"),
		)
		.await;

	assert_matches!(result, Err(ListError::Forbidden { .. }));
	assert!(server
		.requests("GET", "/api/v1/namespaces/demo/pods")
		.await
		.is_empty());
}
