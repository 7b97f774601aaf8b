//! Connection and discovery against the HTTP mock server.

use std::collections::HashSet;

use assert_matches::assert_matches;
use k8s_mock::{discovery::DiscoveryMode, http::HttpMockK8sServer};
use kube::core::GroupVersionKind;
use kubeload::{
	config::ClusterConfig,
	k8s::{
		client::{ClusterConnection, ConnectionError},
		discovery::ApiResourceCache,
		ResourceScope,
	},
};
use rstest::rstest;

#[tokio::test]
async fn test_connect_with_api_server() {
	let server = HttpMockK8sServer::builder().build().start().await;
	let config = ClusterConfig {
		api_server: Some(server.uri()),
		..ClusterConfig::default()
	};

	let conn = ClusterConnection::connect_with_kubeconfig(&config, server.kubeconfig())
		.await
		.expect("connection should succeed");

	assert!(conn.cluster_identifier().ends_with("(context:mock-context)"));
	assert_eq!(conn.default_namespace(), "default");
}

#[tokio::test]
async fn test_connect_with_first_existing_context() {
	let server = HttpMockK8sServer::builder().build().start().await;
	let config = ClusterConfig {
		context_names: Some(vec!["missing".to_string(), "mock-context".to_string()]),
		..ClusterConfig::default()
	};

	let conn = ClusterConnection::connect_with_kubeconfig(&config, server.kubeconfig())
		.await
		.expect("connection should succeed");

	assert_eq!(conn.cluster_identifier(), "context:mock-context");
}

#[tokio::test]
async fn test_connect_with_unknown_api_server() {
	let server = HttpMockK8sServer::builder().build().start().await;
	let config = ClusterConfig {
		api_server: Some("https://elsewhere:6443".to_string()),
		..ClusterConfig::default()
	};

	let result = ClusterConnection::connect_with_kubeconfig(&config, server.kubeconfig()).await;
	assert_matches!(result, Err(ConnectionError::ClusterNotFound(_)));
}

#[rstest]
#[case::aggregated(DiscoveryMode::Aggregated, false)]
#[case::legacy_full(DiscoveryMode::Legacy, true)]
#[tokio::test]
async fn test_discovery_resolves_resource_names(
	#[case] mode: DiscoveryMode,
	#[case] need_full: bool,
) {
	let server = HttpMockK8sServer::builder()
		.discovery_mode(mode)
		.build()
		.start()
		.await;
	let conn = ClusterConnection::connect_with_kubeconfig(&ClusterConfig::default(), server.kubeconfig())
		.await
		.unwrap();

	let cache = ApiResourceCache::build(conn.client(), HashSet::new(), need_full)
		.await
		.unwrap();

	let deployments = cache.resolve("deployments.apps").unwrap();
	assert_eq!(deployments.api_version(), "apps/v1");
	assert!(deployments.namespaced());

	let volumes = cache.resolve("persistentvolumes").unwrap();
	assert!(!volumes.namespaced());

	assert!(cache.resolve("deployments").is_none());
	assert!(cache.resolve("widgets.example.com").is_none());
}

#[tokio::test]
async fn test_lazy_discovery_finds_requested_kinds() {
	let server = HttpMockK8sServer::builder()
		.discovery_mode(DiscoveryMode::Legacy)
		.build()
		.start()
		.await;
	let conn = ClusterConnection::connect_with_kubeconfig(&ClusterConfig::default(), server.kubeconfig())
		.await
		.unwrap();

	let replicasets = GroupVersionKind::gvk("apps", "v1", "ReplicaSet");
	let namespaces = GroupVersionKind::gvk("", "v1", "Namespace");
	let keys = HashSet::from([replicasets.clone(), namespaces.clone()]);

	let cache = ApiResourceCache::build(conn.client(), keys, false)
		.await
		.unwrap();

	assert_eq!(
		cache.lookup(&replicasets).unwrap().api_resource.plural,
		"replicasets"
	);
	assert_eq!(
		cache.lookup(&namespaces).unwrap().scope,
		ResourceScope::ClusterWide
	);
}
