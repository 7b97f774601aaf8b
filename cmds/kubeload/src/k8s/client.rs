//! Kubernetes cluster connection management.

use std::path::Path;

use kube::{
	config::{KubeConfigOptions, Kubeconfig, KubeconfigError},
	Client, Config,
};
use thiserror::Error;
use tracing::instrument;

use crate::config::ClusterConfig;

#[derive(Debug, Error)]
pub enum ConnectionError {
	#[error("apiServer and contextNames are mutually exclusive, please specify only one")]
	AmbiguousCluster,

	#[error("contextNames is empty")]
	EmptyContextNames,

	#[error(
		"no cluster that matches the apiServer `{0}` was found. Please check your $KUBECONFIG"
	)]
	ClusterNotFound(String),

	#[error("no context using cluster `{0}` was found. Please check your $KUBECONFIG")]
	ContextNotFoundForCluster(String),

	#[error("no context named `{0:?}` was found. Please check your $KUBECONFIG")]
	ContextNotFound(Vec<String>),

	#[error(transparent)]
	Kubeconfig(#[from] KubeconfigError),

	#[error(transparent)]
	Kube(#[from] kube::Error),
}

/// A configured client plus a human-readable name for the cluster it talks to.
#[derive(Clone)]
pub struct ClusterConnection {
	client: Client,
	cluster_identifier: String,
}

impl std::fmt::Debug for ClusterConnection {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ClusterConnection")
			.field("cluster_identifier", &self.cluster_identifier)
			.finish_non_exhaustive()
	}
}

impl ClusterConnection {
	/// Connect using the kubeconfig at `kubeconfig_path`, or the default
	/// kubeconfig (`$KUBECONFIG`, `~/.kube/config`) when no path is given.
	#[instrument(skip(config))]
	pub async fn connect(
		config: &ClusterConfig,
		kubeconfig_path: Option<&Path>,
	) -> Result<Self, ConnectionError> {
		let kubeconfig = match kubeconfig_path {
			Some(path) => Kubeconfig::read_from(path)?,
			None => Kubeconfig::read()?,
		};
		Self::connect_with_kubeconfig(config, kubeconfig).await
	}

	#[instrument(skip_all)]
	pub async fn connect_with_kubeconfig(
		config: &ClusterConfig,
		kubeconfig: Kubeconfig,
	) -> Result<Self, ConnectionError> {
		let (context, cluster_identifier) = match (&config.api_server, &config.context_names) {
			(Some(_), Some(_)) => return Err(ConnectionError::AmbiguousCluster),
			(Some(api_server), None) => {
				let context = find_context_for_api_server(&kubeconfig, api_server)?;
				tracing::debug!(context = %context, api_server = %api_server, "found context for apiServer");
				let identifier = format!("{api_server}  (context:{context})");
				(Some(context), identifier)
			}
			(None, Some(context_names)) => {
				if context_names.is_empty() {
					return Err(ConnectionError::EmptyContextNames);
				}
				let context = find_first_matching_context(&kubeconfig, context_names)?;
				tracing::debug!(context = %context, "using context from contextNames");
				let identifier = format!("context:{context}");
				(Some(context), identifier)
			}
			(None, None) => {
				let identifier = kubeconfig
					.current_context
					.as_ref()
					.map_or_else(|| "current context".to_string(), |c| format!("context:{c}"));
				(None, identifier)
			}
		};

		let mut kube_config = Config::from_custom_kubeconfig(
			kubeconfig,
			&KubeConfigOptions {
				context,
				..Default::default()
			},
		)
		.await?;
		kube_config.read_timeout = Some(config.request_timeout());

		let client = Client::try_from(kube_config)?;
		Ok(Self {
			client,
			cluster_identifier,
		})
	}

	/// Wrap an existing client.
	pub fn from_client(client: Client, cluster_identifier: impl Into<String>) -> Self {
		Self {
			client,
			cluster_identifier: cluster_identifier.into(),
		}
	}

	pub fn client(&self) -> &Client {
		&self.client
	}

	/// Namespace used for namespaced objects that do not name one.
	pub fn default_namespace(&self) -> &str {
		self.client.default_namespace()
	}

	pub fn cluster_identifier(&self) -> &str {
		&self.cluster_identifier
	}
}

/// Find the context that references the cluster whose server is `api_server`.
fn find_context_for_api_server(
	kubeconfig: &Kubeconfig,
	api_server: &str,
) -> Result<String, ConnectionError> {
	let cluster_name = kubeconfig
		.clusters
		.iter()
		.find(|c| {
			c.cluster
				.as_ref()
				.is_some_and(|cluster| cluster.server.as_deref() == Some(api_server))
		})
		.map(|c| &c.name)
		.ok_or_else(|| ConnectionError::ClusterNotFound(api_server.to_string()))?;

	kubeconfig
		.contexts
		.iter()
		.find(|c| {
			c.context
				.as_ref()
				.is_some_and(|ctx| &ctx.cluster == cluster_name)
		})
		.map(|c| c.name.clone())
		.ok_or_else(|| ConnectionError::ContextNotFoundForCluster(cluster_name.clone()))
}

fn find_first_matching_context(
	kubeconfig: &Kubeconfig,
	context_names: &[String],
) -> Result<String, ConnectionError> {
	context_names
		.iter()
		.find(|name| kubeconfig.contexts.iter().any(|c| &c.name == *name))
		.cloned()
		.ok_or_else(|| ConnectionError::ContextNotFound(context_names.to_vec()))
}

#[cfg(test)]
mod tests {
	use assert_matches::assert_matches;

	use super::*;

	#[tokio::test]
	async fn test_connect_both_selectors_errors() {
		let config = ClusterConfig {
			api_server: Some("https://example:6443".to_string()),
			context_names: Some(vec!["ctx".to_string()]),
			..ClusterConfig::default()
		};

		let result =
			ClusterConnection::connect_with_kubeconfig(&config, Kubeconfig::default()).await;
		assert_matches!(result, Err(ConnectionError::AmbiguousCluster));
	}

	#[tokio::test]
	async fn test_connect_empty_context_names_errors() {
		let config = ClusterConfig {
			context_names: Some(vec![]),
			..ClusterConfig::default()
		};

		let result =
			ClusterConnection::connect_with_kubeconfig(&config, Kubeconfig::default()).await;
		assert_matches!(result, Err(ConnectionError::EmptyContextNames));
	}

	#[tokio::test]
	async fn test_connect_context_not_found() {
		let config = ClusterConfig {
			context_names: Some(vec!["nonexistent".to_string()]),
			..ClusterConfig::default()
		};

		let result =
			ClusterConnection::connect_with_kubeconfig(&config, Kubeconfig::default()).await;
		assert_matches!(
			result,
			Err(ConnectionError::ContextNotFound(contexts)) if contexts == vec!["nonexistent"]
		);
	}

	#[tokio::test]
	async fn test_connect_api_server_not_found() {
		let config = ClusterConfig {
			api_server: Some("https://unknown:6443".to_string()),
			..ClusterConfig::default()
		};

		let result =
			ClusterConnection::connect_with_kubeconfig(&config, Kubeconfig::default()).await;
		assert_matches!(
			result,
			Err(ConnectionError::ClusterNotFound(server)) if server == "https://unknown:6443"
		);
	}
}
