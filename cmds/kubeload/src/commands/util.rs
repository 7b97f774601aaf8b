//! Utilities for command handlers.

use std::{
	future::Future,
	io::{self, ErrorKind, Write},
	path::PathBuf,
	time::Duration,
};

use anyhow::{Context, Result};
use clap::Args;

use crate::{config::KubeloadConfig, k8s::client::ClusterConnection};

/// Cluster selection flags shared by every command. They override `.kubeload.yaml`.
#[derive(Debug, Clone, Default, Args)]
pub struct ClusterArgs {
	/// Path to the kubeconfig file (defaults to $KUBECONFIG, then ~/.kube/config)
	#[arg(long, global = true)]
	pub kubeconfig: Option<PathBuf>,

	/// Kubeconfig context to use
	#[arg(long, global = true, conflicts_with = "api_server")]
	pub context: Option<String>,

	/// Use the kubeconfig context whose cluster has this API server URL
	#[arg(long, global = true)]
	pub api_server: Option<String>,

	/// Give up on the whole operation after this many seconds
	#[arg(long, global = true, value_name = "SECONDS")]
	pub timeout: Option<u64>,
}

impl ClusterArgs {
	/// Load `.kubeload.yaml` from the working directory upward and apply flag overrides.
	pub fn load_config(&self) -> Result<KubeloadConfig> {
		let cwd = std::env::current_dir().context("determining working directory")?;
		let mut config = KubeloadConfig::load_from_directory(&cwd)?.unwrap_or_default();
		self.override_config(&mut config);
		Ok(config)
	}

	pub fn override_config(&self, config: &mut KubeloadConfig) {
		if let Some(context) = &self.context {
			config.cluster.context_names = Some(vec![context.clone()]);
			config.cluster.api_server = None;
		}
		if let Some(api_server) = &self.api_server {
			config.cluster.api_server = Some(api_server.clone());
			config.cluster.context_names = None;
		}
		// A single request may not outlive the whole operation
		if let Some(timeout) = self.timeout {
			let configured = config.cluster.request_timeout().as_secs();
			config.cluster.request_timeout_seconds = Some(configured.min(timeout));
		}
	}

	pub fn timeout(&self) -> Option<Duration> {
		self.timeout.map(Duration::from_secs)
	}

	pub async fn connect(&self, config: &KubeloadConfig) -> Result<ClusterConnection> {
		tracing::debug!("connecting to Kubernetes cluster");
		let connection = ClusterConnection::connect(&config.cluster, self.kubeconfig.as_deref())
			.await
			.context("connecting to Kubernetes cluster")?;
		tracing::debug!(cluster = %connection.cluster_identifier(), "connected to cluster");
		Ok(connection)
	}
}

/// Run `fut` on a fresh multi-threaded runtime, bounded by `timeout` when set.
pub fn block_on_with_timeout<F>(timeout: Option<Duration>, fut: F) -> Result<()>
where
	F: Future<Output = Result<()>>,
{
	let runtime = tokio::runtime::Builder::new_multi_thread()
		.enable_all()
		.build()
		.context("creating tokio runtime")?;

	runtime.block_on(async {
		match timeout {
			Some(limit) => tokio::time::timeout(limit, fut)
				.await
				.with_context(|| format!("operation timed out after {}s", limit.as_secs()))?,
			None => fut.await,
		}
	})
}

/// A writer wrapper that silently handles broken pipe errors.
///
/// When the underlying writer returns a broken pipe error (EPIPE), this wrapper
/// converts it to a successful write. This allows commands to exit cleanly when
/// output is piped to a process that closes early (e.g., `kubeload list pods | head -1`).
pub struct BrokenPipeGuard<W> {
	inner: W,
}

impl<W> BrokenPipeGuard<W> {
	pub fn new(inner: W) -> Self {
		Self { inner }
	}
}

impl<W: Write> Write for BrokenPipeGuard<W> {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		match self.inner.write(buf) {
			Err(e) if e.kind() == ErrorKind::BrokenPipe => Ok(buf.len()),
			other => other,
		}
	}

	fn flush(&mut self) -> io::Result<()> {
		match self.inner.flush() {
			Err(e) if e.kind() == ErrorKind::BrokenPipe => Ok(()),
			other => other,
		}
	}
}
