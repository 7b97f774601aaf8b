//! Apply command handler.
//!
//! Reads manifest files into one workload, registers it under the target
//! namespace (creating the namespace when needed) and applies it.

use std::{io::Write, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Args;
use tracing::instrument;

use super::util::{block_on_with_timeout, ClusterArgs};
use crate::{
	gateway::ClusterGateway,
	k8s::apply::ApplyEngine,
	manifest::read_manifest_files,
	workload::{NamespaceName, Workload, WorkloadStore},
};

#[derive(Debug, Args)]
pub struct ApplyArgs {
	/// Namespace every object is placed in, overriding the manifests
	#[arg(short, long)]
	pub namespace: NamespaceName,

	/// Manifest files or directories (.yaml, .yml and .json files are read recursively)
	#[arg(required = true)]
	pub paths: Vec<PathBuf>,

	/// Use client-side strategic merge patches instead of server-side apply
	#[arg(long)]
	pub client_side: bool,

	/// Take ownership of fields managed by others (server-side apply only)
	#[arg(long)]
	pub force: bool,

	#[command(flatten)]
	pub cluster: ClusterArgs,
}

/// Run the apply command.
pub fn run<W: Write>(args: ApplyArgs, writer: W) -> Result<()> {
	let timeout = args.cluster.timeout();
	block_on_with_timeout(timeout, run_async(args, writer))
}

#[instrument(skip_all, fields(namespace = %args.namespace))]
async fn run_async<W: Write>(args: ApplyArgs, mut writer: W) -> Result<()> {
	let mut config = args.cluster.load_config()?;
	if args.client_side {
		config.apply.server_side = false;
	}
	if args.force {
		config.apply.force = true;
	}

	let stream = read_manifest_files(&args.paths).context("reading manifests")?;
	let workload = Workload::from_manifests(args.namespace.clone(), &stream)
		.context("decoding manifests")?;
	let count = workload.items().len();

	let connection = args.cluster.connect(&config).await?;
	let engine = ApplyEngine::builder()
		.client(connection.client().clone())
		.default_namespace(args.namespace.as_str())
		.server_side(config.apply.server_side)
		.force(config.apply.force)
		.field_manager(config.apply.field_manager.clone())
		.build();

	let gateway = ClusterGateway::new(
		connection.client().clone(),
		engine,
		Arc::new(WorkloadStore::new()),
	);
	gateway.add_workload(workload).await?;
	gateway.apply_workload(&args.namespace).await?;

	writeln!(
		writer,
		"applied {count} object(s) to namespace {} on {}",
		args.namespace,
		connection.cluster_identifier()
	)?;
	Ok(())
}
