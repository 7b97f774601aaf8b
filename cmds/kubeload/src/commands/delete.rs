//! Delete command handler.

use std::{io::Write, sync::Arc};

use anyhow::Result;
use clap::Args;
use tracing::instrument;

use super::util::{block_on_with_timeout, ClusterArgs};
use crate::{
	gateway::ClusterGateway,
	workload::{NamespaceName, WorkloadStore},
};

#[derive(Debug, Args)]
pub struct DeleteArgs {
	/// Namespace to delete, together with everything in it
	pub namespace: NamespaceName,

	#[command(flatten)]
	pub cluster: ClusterArgs,
}

/// Run the delete command.
pub fn run<W: Write>(args: DeleteArgs, writer: W) -> Result<()> {
	let timeout = args.cluster.timeout();
	block_on_with_timeout(timeout, run_async(args, writer))
}

#[instrument(skip_all, fields(namespace = %args.namespace))]
async fn run_async<W: Write>(args: DeleteArgs, mut writer: W) -> Result<()> {
	let config = args.cluster.load_config()?;
	let connection = args.cluster.connect(&config).await?;

	let gateway =
		ClusterGateway::without_applier(connection.client().clone(), Arc::new(WorkloadStore::new()));
	gateway.delete_workload(&args.namespace).await?;

	writeln!(writer, "namespace {} deleted", args.namespace)?;
	Ok(())
}
