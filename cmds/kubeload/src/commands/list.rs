//! List command handler.

use std::{collections::HashSet, io::Write};

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use kube::api::DynamicObject;
use tabwriter::TabWriter;
use tracing::instrument;

use super::util::{block_on_with_timeout, ClusterArgs};
use crate::{
	k8s::{discovery::ApiResourceCache, list::PaginatedLister},
	yaml::to_yaml_stream,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
	/// Aligned NAMESPACE / KIND / NAME columns
	#[default]
	Table,
	Json,
	Yaml,
	/// One `kind/name` per line
	Name,
}

#[derive(Debug, Args)]
pub struct ListArgs {
	/// Resource types as `plural` or `plural.group` (e.g. `pods`, `deployments.apps`)
	#[arg(required = true)]
	pub resources: Vec<String>,

	/// Only list objects in this namespace
	#[arg(short, long, conflicts_with = "all_namespaces")]
	pub namespace: Option<String>,

	/// List across all namespaces (the default when --namespace is not given)
	#[arg(short = 'A', long)]
	pub all_namespaces: bool,

	#[arg(short, long, value_enum, default_value_t)]
	pub output: OutputFormat,

	#[command(flatten)]
	pub cluster: ClusterArgs,
}

/// Run the list command.
pub fn run<W: Write>(args: ListArgs, writer: W) -> Result<()> {
	let timeout = args.cluster.timeout();
	block_on_with_timeout(timeout, run_async(args, writer))
}

#[instrument(skip_all, fields(resources = ?args.resources))]
async fn run_async<W: Write>(args: ListArgs, writer: W) -> Result<()> {
	let config = args.cluster.load_config()?;
	let connection = args.cluster.connect(&config).await?;

	let cache = ApiResourceCache::build(connection.client(), HashSet::new(), true)
		.await
		.context("discovering API resources")?;

	let mut descriptors = Vec::with_capacity(args.resources.len());
	for name in &args.resources {
		let descriptor = cache
			.resolve(name)
			.with_context(|| format!("the server doesn't have a resource type {name:?}"))?;
		descriptors.push(descriptor);
	}

	let namespace = if args.all_namespaces {
		None
	} else {
		args.namespace.as_deref()
	};

	let objects = PaginatedLister::new(connection.client().clone())
		.list_all(&descriptors, namespace)
		.await?;

	write_objects(&objects, args.output, writer)
}

fn kind_of(obj: &DynamicObject) -> &str {
	obj.types.as_ref().map_or("", |t| t.kind.as_str())
}

pub fn write_objects<W: Write>(
	objects: &[DynamicObject],
	format: OutputFormat,
	mut writer: W,
) -> Result<()> {
	match format {
		OutputFormat::Table => {
			let mut tw = TabWriter::new(&mut writer);
			writeln!(tw, "NAMESPACE\tKIND\tNAME")?;
			for obj in objects {
				writeln!(
					tw,
					"{}\t{}\t{}",
					obj.metadata.namespace.as_deref().unwrap_or("-"),
					kind_of(obj),
					obj.metadata.name.as_deref().unwrap_or_default(),
				)?;
			}
			tw.flush()?;
		}
		OutputFormat::Json => {
			serde_json::to_writer_pretty(&mut writer, objects)?;
			writeln!(writer)?;
		}
		OutputFormat::Yaml => {
			write!(writer, "{}", to_yaml_stream(objects)?)?;
		}
		OutputFormat::Name => {
			for obj in objects {
				writeln!(
					writer,
					"{}/{}",
					kind_of(obj).to_lowercase(),
					obj.metadata.name.as_deref().unwrap_or_default()
				)?;
			}
		}
	}
	writer.flush()?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use indoc::indoc;
	use kube::api::ObjectMeta;

	use super::*;

	fn object(kind: &str, namespace: Option<&str>, name: &str) -> DynamicObject {
		DynamicObject {
			types: Some(TypeMeta {
				api_version: "v1".to_string(),
				kind: kind.to_string(),
			}),
			metadata: ObjectMeta {
				name: Some(name.to_string()),
				namespace: namespace.map(str::to_string),
				..Default::default()
			},
			data: serde_json::json!({}),
		}
	}

	fn render(format: OutputFormat) -> String {
		let objects = vec![
			object("Service", Some("demo"), "frontend"),
			object("PersistentVolume", None, "pv-1"),
		];
		let mut out = Vec::new();
		write_objects(&objects, format, &mut out).unwrap();
		String::from_utf8(out).unwrap()
	}

	#[test]
	fn test_table_output() {
		assert_eq!(
			render(OutputFormat::Table),
			indoc! {"
				NAMESPACE  KIND              NAME
				demo       Service           frontend
				-          PersistentVolume  pv-1
			"}
		);
	}

	#[test]
	fn test_name_output() {
		assert_eq!(
			render(OutputFormat::Name),
			"service/frontend\npersistentvolume/pv-1\n"
		);
	}

	#[test]
	fn test_json_output_is_an_array() {
		let value: serde_json::Value = serde_json::from_str(&render(OutputFormat::Json)).unwrap();
		assert_eq!(value[0]["kind"], "Service");
		assert_eq!(value[1]["metadata"]["name"], "pv-1");
	}
}
