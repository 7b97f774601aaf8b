//! Manifest documents and multi-document streams.
//!
//! Streams are documents joined with [`DOCUMENT_SEPARATOR`]. Decoding accepts
//! YAML (and therefore JSON) documents; encoding always emits JSON documents.

use std::{
	fs, io,
	path::{Path, PathBuf},
};

use kube::core::GroupVersionKind;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use serde_yaml_with_quirks::DeserializingQuirks;
use thiserror::Error;
use walkdir::WalkDir;

use crate::k8s::discovery::gvk_from_manifest;

pub const DOCUMENT_SEPARATOR: &str = "\n---\n";

#[derive(Debug, Error)]
pub enum DecodeError {
	#[error("manifest stream is not valid UTF-8")]
	Utf8(#[source] std::str::Utf8Error),

	/// The stream is parsed as a whole before any document is produced, so a
	/// syntax error cannot be pinned to a document index.
	#[error("manifest stream is malformed{}", at_location(.location))]
	Yaml {
		/// Line and column of the error, both starting at 1.
		location: Option<(usize, usize)>,
		#[source]
		source: serde_yaml_with_quirks::Error,
	},

	#[error("document {index} is not a mapping")]
	NotAnObject { index: usize },
}

fn at_location(location: &Option<(usize, usize)>) -> String {
	location.map_or_else(String::new, |(line, column)| {
		format!(" at line {line} column {column}")
	})
}

/// A single structured object of any kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest(Value);

impl Manifest {
	/// Wrap a JSON value; only objects are manifests.
	pub fn from_value(value: Value) -> Option<Self> {
		value.is_object().then_some(Self(value))
	}

	pub fn as_value(&self) -> &Value {
		&self.0
	}

	pub fn into_value(self) -> Value {
		self.0
	}

	pub fn api_version(&self) -> Option<&str> {
		self.0.get("apiVersion")?.as_str()
	}

	pub fn kind(&self) -> Option<&str> {
		self.0.get("kind")?.as_str()
	}

	pub fn name(&self) -> Option<&str> {
		self.0.pointer("/metadata/name")?.as_str()
	}

	pub fn namespace(&self) -> Option<&str> {
		self.0.pointer("/metadata/namespace")?.as_str()
	}

	pub fn gvk(&self) -> Option<GroupVersionKind> {
		gvk_from_manifest(&self.0)
	}

	/// Overwrite `metadata.namespace`, creating `metadata` when missing.
	pub fn set_namespace(&mut self, namespace: &str) {
		let Value::Object(object) = &mut self.0 else {
			return;
		};
		let metadata = object
			.entry("metadata")
			.or_insert_with(|| Value::Object(Map::new()));
		if !metadata.is_object() {
			*metadata = Value::Object(Map::new());
		}
		if let Value::Object(metadata) = metadata {
			metadata.insert("namespace".to_string(), Value::String(namespace.to_string()));
		}
	}
}

/// Decode a stream of documents. Empty documents are skipped.
pub fn decode_documents(data: &[u8]) -> Result<Vec<Manifest>, DecodeError> {
	let text = std::str::from_utf8(data).map_err(DecodeError::Utf8)?;

	let mut out = Vec::new();
	let documents = serde_yaml_with_quirks::Deserializer::from_str_with_quirks(
		text,
		DeserializingQuirks { old_octals: true },
	);
	for (index, document) in documents.enumerate() {
		let value = Value::deserialize(document).map_err(|source| DecodeError::Yaml {
			location: source.location().map(|l| (l.line(), l.column())),
			source,
		})?;
		if value.is_null() {
			continue;
		}
		out.push(Manifest::from_value(value).ok_or(DecodeError::NotAnObject { index })?);
	}
	Ok(out)
}

/// Encode manifests as JSON documents joined by [`DOCUMENT_SEPARATOR`].
pub fn encode_documents(items: &[Manifest]) -> Result<Vec<u8>, serde_json::Error> {
	let mut out = Vec::new();
	for (i, item) in items.iter().enumerate() {
		if i != 0 {
			out.extend_from_slice(DOCUMENT_SEPARATOR.as_bytes());
		}
		serde_json::to_writer(&mut out, item)?;
	}
	Ok(out)
}

fn is_manifest_file(path: &Path) -> bool {
	matches!(
		path.extension().and_then(|e| e.to_str()),
		Some("yaml" | "yml" | "json")
	)
}

/// Collect manifest file paths: files are taken as given, directories are walked
/// recursively for `.yaml`, `.yml` and `.json` files in sorted order.
pub fn collect_manifest_paths(paths: &[PathBuf]) -> io::Result<Vec<PathBuf>> {
	let mut out = Vec::new();
	for path in paths {
		if !path.is_dir() {
			out.push(path.clone());
			continue;
		}
		for entry in WalkDir::new(path).sort_by_file_name() {
			let entry = entry.map_err(io::Error::other)?;
			if entry.file_type().is_file() && is_manifest_file(entry.path()) {
				out.push(entry.into_path());
			}
		}
	}
	Ok(out)
}

/// Read manifest files into a single stream, terminating each file with a separator.
pub fn read_manifest_files(paths: &[PathBuf]) -> io::Result<Vec<u8>> {
	let mut out = Vec::new();
	for path in collect_manifest_paths(paths)? {
		let contents = fs::read(&path)
			.map_err(|e| io::Error::new(e.kind(), format!("{}: {e}", path.display())))?;
		out.extend_from_slice(&contents);
		out.extend_from_slice(DOCUMENT_SEPARATOR.as_bytes());
	}
	Ok(out)
}
