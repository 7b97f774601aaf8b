//! Workloads and the store that tracks them per namespace.

use std::{
	collections::HashMap,
	fmt,
	str::FromStr,
	sync::{Arc, Mutex, MutexGuard},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::manifest::{decode_documents, encode_documents, DecodeError, Manifest};

const MAX_NAMESPACE_LEN: usize = 63;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid namespace name {name:?}: {reason}")]
pub struct InvalidNamespace {
	pub name: String,
	pub reason: &'static str,
}

/// A validated namespace name (an RFC 1123 label).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NamespaceName(String);

impl NamespaceName {
	pub fn new(name: impl Into<String>) -> Result<Self, InvalidNamespace> {
		let name = name.into();
		let reason = if name.is_empty() {
			Some("must not be empty")
		} else if name.len() > MAX_NAMESPACE_LEN {
			Some("must be at most 63 characters")
		} else if !name
			.bytes()
			.all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
		{
			Some("must consist of lowercase alphanumeric characters or '-'")
		} else if name.starts_with('-') || name.ends_with('-') {
			Some("must start and end with an alphanumeric character")
		} else {
			None
		};
		match reason {
			Some(reason) => Err(InvalidNamespace { name, reason }),
			None => Ok(Self(name)),
		}
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for NamespaceName {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for NamespaceName {
	type Err = InvalidNamespace;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::new(s)
	}
}

impl AsRef<str> for NamespaceName {
	fn as_ref(&self) -> &str {
		&self.0
	}
}

impl TryFrom<String> for NamespaceName {
	type Error = InvalidNamespace;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		Self::new(value)
	}
}

impl From<NamespaceName> for String {
	fn from(value: NamespaceName) -> Self {
		value.0
	}
}

/// Objects destined for a single namespace, applied as one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Workload {
	namespace: NamespaceName,
	items: Vec<Manifest>,
}

impl Workload {
	/// Decode a manifest stream. A malformed document fails the whole stream.
	pub fn from_manifests(namespace: NamespaceName, data: &[u8]) -> Result<Self, DecodeError> {
		Ok(Self::new(namespace, decode_documents(data)?))
	}

	pub fn new(namespace: NamespaceName, items: Vec<Manifest>) -> Self {
		Self { namespace, items }
	}

	pub fn namespace(&self) -> &NamespaceName {
		&self.namespace
	}

	pub fn items(&self) -> &[Manifest] {
		&self.items
	}

	/// Overwrite the namespace of every item with the workload's own.
	pub fn stamp_namespace(&mut self) {
		for item in &mut self.items {
			item.set_namespace(self.namespace.as_str());
		}
	}

	pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
		encode_documents(&self.items)
	}
}

/// Registered workloads, one per namespace.
///
/// Workloads are stamped before they are inserted, so everything reachable
/// through the store already carries its namespace.
#[derive(Debug, Default)]
pub struct WorkloadStore {
	workloads: Mutex<HashMap<NamespaceName, Arc<Workload>>>,
}

impl WorkloadStore {
	pub fn new() -> Self {
		Self::default()
	}

	fn lock(&self) -> MutexGuard<'_, HashMap<NamespaceName, Arc<Workload>>> {
		// Entries are only ever replaced whole
		self.workloads
			.lock()
			.unwrap_or_else(std::sync::PoisonError::into_inner)
	}

	/// Stamp and insert `workload`, returning the one it replaced.
	pub fn register(&self, mut workload: Workload) -> Option<Arc<Workload>> {
		workload.stamp_namespace();
		let namespace = workload.namespace.clone();
		self.lock().insert(namespace, Arc::new(workload))
	}

	pub fn get(&self, namespace: &NamespaceName) -> Option<Arc<Workload>> {
		self.lock().get(namespace).cloned()
	}

	pub fn remove(&self, namespace: &NamespaceName) -> Option<Arc<Workload>> {
		self.lock().remove(namespace)
	}

	/// Registered namespaces, sorted.
	pub fn namespaces(&self) -> Vec<NamespaceName> {
		let mut out: Vec<_> = self.lock().keys().cloned().collect();
		out.sort();
		out
	}

	pub fn len(&self) -> usize {
		self.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.lock().is_empty()
	}
}
