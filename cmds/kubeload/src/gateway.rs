//! Registering, applying and deleting namespaced workloads.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Namespace;
use kube::{
	api::{Api, DeleteParams, ObjectMeta, PostParams},
	Client,
};
use thiserror::Error;
use tracing::instrument;

use crate::{
	k8s::apply::{ApplyEngine, ApplyError, Applier},
	workload::{NamespaceName, Workload, WorkloadStore},
};

#[derive(Debug, Error)]
pub enum GatewayError {
	#[error("creating namespace {namespace}")]
	CreateNamespace {
		namespace: NamespaceName,
		#[source]
		source: Box<kube::Error>,
	},

	#[error("no workload is registered for namespace {0}")]
	NotRegistered(NamespaceName),

	#[error("encoding workload for namespace {namespace}")]
	Encode {
		namespace: NamespaceName,
		#[source]
		source: serde_json::Error,
	},

	#[error("applying workload to namespace {namespace}")]
	Apply {
		namespace: NamespaceName,
		#[source]
		source: ApplyError,
	},

	#[error("deleting namespace {namespace}")]
	DeleteNamespace {
		namespace: NamespaceName,
		#[source]
		source: Box<kube::Error>,
	},
}

fn is_status(err: &kube::Error, code: u16) -> bool {
	matches!(err, kube::Error::Api(resp) if resp.code == code)
}

/// Ties the namespace lifecycle on the cluster to the [`WorkloadStore`].
///
/// Only [`ClusterGateway::apply_workload`] needs an applier; adding and deleting
/// workloads work on any gateway.
pub struct ClusterGateway<A = ApplyEngine> {
	namespaces: Api<Namespace>,
	applier: A,
	store: Arc<WorkloadStore>,
}

impl ClusterGateway<()> {
	/// A gateway that manages namespaces and the store but cannot apply.
	pub fn without_applier(client: Client, store: Arc<WorkloadStore>) -> Self {
		Self::new(client, (), store)
	}
}

impl<A> ClusterGateway<A> {
	pub fn new(client: Client, applier: A, store: Arc<WorkloadStore>) -> Self {
		Self {
			namespaces: Api::all(client),
			applier,
			store,
		}
	}

	pub fn store(&self) -> &Arc<WorkloadStore> {
		&self.store
	}

	pub fn applier(&self) -> &A {
		&self.applier
	}

	/// Make sure the workload's namespace exists, then stamp and store the workload.
	///
	/// An existing namespace is fine. On any other failure the store is left untouched.
	#[instrument(skip_all, fields(namespace = %workload.namespace(), items = workload.items().len()))]
	pub async fn add_workload(&self, workload: Workload) -> Result<(), GatewayError> {
		let namespace = workload.namespace().clone();
		let object = Namespace {
			metadata: ObjectMeta {
				name: Some(namespace.to_string()),
				..Default::default()
			},
			..Default::default()
		};

		match self.namespaces.create(&PostParams::default(), &object).await {
			Ok(_) => tracing::debug!("created namespace"),
			Err(e) if is_status(&e, 409) => tracing::debug!("namespace already exists"),
			Err(e) => {
				return Err(GatewayError::CreateNamespace {
					namespace,
					source: Box::new(e),
				})
			}
		}

		if self.store.register(workload).is_some() {
			tracing::debug!("replaced previously registered workload");
		}
		Ok(())
	}

	/// Delete the namespace, and with it everything inside, then forget the workload.
	///
	/// A namespace that is already gone counts as deleted.
	#[instrument(skip(self), fields(namespace = %namespace))]
	pub async fn delete_workload(&self, namespace: &NamespaceName) -> Result<(), GatewayError> {
		match self
			.namespaces
			.delete(namespace.as_str(), &DeleteParams::default())
			.await
		{
			Ok(_) => tracing::debug!("deleted namespace"),
			Err(e) if is_status(&e, 404) => tracing::debug!("namespace does not exist"),
			Err(e) => {
				return Err(GatewayError::DeleteNamespace {
					namespace: namespace.clone(),
					source: Box::new(e),
				})
			}
		}

		self.store.remove(namespace);
		Ok(())
	}
}

impl<A: Applier> ClusterGateway<A> {
	/// Send the registered workload for `namespace` to the applier as one stream.
	#[instrument(skip(self), fields(namespace = %namespace))]
	pub async fn apply_workload(&self, namespace: &NamespaceName) -> Result<(), GatewayError> {
		let workload = self
			.store
			.get(namespace)
			.ok_or_else(|| GatewayError::NotRegistered(namespace.clone()))?;

		let payload = workload.encode().map_err(|source| GatewayError::Encode {
			namespace: namespace.clone(),
			source,
		})?;
		tracing::debug!(items = workload.items().len(), bytes = payload.len(), "applying workload");

		self.applier
			.apply(&payload)
			.await
			.map_err(|source| GatewayError::Apply {
				namespace: namespace.clone(),
				source,
			})
	}
}
