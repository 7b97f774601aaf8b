//! Paginated listing of arbitrary resource types.
//!
//! Objects are retrieved in bounded rounds of [`PAGE_SIZE`] items, following the
//! continuation cursor the API server hands back until it runs out. Failures of a
//! single round are classified: access denial aborts the whole listing, an
//! unserved resource type ends it quietly, anything else is reported with the
//! request context attached.

use std::{error::Error as StdError, fmt, future::Future};

use kube::{
	api::{Api, DynamicObject, ListParams, TypeMeta},
	Client,
};
use thiserror::Error;
use tracing::instrument;

use super::descriptor::ResourceDescriptor;

/// Number of objects requested per round.
pub const PAGE_SIZE: u32 = 250;

pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Where a single list request is addressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestScope {
	/// Whole cluster: cluster-scoped types, or namespaced types across all namespaces.
	Cluster,
	/// A single namespace.
	Namespace(String),
}

impl RequestScope {
	/// A request is cluster-scoped when the type is not namespaced or no namespace was given.
	pub fn for_request(descriptor: &ResourceDescriptor, namespace: Option<&str>) -> Self {
		match namespace {
			Some(ns) if descriptor.namespaced() && !ns.is_empty() => Self::Namespace(ns.to_string()),
			_ => Self::Cluster,
		}
	}

	pub fn namespace(&self) -> Option<&str> {
		match self {
			Self::Cluster => None,
			Self::Namespace(ns) => Some(ns),
		}
	}
}

impl fmt::Display for RequestScope {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Cluster => write!(f, "at the cluster scope"),
			Self::Namespace(ns) => write!(f, "in the namespace \"{ns}\""),
		}
	}
}

/// One round of a listing.
#[derive(Debug, Default)]
pub struct Page {
	pub items: Vec<DynamicObject>,
	/// Cursor for the next round. Absent or empty means there are no more pages.
	pub continue_token: Option<String>,
}

/// Failure of a single round, already classified.
#[derive(Debug, Error)]
pub enum FetchError {
	#[error("access denied")]
	Forbidden(#[source] BoxError),

	#[error("resource type is not served")]
	NotFound,

	#[error("list request failed")]
	Other(#[source] BoxError),
}

impl From<kube::Error> for FetchError {
	fn from(err: kube::Error) -> Self {
		let code = match &err {
			kube::Error::Api(response) => Some(response.code),
			_ => None,
		};
		match code {
			Some(403) => Self::Forbidden(Box::new(err)),
			Some(404) => Self::NotFound,
			_ => Self::Other(Box::new(err)),
		}
	}
}

/// Performs single bounded list requests.
pub trait PageSource {
	fn fetch_page(
		&self,
		descriptor: &ResourceDescriptor,
		scope: &RequestScope,
		continue_token: Option<&str>,
	) -> impl Future<Output = Result<Page, FetchError>> + Send;
}

/// Type of the items in a list response: `DeploymentList` holds `Deployment`s.
///
/// Servers leave the type off individual list items.
fn item_types(list: &TypeMeta) -> Option<TypeMeta> {
	let kind = list.kind.strip_suffix("List").filter(|k| !k.is_empty())?;
	Some(TypeMeta {
		api_version: list.api_version.clone(),
		kind: kind.to_string(),
	})
}

/// Page source backed by the dynamic kube API.
#[derive(Clone)]
pub struct KubePageSource {
	client: Client,
}

impl KubePageSource {
	pub fn new(client: Client) -> Self {
		Self { client }
	}
}

impl PageSource for KubePageSource {
	async fn fetch_page(
		&self,
		descriptor: &ResourceDescriptor,
		scope: &RequestScope,
		continue_token: Option<&str>,
	) -> Result<Page, FetchError> {
		let ar = descriptor.api_resource();
		let api: Api<DynamicObject> = match scope {
			RequestScope::Cluster => Api::all_with(self.client.clone(), &ar),
			RequestScope::Namespace(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
		};

		let mut params = ListParams::default().limit(PAGE_SIZE);
		if let Some(token) = continue_token {
			params = params.continue_token(token);
		}

		let list = api.list(&params).await?;
		let item_types = item_types(&list.types);
		let items = list
			.items
			.into_iter()
			.map(|mut item| {
				if item.types.is_none() {
					item.types.clone_from(&item_types);
				}
				item
			})
			.collect();
		Ok(Page {
			continue_token: list.metadata.continue_,
			items,
		})
	}
}

/// Errors returned by [`PaginatedLister`].
#[derive(Debug, Error)]
pub enum ListError {
	#[error("no access to list {descriptor} {scope}")]
	Forbidden {
		descriptor: ResourceDescriptor,
		scope: RequestScope,
		#[source]
		source: BoxError,
	},

	#[error("failed to list resource type \"{resource}\" in API group \"{group}\" {scope}")]
	Failed {
		resource: String,
		group: String,
		scope: RequestScope,
		#[source]
		source: BoxError,
	},
}

/// Retrieves complete object sets for a resource type.
pub struct PaginatedLister<S = KubePageSource> {
	source: S,
}

impl PaginatedLister<KubePageSource> {
	pub fn new(client: Client) -> Self {
		Self::with_source(KubePageSource::new(client))
	}
}

impl<S: PageSource> PaginatedLister<S> {
	pub fn with_source(source: S) -> Self {
		Self { source }
	}

	pub fn source(&self) -> &S {
		&self.source
	}

	/// List every object of `descriptor`, in page arrival order.
	///
	/// `None` or an empty namespace lists across the whole cluster.
	#[instrument(skip_all, fields(descriptor = %descriptor, namespace = namespace.unwrap_or_default()))]
	pub async fn list(
		&self,
		descriptor: &ResourceDescriptor,
		namespace: Option<&str>,
	) -> Result<Vec<DynamicObject>, ListError> {
		let scope = RequestScope::for_request(descriptor, namespace);
		let mut items = Vec::new();
		let mut next: Option<String> = None;

		loop {
			let page = match self
				.source
				.fetch_page(descriptor, &scope, next.as_deref())
				.await
			{
				Ok(page) => page,
				Err(FetchError::Forbidden(source)) => {
					tracing::debug!(%scope, %descriptor, "no access to list resource");
					return Err(ListError::Forbidden {
						descriptor: descriptor.clone(),
						scope,
						source,
					});
				}
				Err(FetchError::NotFound) => {
					tracing::debug!(%scope, %descriptor, "resource type not served, ending listing");
					break;
				}
				Err(FetchError::Other(source)) => {
					return Err(ListError::Failed {
						resource: descriptor.resource().to_string(),
						group: descriptor.group().to_string(),
						scope,
						source,
					});
				}
			};

			items.extend(page.items);
			match page.continue_token {
				Some(token) if !token.is_empty() => next = Some(token),
				_ => break,
			}
		}

		tracing::debug!(count = items.len(), %scope, %descriptor, "got objects");
		Ok(items)
	}

	/// List several resource types one after another and concatenate the results.
	///
	/// Stops at the first failing type.
	pub async fn list_all(
		&self,
		descriptors: &[ResourceDescriptor],
		namespace: Option<&str>,
	) -> Result<Vec<DynamicObject>, ListError> {
		let mut out = Vec::new();
		for descriptor in descriptors {
			out.extend(self.list(descriptor, namespace).await?);
		}
		Ok(out)
	}
}

#[cfg(test)]
mod tests {
	use std::{io, sync::Mutex};

	use assert_matches::assert_matches;
	use rstest::rstest;

	use super::*;

	/// Any listing of the fixtures below finishes well within this many rounds.
	const MAX_ROUNDS: usize = 16;

	#[test]
	fn test_item_types_from_list_kind() {
		let list = TypeMeta {
			api_version: "apps/v1".to_string(),
			kind: "DeploymentList".to_string(),
		};
		let types = item_types(&list).unwrap();
		assert_eq!(types.api_version, "apps/v1");
		assert_eq!(types.kind, "Deployment");

		for kind in ["List", "Status", ""] {
			let list = TypeMeta {
				api_version: "v1".to_string(),
				kind: kind.to_string(),
			};
			assert!(item_types(&list).is_none(), "{kind}");
		}
	}

	#[derive(Clone, Copy)]
	enum Failure {
		Forbidden,
		NotFound,
		Other,
	}

	/// In-memory page source that serves `objects` with offset cursors.
	struct FakeSource {
		objects: Vec<DynamicObject>,
		requests: Mutex<Vec<(RequestScope, Option<String>)>>,
		fail_at: Option<(usize, Failure)>,
		endless: bool,
		empty_final_token: bool,
	}

	impl FakeSource {
		fn with_objects(descriptor: &ResourceDescriptor, count: usize) -> Self {
			let ar = descriptor.api_resource();
			Self {
				objects: (0..count)
					.map(|i| DynamicObject::new(&format!("obj-{i:04}"), &ar))
					.collect(),
				requests: Mutex::new(Vec::new()),
				fail_at: None,
				endless: false,
				empty_final_token: false,
			}
		}

		fn failing_at(mut self, round: usize, failure: Failure) -> Self {
			self.fail_at = Some((round, failure));
			self
		}

		fn requests(&self) -> Vec<(RequestScope, Option<String>)> {
			self.requests.lock().unwrap().clone()
		}
	}

	impl PageSource for FakeSource {
		async fn fetch_page(
			&self,
			_descriptor: &ResourceDescriptor,
			scope: &RequestScope,
			continue_token: Option<&str>,
		) -> Result<Page, FetchError> {
			let round = {
				let mut requests = self.requests.lock().unwrap();
				requests.push((scope.clone(), continue_token.map(str::to_owned)));
				requests.len() - 1
			};
			assert!(round < MAX_ROUNDS, "pagination did not terminate");

			if let Some((at, failure)) = self.fail_at {
				if at == round {
					let source: BoxError = Box::new(io::Error::other("backing store failure"));
					return Err(match failure {
						Failure::Forbidden => FetchError::Forbidden(source),
						Failure::NotFound => FetchError::NotFound,
						Failure::Other => FetchError::Other(source),
					});
				}
			}

			let len = self.objects.len();
			let offset = continue_token
				.map(|t| t.parse::<usize>().unwrap())
				.unwrap_or(0)
				.min(len);
			let end = (offset + PAGE_SIZE as usize).min(len);

			let continue_token = if self.endless || end < len {
				Some(end.to_string())
			} else if self.empty_final_token {
				Some(String::new())
			} else {
				None
			};

			Ok(Page {
				items: self.objects[offset..end].to_vec(),
				continue_token,
			})
		}
	}

	fn names(objects: &[DynamicObject]) -> Vec<String> {
		objects
			.iter()
			.map(|o| o.metadata.name.clone().unwrap())
			.collect()
	}

	#[tokio::test]
	async fn test_lists_deployments_in_two_rounds() {
		let descriptor = ResourceDescriptor::deployments();
		let lister = PaginatedLister::with_source(FakeSource::with_objects(&descriptor, 300));

		let objects = lister.list(&descriptor, Some("demo")).await.unwrap();

		assert_eq!(objects.len(), 300);
		assert_eq!(names(&objects), names(&lister.source().objects));

		let requests = lister.source().requests();
		assert_eq!(
			requests,
			vec![
				(RequestScope::Namespace("demo".into()), None),
				(RequestScope::Namespace("demo".into()), Some("250".into())),
			]
		);
	}

	#[rstest]
	#[case(0, 1)]
	#[case(1, 1)]
	#[case(249, 1)]
	#[case(250, 1)]
	#[case(251, 2)]
	#[case(1000, 4)]
	#[case(1001, 5)]
	#[tokio::test]
	async fn test_pagination_completeness(#[case] count: usize, #[case] rounds: usize) {
		let descriptor = ResourceDescriptor::pods();
		let lister = PaginatedLister::with_source(FakeSource::with_objects(&descriptor, count));

		let objects = lister.list(&descriptor, Some("default")).await.unwrap();

		assert_eq!(objects.len(), count);
		assert_eq!(lister.source().requests().len(), rounds);
		assert!(rounds <= count.div_ceil(PAGE_SIZE as usize) + 1);
	}

	#[tokio::test]
	async fn test_empty_continue_token_ends_listing() {
		let descriptor = ResourceDescriptor::services();
		let mut source = FakeSource::with_objects(&descriptor, 10);
		source.empty_final_token = true;
		let lister = PaginatedLister::with_source(source);

		let objects = lister.list(&descriptor, Some("default")).await.unwrap();

		assert_eq!(objects.len(), 10);
		assert_eq!(lister.source().requests().len(), 1);
	}

	#[tokio::test]
	#[should_panic(expected = "pagination did not terminate")]
	async fn test_endless_cursor_is_caught_by_round_bound() {
		let descriptor = ResourceDescriptor::pods();
		let mut source = FakeSource::with_objects(&descriptor, 10);
		source.endless = true;
		let lister = PaginatedLister::with_source(source);

		let _ = lister.list(&descriptor, None).await;
	}

	#[rstest]
	#[case::cluster_type_ignores_namespace(ResourceDescriptor::persistent_volumes(), Some("demo"), RequestScope::Cluster)]
	#[case::namespaced_without_namespace(ResourceDescriptor::deployments(), None, RequestScope::Cluster)]
	#[case::namespaced_with_empty_namespace(ResourceDescriptor::deployments(), Some(""), RequestScope::Cluster)]
	#[case::namespaced_with_namespace(
		ResourceDescriptor::deployments(),
		Some("demo"),
		RequestScope::Namespace("demo".into())
	)]
	#[tokio::test]
	async fn test_scope_selection(
		#[case] descriptor: ResourceDescriptor,
		#[case] namespace: Option<&str>,
		#[case] expected: RequestScope,
	) {
		let lister = PaginatedLister::with_source(FakeSource::with_objects(&descriptor, 1));

		lister.list(&descriptor, namespace).await.unwrap();

		let requests = lister.source().requests();
		assert_eq!(requests.len(), 1);
		assert_eq!(requests[0].0, expected);
	}

	#[tokio::test]
	async fn test_not_found_on_first_round_is_empty() {
		let descriptor = ResourceDescriptor::new("example.com", "v1", "widgets", true);
		let source = FakeSource::with_objects(&descriptor, 5).failing_at(0, Failure::NotFound);
		let lister = PaginatedLister::with_source(source);

		let objects = lister.list(&descriptor, Some("demo")).await.unwrap();
		assert!(objects.is_empty());
	}

	#[tokio::test]
	async fn test_not_found_mid_listing_keeps_accumulated() {
		let descriptor = ResourceDescriptor::pods();
		let source = FakeSource::with_objects(&descriptor, 600).failing_at(1, Failure::NotFound);
		let lister = PaginatedLister::with_source(source);

		let objects = lister.list(&descriptor, Some("demo")).await.unwrap();
		assert_eq!(objects.len(), 250);
	}

	#[tokio::test]
	async fn test_forbidden_discards_earlier_rounds() {
		let descriptor = ResourceDescriptor::pods();
		let source = FakeSource::with_objects(&descriptor, 600).failing_at(1, Failure::Forbidden);
		let lister = PaginatedLister::with_source(source);

		let result = lister.list(&descriptor, Some("demo")).await;
		assert_matches!(
			result,
			Err(ListError::Forbidden { descriptor: d, scope: RequestScope::Namespace(ns), .. })
				if d == descriptor && ns == "demo"
		);
		assert_eq!(lister.source().requests().len(), 2);
	}

	#[tokio::test]
	async fn test_other_failure_carries_context() {
		let descriptor = ResourceDescriptor::deployments();
		let source = FakeSource::with_objects(&descriptor, 10).failing_at(0, Failure::Other);
		let lister = PaginatedLister::with_source(source);

		let err = lister.list(&descriptor, Some("demo")).await.unwrap_err();
		assert_eq!(
			err.to_string(),
			"failed to list resource type \"deployments\" in API group \"apps\" in the namespace \"demo\""
		);

		let source = FakeSource::with_objects(&descriptor, 10).failing_at(0, Failure::Other);
		let lister = PaginatedLister::with_source(source);
		let err = lister.list(&descriptor, None).await.unwrap_err();
		assert_eq!(
			err.to_string(),
			"failed to list resource type \"deployments\" in API group \"apps\" at the cluster scope"
		);
	}

	#[tokio::test]
	async fn test_list_all_concatenates_in_order() {
		let descriptor = ResourceDescriptor::pods();
		let lister = PaginatedLister::with_source(FakeSource::with_objects(&descriptor, 3));

		let objects = lister
			.list_all(
				&[ResourceDescriptor::pods(), ResourceDescriptor::services()],
				Some("demo"),
			)
			.await
			.unwrap();

		assert_eq!(objects.len(), 6);
		assert_eq!(lister.source().requests().len(), 2);
	}
}
