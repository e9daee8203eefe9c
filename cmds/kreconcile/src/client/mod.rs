//! Access to a Kubernetes cluster.
//!
//! Everything that talks to a cluster goes through [`Client`], so the diff and
//! reconcile logic can run against the in-memory client in tests.

mod connection;
mod discovery;
mod kube_client;

use std::{
	collections::{BTreeMap, BTreeSet},
	sync::Arc,
};

use async_trait::async_trait;
use bon::Builder;
use k8s_openapi::apimachinery::pkg::version::Info as ServerVersion;
use thiserror::Error;

pub use self::{
	connection::{ClusterConnection, ConnectionError},
	discovery::{ApiResourceCache, DiscoveredResource, DiscoveryError},
	kube_client::KubeClient,
};
use crate::{
	fanout::FanoutError,
	manifest::{List, Manifest, SchemaError},
	resources::Catalog,
	yaml::YamlError,
};

/// Name this tool registers as field manager.
pub const FIELD_MANAGER: &str = "kreconcile";

#[derive(Debug, Error)]
pub enum ClientError {
	#[error("{kind}/{name} not found")]
	NotFound {
		namespace: String,
		kind: String,
		name: String,
	},

	#[error("the server doesn't have a resource type `{kind}`")]
	UnknownResource { kind: String },

	#[error("discovering API resources")]
	Discovery(#[source] Box<DiscoveryError>),

	#[error("{action} {target}")]
	Api {
		action: &'static str,
		target: String,
		#[source]
		source: Box<kube::Error>,
	},

	#[error("converting {target}")]
	Conversion {
		target: String,
		#[source]
		source: serde_json::Error,
	},

	#[error("cluster returned an invalid object")]
	Invalid(#[from] SchemaError),

	#[error("rendering YAML")]
	Yaml(#[source] YamlError),

	#[error("running concurrent requests")]
	Batch(#[source] Box<FanoutError<ClientError>>),

	#[error(transparent)]
	Other(Box<dyn std::error::Error + Send + Sync>),
}

impl ClientError {
	pub fn is_not_found(&self) -> bool {
		matches!(self, ClientError::NotFound { .. })
	}
}

impl From<FanoutError<ClientError>> for ClientError {
	fn from(err: FanoutError<ClientError>) -> Self {
		ClientError::Batch(Box::new(err))
	}
}

/// Options for [`Client::apply`].
#[derive(Debug, Clone, Default, Builder)]
pub struct ApplyOpts {
	/// Replace objects the server refuses to patch.
	#[builder(default)]
	pub force: bool,
	/// Reject unknown or duplicate fields instead of dropping them.
	#[builder(default)]
	pub validate: bool,
	/// The user already confirmed this apply.
	#[builder(default)]
	pub auto_approve: bool,
}

/// Options for [`Client::delete`].
#[derive(Debug, Clone, Default, Builder)]
pub struct DeleteOpts {
	/// Delete immediately, without a grace period.
	#[builder(default)]
	pub force: bool,
}

/// Where a client is connected to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Info {
	/// Name of the cluster in kubeconfig.
	pub cluster_name: String,
	/// API server URL.
	pub endpoint: String,
	pub context_name: String,
	pub server_version: ServerVersion,
}

/// Operations on one cluster.
///
/// `kind` arguments are either a plain `Kind` or a fully qualified
/// `Kind.group`. An empty `namespace` means the environment's default
/// namespace for single objects, and all namespaces for listings.
#[async_trait]
pub trait Client: Send + Sync {
	/// Fetch one object. Missing objects are [`ClientError::NotFound`].
	async fn get(&self, namespace: &str, kind: &str, name: &str) -> Result<Manifest, ClientError>;

	/// All objects of `kind` carrying every one of `labels`.
	async fn get_by_labels(
		&self,
		namespace: &str,
		kind: &str,
		labels: &BTreeMap<String, String>,
	) -> Result<List, ClientError>;

	/// Create or update every object, in list order.
	async fn apply(&self, data: &List, opts: &ApplyOpts) -> Result<(), ClientError>;

	async fn delete(
		&self,
		namespace: &str,
		kind: &str,
		name: &str,
		opts: &DeleteOpts,
	) -> Result<(), ClientError>;

	/// Diff `data` against the result of a server-side dry-run apply.
	///
	/// `None` if nothing would change.
	async fn diff_server_side(&self, data: &List) -> Result<Option<String>, ClientError>;

	/// Names of all namespaces on the cluster.
	async fn namespaces(&self) -> Result<BTreeSet<String>, ClientError>;

	/// Resource types the cluster serves.
	async fn resources(&self) -> Result<Catalog, ClientError>;

	fn info(&self) -> Info;
}

pub type SharedClient = Arc<dyn Client>;
