//! Resolving an environment's cluster from kubeconfig.

use std::{fmt, time::Duration};

use kube::{
	config::{KubeConfigOptions, Kubeconfig, KubeconfigError},
	Config,
};
use thiserror::Error;
use tracing::instrument;

use super::Info;
use crate::spec::Spec;

const READ_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ConnectionError {
	#[error(
		"your Environment's spec.json seems incomplete:\n  \
		 * spec.apiServer|spec.contextNames: No Kubernetes cluster endpoint or context names specified. \
		 Please specify only one.\n\n\
		 Please see https://tanka.dev/config for reference"
	)]
	IncompleteSpec,

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

	#[error("connecting to the cluster")]
	Kube(#[source] Box<kube::Error>),
}

impl From<kube::Error> for ConnectionError {
	fn from(err: kube::Error) -> Self {
		ConnectionError::Kube(Box::new(err))
	}
}

/// An authenticated client for the cluster an environment points at.
#[derive(Clone)]
pub struct ClusterConnection {
	client: kube::Client,
	info: Info,
}

impl fmt::Debug for ClusterConnection {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ClusterConnection")
			.field("info", &self.info)
			.finish_non_exhaustive()
	}
}

impl ClusterConnection {
	/// Connect using `$KUBECONFIG` (or `~/.kube/config`).
	#[instrument(skip_all)]
	pub async fn from_spec(spec: &Spec) -> Result<Self, ConnectionError> {
		Self::from_spec_with_kubeconfig(spec, Kubeconfig::read()?).await
	}

	/// Connect to the cluster `spec` selects from `kubeconfig`.
	///
	/// `spec.apiServer` picks the first context whose cluster has that server
	/// URL. Otherwise the first of `spec.contextNames` present in kubeconfig
	/// is used.
	#[instrument(skip_all)]
	pub async fn from_spec_with_kubeconfig(
		spec: &Spec,
		kubeconfig: Kubeconfig,
	) -> Result<Self, ConnectionError> {
		let target = Target::select(&kubeconfig, spec)?;
		tracing::debug!(
			context = %target.context,
			cluster = %target.cluster,
			"selected kubeconfig context"
		);

		let mut config = Config::from_custom_kubeconfig(
			kubeconfig,
			&KubeConfigOptions {
				context: Some(target.context.clone()),
				..Default::default()
			},
		)
		.await?;
		config.read_timeout = Some(READ_TIMEOUT);
		let endpoint = target
			.server
			.unwrap_or_else(|| config.cluster_url.to_string());

		let client = kube::Client::try_from(config)?;
		let server_version = client.apiserver_version().await?;
		tracing::debug!(
			major = %server_version.major,
			minor = %server_version.minor,
			"connected"
		);

		Ok(Self {
			client,
			info: Info {
				cluster_name: target.cluster,
				endpoint,
				context_name: target.context,
				server_version,
			},
		})
	}

	pub fn client(&self) -> &kube::Client {
		&self.client
	}

	pub fn info(&self) -> &Info {
		&self.info
	}
}

/// The kubeconfig entries an environment resolved to.
#[derive(Debug, PartialEq, Eq)]
struct Target {
	context: String,
	cluster: String,
	server: Option<String>,
}

impl Target {
	fn of_context(kubeconfig: &Kubeconfig, context: &str) -> Self {
		let cluster = kubeconfig
			.contexts
			.iter()
			.find(|named| named.name == context)
			.and_then(|named| named.context.as_ref())
			.map(|ctx| ctx.cluster.clone())
			.unwrap_or_default();
		let server = kubeconfig
			.clusters
			.iter()
			.find(|named| named.name == cluster)
			.and_then(|named| named.cluster.as_ref())
			.and_then(|c| c.server.clone());
		Self {
			context: context.to_string(),
			cluster,
			server,
		}
	}

	/// First context whose cluster serves `api_server`.
	fn by_server(kubeconfig: &Kubeconfig, api_server: &str) -> Result<Self, ConnectionError> {
		let cluster = kubeconfig
			.clusters
			.iter()
			.filter(|named| {
				named
					.cluster
					.as_ref()
					.and_then(|c| c.server.as_deref())
					== Some(api_server)
			})
			.map(|named| named.name.as_str())
			.next()
			.ok_or_else(|| ConnectionError::ClusterNotFound(api_server.to_string()))?;

		kubeconfig
			.contexts
			.iter()
			.filter(|named| named.context.as_ref().is_some_and(|ctx| ctx.cluster == cluster))
			.map(|named| Self::of_context(kubeconfig, &named.name))
			.next()
			.ok_or_else(|| ConnectionError::ContextNotFoundForCluster(cluster.to_string()))
	}

	/// First of `candidates` that kubeconfig defines.
	fn by_names(kubeconfig: &Kubeconfig, candidates: &[String]) -> Result<Self, ConnectionError> {
		if candidates.is_empty() {
			return Err(ConnectionError::EmptyContextNames);
		}
		candidates
			.iter()
			.find(|candidate| kubeconfig.contexts.iter().any(|named| &named.name == *candidate))
			.map(|context| Self::of_context(kubeconfig, context))
			.ok_or_else(|| ConnectionError::ContextNotFound(candidates.to_vec()))
	}

	fn select(kubeconfig: &Kubeconfig, spec: &Spec) -> Result<Self, ConnectionError> {
		match (&spec.api_server, &spec.context_names) {
			(Some(api_server), _) => Self::by_server(kubeconfig, api_server),
			(None, Some(names)) => Self::by_names(kubeconfig, names),
			(None, None) => Err(ConnectionError::IncompleteSpec),
		}
	}
}
