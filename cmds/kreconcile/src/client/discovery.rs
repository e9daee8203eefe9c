//! API resource discovery.
//!
//! Queries the cluster's discovery API once and answers lookups by
//! apiVersion/kind, by `Kind` or by `Kind.group`.

use std::collections::HashMap;

use kube::{
	core::GroupVersionKind,
	discovery::{ApiCapabilities, ApiResource, Scope},
	Discovery,
};
use thiserror::Error;
use tracing::instrument;

use crate::resources::{Catalog, Resource};

#[derive(Debug, Error)]
pub enum DiscoveryError {
	#[error("full API discovery failed")]
	FullDiscovery(#[source] Box<kube::Error>),
}

/// Create a GroupVersionKind from an apiVersion string and kind.
pub fn gvk_from_api_version(api_version: &str, kind: &str) -> GroupVersionKind {
	let (group, version) = api_version.split_once('/').unwrap_or(("", api_version));
	GroupVersionKind::gvk(group, version, kind)
}

/// One resource type with its capabilities.
#[derive(Debug, Clone)]
pub struct DiscoveredResource {
	pub api_resource: ApiResource,
	pub capabilities: ApiCapabilities,
}

impl DiscoveredResource {
	pub fn namespaced(&self) -> bool {
		matches!(self.capabilities.scope, Scope::Namespaced)
	}

	/// `Kind.group`, or `Kind` for the core group.
	pub fn fqn(&self) -> String {
		self.to_resource().fqn()
	}

	fn to_resource(&self) -> Resource {
		Resource {
			api_group: self.api_resource.group.clone(),
			kind: self.api_resource.kind.clone(),
			name: self.api_resource.plural.clone(),
			namespaced: self.namespaced(),
			short_names: Vec::new(),
			verbs: self.capabilities.operations.clone(),
		}
	}
}

/// Cached discovery results.
#[derive(Debug, Clone, Default)]
pub struct ApiResourceCache {
	/// Groups alphabetically (core first), preferred version first.
	resources: Vec<DiscoveredResource>,
	by_gvk: HashMap<GroupVersionKind, usize>,
}

impl ApiResourceCache {
	/// Query the cluster.
	///
	/// Uses aggregated discovery (two requests, k8s 1.26+), falling back to
	/// querying every group version.
	#[instrument(skip(client))]
	pub async fn build(client: &kube::Client) -> Result<Self, DiscoveryError> {
		match Discovery::new(client.clone()).run_aggregated().await {
			Ok(discovery) => {
				tracing::debug!("using aggregated discovery");
				Ok(Self::from_discovery(&discovery))
			}
			Err(e) => {
				tracing::debug!(error = %e, "aggregated discovery not available, using full discovery");
				let discovery = Discovery::new(client.clone())
					.run()
					.await
					.map_err(|e| DiscoveryError::FullDiscovery(Box::new(e)))?;
				Ok(Self::from_discovery(&discovery))
			}
		}
	}

	fn from_discovery(discovery: &Discovery) -> Self {
		let resources = discovery
			.groups_alphabetical()
			.into_iter()
			.flat_map(|group| {
				// Every version, not just the preferred one, so manifests using
				// older apiVersions resolve too.
				group
					.versions()
					.flat_map(|version| group.versioned_resources(version))
					.collect::<Vec<_>>()
			})
			.map(|(api_resource, capabilities)| DiscoveredResource {
				api_resource,
				capabilities,
			});
		Self::from_resources(resources)
	}

	pub fn from_resources(resources: impl IntoIterator<Item = DiscoveredResource>) -> Self {
		let mut cache = Self::default();
		for resource in resources {
			let ar = &resource.api_resource;
			let gvk = GroupVersionKind::gvk(&ar.group, &ar.version, &ar.kind);
			if cache.by_gvk.contains_key(&gvk) {
				continue;
			}
			cache.by_gvk.insert(gvk, cache.resources.len());
			cache.resources.push(resource);
		}
		cache
	}

	/// Look up the exact apiVersion/kind of a manifest.
	pub fn lookup(&self, api_version: &str, kind: &str) -> Option<&DiscoveredResource> {
		let index = self.by_gvk.get(&gvk_from_api_version(api_version, kind))?;
		self.resources.get(*index)
	}

	/// Look up a resource by `Kind.group` or, failing that, by `Kind`.
	pub fn lookup_kind(&self, kind: &str) -> Option<&DiscoveredResource> {
		self.resources
			.iter()
			.find(|r| r.fqn() == kind)
			.or_else(|| self.resources.iter().find(|r| r.api_resource.kind == kind))
	}

	/// Resolve a manifest's type, accepting versions the cluster does not
	/// list as long as the kind is known.
	pub fn resolve(&self, api_version: &str, kind: &str) -> Option<&DiscoveredResource> {
		self.lookup(api_version, kind).or_else(|| {
			let group = gvk_from_api_version(api_version, kind).group;
			self.resources
				.iter()
				.find(|r| r.api_resource.group == group && r.api_resource.kind == kind)
		})
	}

	/// One catalog entry per group and kind, at the preferred version.
	pub fn catalog(&self) -> Catalog {
		let mut seen = std::collections::HashSet::new();
		self.resources
			.iter()
			.filter(|r| seen.insert((r.api_resource.group.clone(), r.api_resource.kind.clone())))
			.map(DiscoveredResource::to_resource)
			.collect()
	}
}
