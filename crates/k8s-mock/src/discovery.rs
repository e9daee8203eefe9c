//! Mock Kubernetes API discovery types.

use std::collections::BTreeMap;

/// Discovery mode for the mock server.
#[derive(Clone, Copy, Default)]
pub enum DiscoveryMode {
	/// Support aggregated discovery (APIGroupDiscoveryList).
	#[default]
	Aggregated,
	/// Return 406 for aggregated discovery, forcing fallback to legacy endpoints.
	Legacy,
}

const ALL_VERBS: &[&str] = &[
	"create", "delete", "get", "list", "patch", "update", "watch",
];

/// Resources served by the mock, keyed by group version.
#[derive(Clone)]
pub struct MockDiscovery {
	pub core_resources: Vec<MockApiResource>,
	/// `group/version` to its resources.
	pub group_resources: BTreeMap<String, Vec<MockApiResource>>,
}

impl Default for MockDiscovery {
	fn default() -> Self {
		Self {
			core_resources: vec![
				MockApiResource::namespaced("configmaps", "ConfigMap"),
				MockApiResource::namespaced("secrets", "Secret"),
				MockApiResource::namespaced("services", "Service"),
				MockApiResource::namespaced("serviceaccounts", "ServiceAccount"),
				MockApiResource::namespaced("pods", "Pod"),
				MockApiResource::cluster_scoped("namespaces", "Namespace"),
			],
			group_resources: BTreeMap::from([
				(
					"apps/v1".to_string(),
					vec![
						MockApiResource::namespaced("deployments", "Deployment"),
						MockApiResource::namespaced("statefulsets", "StatefulSet"),
						MockApiResource::namespaced("daemonsets", "DaemonSet"),
					],
				),
				(
					"rbac.authorization.k8s.io/v1".to_string(),
					vec![
						MockApiResource::namespaced("roles", "Role"),
						MockApiResource::cluster_scoped("clusterroles", "ClusterRole"),
					],
				),
			]),
		}
	}
}

impl MockDiscovery {
	fn resources(&self, api_version: &str) -> Option<&[MockApiResource]> {
		if api_version == "v1" {
			Some(&self.core_resources)
		} else {
			self.group_resources.get(api_version).map(Vec::as_slice)
		}
	}

	/// Resource of `kind` in `api_version`.
	pub fn by_kind(&self, api_version: &str, kind: &str) -> Option<&MockApiResource> {
		self.resources(api_version)?.iter().find(|r| r.kind == kind)
	}

	/// Resource served at `/.../{plural}` of `api_version`.
	pub fn by_plural(&self, api_version: &str, plural: &str) -> Option<&MockApiResource> {
		self.resources(api_version)?.iter().find(|r| r.name == plural)
	}
}

/// A mock API resource definition.
#[derive(Clone)]
pub struct MockApiResource {
	/// Plural name used in paths.
	pub name: String,
	pub kind: String,
	pub namespaced: bool,
	pub verbs: Vec<String>,
}

impl MockApiResource {
	fn new(name: &str, kind: &str, namespaced: bool) -> Self {
		Self {
			name: name.to_string(),
			kind: kind.to_string(),
			namespaced,
			verbs: ALL_VERBS.iter().map(|v| v.to_string()).collect(),
		}
	}

	pub fn namespaced(name: &str, kind: &str) -> Self {
		Self::new(name, kind, true)
	}

	pub fn cluster_scoped(name: &str, kind: &str) -> Self {
		Self::new(name, kind, false)
	}
}
