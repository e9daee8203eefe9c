//! Catalog of API resource kinds.
//!
//! Either reported by the cluster's discovery API or taken from the static
//! table of built-in Kubernetes kinds when no cluster is at hand.

use serde::{Deserialize, Serialize};

use crate::manifest::Manifest;

/// One resource type the API server knows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
	pub api_group: String,
	pub kind: String,
	/// Plural resource name as used in API paths.
	pub name: String,
	pub namespaced: bool,
	#[serde(default)]
	pub short_names: Vec<String>,
	#[serde(default)]
	pub verbs: Vec<String>,
}

impl Resource {
	/// `Kind.group`, or just `Kind` for the core group.
	pub fn fqn(&self) -> String {
		format!("{}.{}", self.kind, self.api_group)
			.trim_end_matches('.')
			.to_string()
	}

	pub fn supports(&self, verb: &str) -> bool {
		self.verbs.iter().any(|v| v == verb)
	}
}

/// Set of resource types, in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
	resources: Vec<Resource>,
}

impl Catalog {
	pub fn new(resources: Vec<Resource>) -> Self {
		Self { resources }
	}

	/// The standard kinds of a vanilla cluster.
	pub fn builtin() -> Self {
		let resources = BUILTIN
			.iter()
			.map(|&(api_group, kind, name, namespaced, short_names)| {
				let verbs = match kind {
					"ComponentStatus" => READ_VERBS,
					"Binding" => &["create"][..],
					_ => STANDARD_VERBS,
				};
				Resource {
					api_group: api_group.to_string(),
					kind: kind.to_string(),
					name: name.to_string(),
					namespaced,
					short_names: short_names.iter().map(|s| s.to_string()).collect(),
					verbs: verbs.iter().map(|s| s.to_string()).collect(),
				}
			})
			.collect();
		Self { resources }
	}

	/// Whether objects like `manifest` live in a namespace.
	///
	/// Looked up by kind only; unknown kinds are treated as cluster-wide.
	pub fn namespaced(&self, manifest: &Manifest) -> bool {
		self.lookup(manifest.kind()).is_some_and(|r| r.namespaced)
	}

	/// Find a resource by `Kind` or by its fully qualified `Kind.group`.
	pub fn lookup(&self, kind: &str) -> Option<&Resource> {
		self.resources
			.iter()
			.find(|r| r.fqn() == kind)
			.or_else(|| self.resources.iter().find(|r| r.kind == kind))
	}

	/// Fully qualified names of every kind that can be listed.
	pub fn listable_kinds(&self) -> Vec<String> {
		let mut kinds: Vec<String> = self
			.resources
			.iter()
			.filter(|r| r.supports("list"))
			.map(Resource::fqn)
			.collect();
		kinds.dedup();
		kinds
	}

	pub fn iter(&self) -> impl Iterator<Item = &Resource> {
		self.resources.iter()
	}

	pub fn len(&self) -> usize {
		self.resources.len()
	}

	pub fn is_empty(&self) -> bool {
		self.resources.is_empty()
	}
}

impl FromIterator<Resource> for Catalog {
	fn from_iter<I: IntoIterator<Item = Resource>>(iter: I) -> Self {
		Self::new(iter.into_iter().collect())
	}
}

const STANDARD_VERBS: &[&str] = &[
	"create",
	"delete",
	"deletecollection",
	"get",
	"list",
	"patch",
	"update",
	"watch",
];

const READ_VERBS: &[&str] = &["get", "list"];

/// (group, kind, plural, namespaced, short names)
type BuiltinEntry = (
	&'static str,
	&'static str,
	&'static str,
	bool,
	&'static [&'static str],
);

#[rustfmt::skip]
const BUILTIN: &[BuiltinEntry] = &[
	("", "Binding", "bindings", true, &[]),
	("", "ComponentStatus", "componentstatuses", false, &["cs"]),
	("", "ConfigMap", "configmaps", true, &["cm"]),
	("", "Endpoints", "endpoints", true, &["ep"]),
	("", "Event", "events", true, &["ev"]),
	("", "LimitRange", "limitranges", true, &["limits"]),
	("", "Namespace", "namespaces", false, &["ns"]),
	("", "Node", "nodes", false, &["no"]),
	("", "PersistentVolumeClaim", "persistentvolumeclaims", true, &["pvc"]),
	("", "PersistentVolume", "persistentvolumes", false, &["pv"]),
	("", "Pod", "pods", true, &["po"]),
	("", "PodTemplate", "podtemplates", true, &[]),
	("", "ReplicationController", "replicationcontrollers", true, &["rc"]),
	("", "ResourceQuota", "resourcequotas", true, &["quota"]),
	("", "Secret", "secrets", true, &[]),
	("", "ServiceAccount", "serviceaccounts", true, &["sa"]),
	("", "Service", "services", true, &["svc"]),
	("admissionregistration.k8s.io", "MutatingWebhookConfiguration", "mutatingwebhookconfigurations", false, &[]),
	("admissionregistration.k8s.io", "ValidatingWebhookConfiguration", "validatingwebhookconfigurations", false, &[]),
	("admissionregistration.k8s.io", "ValidatingAdmissionPolicy", "validatingadmissionpolicies", false, &[]),
	("admissionregistration.k8s.io", "ValidatingAdmissionPolicyBinding", "validatingadmissionpolicybindings", false, &[]),
	("apiextensions.k8s.io", "CustomResourceDefinition", "customresourcedefinitions", false, &["crd", "crds"]),
	("apiregistration.k8s.io", "APIService", "apiservices", false, &[]),
	("apps", "ControllerRevision", "controllerrevisions", true, &[]),
	("apps", "DaemonSet", "daemonsets", true, &["ds"]),
	("apps", "Deployment", "deployments", true, &["deploy"]),
	("apps", "ReplicaSet", "replicasets", true, &["rs"]),
	("apps", "StatefulSet", "statefulsets", true, &["sts"]),
	("autoscaling", "HorizontalPodAutoscaler", "horizontalpodautoscalers", true, &["hpa"]),
	("batch", "CronJob", "cronjobs", true, &["cj"]),
	("batch", "Job", "jobs", true, &[]),
	("certificates.k8s.io", "CertificateSigningRequest", "certificatesigningrequests", false, &["csr"]),
	("coordination.k8s.io", "Lease", "leases", true, &[]),
	("discovery.k8s.io", "EndpointSlice", "endpointslices", true, &[]),
	("events.k8s.io", "Event", "events", true, &["ev"]),
	("flowcontrol.apiserver.k8s.io", "FlowSchema", "flowschemas", false, &[]),
	("flowcontrol.apiserver.k8s.io", "PriorityLevelConfiguration", "prioritylevelconfigurations", false, &[]),
	("networking.k8s.io", "IngressClass", "ingressclasses", false, &[]),
	("networking.k8s.io", "Ingress", "ingresses", true, &["ing"]),
	("networking.k8s.io", "NetworkPolicy", "networkpolicies", true, &["netpol"]),
	("node.k8s.io", "RuntimeClass", "runtimeclasses", false, &[]),
	("policy", "PodDisruptionBudget", "poddisruptionbudgets", true, &["pdb"]),
	("rbac.authorization.k8s.io", "ClusterRoleBinding", "clusterrolebindings", false, &[]),
	("rbac.authorization.k8s.io", "ClusterRole", "clusterroles", false, &[]),
	("rbac.authorization.k8s.io", "RoleBinding", "rolebindings", true, &[]),
	("rbac.authorization.k8s.io", "Role", "roles", true, &[]),
	("scheduling.k8s.io", "PriorityClass", "priorityclasses", false, &["pc"]),
	("storage.k8s.io", "CSIDriver", "csidrivers", false, &[]),
	("storage.k8s.io", "CSINode", "csinodes", false, &[]),
	("storage.k8s.io", "CSIStorageCapacity", "csistoragecapacities", true, &[]),
	("storage.k8s.io", "StorageClass", "storageclasses", false, &["sc"]),
	("storage.k8s.io", "VolumeAttachment", "volumeattachments", false, &[]),
];
