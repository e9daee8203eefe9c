//! Apply order.
//!
//! Kinds other objects depend on (namespaces, CRDs, RBAC, config) come first,
//! workloads after them. Kinds missing from [`KIND_ORDER`] follow all listed
//! ones, alphabetically.

use std::cmp::Ordering;

use crate::manifest::Manifest;

pub const KIND_ORDER: &[&str] = &[
	"Namespace",
	"ResourceQuota",
	"StorageClass",
	"CustomResourceDefinition",
	"MutatingWebhookConfiguration",
	"ServiceAccount",
	"PodSecurityPolicy",
	"Role",
	"ClusterRole",
	"RoleBinding",
	"ClusterRoleBinding",
	"ConfigMap",
	"Secret",
	"Service",
	"LimitRange",
	"PriorityClass",
	"Deployment",
	"StatefulSet",
	"CronJob",
	"PodDisruptionBudget",
];

fn kind_rank(kind: &str) -> usize {
	KIND_ORDER
		.iter()
		.position(|k| *k == kind)
		.unwrap_or(KIND_ORDER.len())
}

/// Total order on manifests: kind rank, kind, namespace, name, generateName
/// (only when both names are empty), apiVersion.
pub fn compare(a: &Manifest, b: &Manifest) -> Ordering {
	let (ma, mb) = (a.metadata(), b.metadata());

	kind_rank(a.kind())
		.cmp(&kind_rank(b.kind()))
		.then_with(|| a.kind().cmp(b.kind()))
		.then_with(|| ma.namespace().cmp(mb.namespace()))
		.then_with(|| ma.name().cmp(mb.name()))
		.then_with(|| {
			if ma.name().is_empty() && mb.name().is_empty() {
				ma.generate_name().cmp(mb.generate_name())
			} else {
				Ordering::Equal
			}
		})
		.then_with(|| a.api_version().cmp(b.api_version()))
}

/// Stable in-place sort by [`compare`].
pub fn sort(manifests: &mut [Manifest]) {
	manifests.sort_by(compare);
}
