//! Turns an evaluated configuration tree into an apply-ready manifest list.
//!
//! The pipeline is extract, unwrap lists, label, apply resource defaults,
//! namespace, filter and sort. Nothing here talks to a cluster.

mod extract;
mod filter;
mod namespace;
mod sort;

use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;

pub use self::{
	extract::{extract, unwrap_lists, ExtractError, Node, Scalar},
	filter::{BadExpr, Matchers},
	namespace::namespace,
	sort::{compare, sort, KIND_ORDER},
};
use crate::{
	manifest::{List, Manifest},
	resources::Catalog,
	spec::{Environment, ResourceDefaults},
};

pub const METADATA_PREFIX: &str = "tanka.dev";
/// Label identifying the environment that owns an object.
pub const LABEL_ENVIRONMENT: &str = "tanka.dev/environment";
/// Annotation recording where in the tree an object was found.
pub const ANNOTATION_JSONPATH: &str = "tanka.dev/jsonpath";
/// Annotation overriding the catalog's namespaced-ness of an object.
pub const ANNOTATION_NAMESPACED: &str = "tanka.dev/namespaced";

#[derive(Debug, Error)]
pub enum ProcessError {
	#[error("extracting manifests")]
	Extract(#[from] ExtractError),
}

/// Run the full pipeline over `tree`.
#[tracing::instrument(skip_all, fields(env = ?env.metadata.name))]
pub fn process(
	tree: Node,
	env: &Environment,
	catalog: &Catalog,
	matchers: &Matchers,
) -> Result<List, ProcessError> {
	let extracted = unwrap_lists(extract(tree)?)?;
	tracing::debug!(count = extracted.len(), "extracted manifests");

	let env_label = env.spec.inject_labels.then(|| env.name_label());
	let labeled: List = extracted
		.into_iter()
		.map(|(path, mut manifest)| {
			label(&mut manifest, &path, env_label.as_deref());
			apply_resource_defaults(&mut manifest, &env.spec.resource_defaults);
			manifest
		})
		.collect();

	let namespaced = namespace(labeled, &env.spec.namespace, catalog);
	let mut filtered = matchers.filter(namespaced);
	sort(&mut filtered);

	tracing::debug!(count = filtered.len(), "processed manifests");
	Ok(filtered)
}

/// Record the tree path and, if given, the environment label.
fn label(manifest: &mut Manifest, path: &str, env_label: Option<&str>) {
	let mut metadata = manifest.metadata_mut();
	if let Some(env_label) = env_label {
		metadata
			.labels()
			.insert(LABEL_ENVIRONMENT.to_string(), Value::String(env_label.to_string()));
	}
	metadata
		.annotations()
		.insert(ANNOTATION_JSONPATH.to_string(), Value::String(path.to_string()));
}

fn apply_resource_defaults(manifest: &mut Manifest, defaults: &ResourceDefaults) {
	let mut metadata = manifest.metadata_mut();
	if !defaults.annotations.is_empty() {
		insert_missing(metadata.annotations(), &defaults.annotations);
	}
	if !defaults.labels.is_empty() {
		insert_missing(metadata.labels(), &defaults.labels);
	}
}

fn insert_missing(target: &mut serde_json::Map<String, Value>, defaults: &BTreeMap<String, String>) {
	for (key, value) in defaults {
		target
			.entry(key.clone())
			.or_insert_with(|| Value::String(value.clone()));
	}
}

#[cfg(test)]
mod tests {
	use assert_matches::assert_matches;
	use serde_json::json;

	use super::*;

	fn env(inject_labels: bool) -> Environment {
		let mut env = Environment::new();
		env.metadata.name = Some("environments/default".to_string());
		env.spec.inject_labels = inject_labels;
		env
	}

	fn tree(value: Value) -> Node {
		Node::from(value)
	}

	#[test]
	fn test_process_end_to_end() {
		let list = process(
			tree(json!({
				"app": {
					"deployment": {"apiVersion": "apps/v1", "kind": "Deployment", "metadata": {"name": "app"}},
					"config": {"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "demo"}},
				},
				"ns": {"apiVersion": "v1", "kind": "Namespace", "metadata": {"name": "app"}},
			})),
			&env(true),
			&Catalog::builtin(),
			&Matchers::default(),
		)
		.unwrap();

		let kind_names: Vec<_> = list.iter().map(Manifest::kind_name).collect();
		assert_eq!(kind_names, ["Namespace/app", "ConfigMap/demo", "Deployment/app"]);

		let config = &list[1];
		assert_eq!(config.metadata().namespace(), "default");
		assert_eq!(config.metadata().annotation(ANNOTATION_JSONPATH), Some(".app.config"));
		assert_eq!(
			config.metadata().label(LABEL_ENVIRONMENT),
			Some(env(true).name_label().as_str())
		);
		assert_eq!(list[0].metadata().namespace(), "");
	}

	#[test]
	fn test_process_without_inject_labels() {
		let list = process(
			tree(json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "demo"}})),
			&env(false),
			&Catalog::builtin(),
			&Matchers::default(),
		)
		.unwrap();

		assert!(list[0].metadata().labels().is_none());
		assert_eq!(list[0].metadata().annotation(ANNOTATION_JSONPATH), Some("."));
	}

	#[test]
	fn test_process_resource_defaults_do_not_override() {
		let mut env = env(false);
		env.spec.resource_defaults.labels =
			BTreeMap::from([("team".to_string(), "infra".to_string())]);
		env.spec.resource_defaults.annotations =
			BTreeMap::from([("owner".to_string(), "sre".to_string())]);

		let list = process(
			tree(json!({
				"a": {"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "a"}},
				"b": {"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "b", "labels": {"team": "web"}}},
			})),
			&env,
			&Catalog::builtin(),
			&Matchers::default(),
		)
		.unwrap();

		assert_eq!(list[0].metadata().label("team"), Some("infra"));
		assert_eq!(list[0].metadata().annotation("owner"), Some("sre"));
		assert_eq!(list[1].metadata().label("team"), Some("web"));
	}

	#[test]
	fn test_process_filters_targets() {
		let list = process(
			tree(json!({
				"deployment": {"apiVersion": "apps/v1", "kind": "Deployment", "metadata": {"name": "app"}},
				"service": {"apiVersion": "v1", "kind": "Service", "metadata": {"name": "app"}},
			})),
			&env(false),
			&Catalog::builtin(),
			&Matchers::new(&["deployment/.*"]).unwrap(),
		)
		.unwrap();

		assert_eq!(list.len(), 1);
		assert_eq!(list[0].kind_name(), "Deployment/app");
	}

	#[test]
	fn test_process_propagates_extract_errors() {
		let err = process(
			tree(json!({"broken": {"apiVersion": "v1", "kind": "ConfigMap"}})),
			&env(false),
			&Catalog::builtin(),
			&Matchers::default(),
		)
		.unwrap_err();
		assert_matches!(err, ProcessError::Extract(ExtractError::Schema(_)));
	}
}
