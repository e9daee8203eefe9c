//! Discovery of Kubernetes objects inside an evaluated configuration tree.

use std::collections::BTreeMap;

use serde_json::{Map, Number, Value};
use thiserror::Error;

use crate::manifest::{Manifest, SchemaError};

/// Key reserved for ksonnet bookkeeping, removed from every object.
const KSONNET_KEY: &str = "__ksonnet";

#[derive(Debug, Error)]
pub enum ExtractError {
	#[error(
		"recursion did not resolve in a valid Kubernetes object.  In path `{path}` found key \
		 `{key}` of type `{type_name}` instead."
	)]
	PrimitiveReached {
		/// Path of the container holding the offending value.
		path: String,
		key: String,
		type_name: &'static str,
	},

	#[error(transparent)]
	Schema(#[from] SchemaError),

	#[error("{path}: list items must be objects, found `{type_name}`")]
	ListItem {
		path: String,
		type_name: &'static str,
	},
}

/// A node of the evaluated tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
	Object(BTreeMap<String, Node>),
	Array(Vec<Node>),
	Scalar(Scalar),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
	/// Conditionally omitted value.
	Null,
	Bool(bool),
	Number(Number),
	String(String),
}

impl Scalar {
	fn type_name(&self) -> &'static str {
		match self {
			Scalar::Null => "null",
			Scalar::Bool(_) => "bool",
			Scalar::Number(_) => "number",
			Scalar::String(_) => "string",
		}
	}
}

fn value_type_name(value: &Value) -> &'static str {
	match value {
		Value::Null => "null",
		Value::Bool(_) => "bool",
		Value::Number(_) => "number",
		Value::String(_) => "string",
		Value::Array(_) => "array",
		Value::Object(_) => "object",
	}
}

impl From<Value> for Node {
	fn from(value: Value) -> Self {
		match value {
			Value::Null => Node::Scalar(Scalar::Null),
			Value::Bool(b) => Node::Scalar(Scalar::Bool(b)),
			Value::Number(n) => Node::Scalar(Scalar::Number(n)),
			Value::String(s) => Node::Scalar(Scalar::String(s)),
			Value::Array(items) => Node::Array(items.into_iter().map(Node::from).collect()),
			Value::Object(map) => Node::Object(map.into_iter().map(|(k, v)| (k, v.into())).collect()),
		}
	}
}

impl From<Node> for Value {
	fn from(node: Node) -> Self {
		match node {
			Node::Scalar(Scalar::Null) => Value::Null,
			Node::Scalar(Scalar::Bool(b)) => Value::Bool(b),
			Node::Scalar(Scalar::Number(n)) => Value::Number(n),
			Node::Scalar(Scalar::String(s)) => Value::String(s),
			Node::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
			Node::Object(children) => Value::Object(
				children
					.into_iter()
					.map(|(k, v)| (k, v.into()))
					.collect::<Map<_, _>>(),
			),
		}
	}
}

/// Location inside the tree, as a stack of segments.
#[derive(Debug, Default, Clone)]
struct Trace(Vec<String>);

impl Trace {
	fn child(&self, segment: String) -> Self {
		let mut segments = self.0.clone();
		segments.push(segment);
		Self(segments)
	}

	/// `.a.b.[0].c`, or `.` for the root.
	fn full(&self) -> String {
		format!(".{}", self.0.join("."))
	}

	fn parent(&self) -> String {
		let end = self.0.len().saturating_sub(1);
		format!(".{}", self.0[..end].join("."))
	}

	fn name(&self) -> &str {
		self.0.last().map(String::as_str).unwrap_or_default()
	}
}

fn non_empty_str(children: &BTreeMap<String, Node>, key: &str) -> bool {
	matches!(children.get(key), Some(Node::Scalar(Scalar::String(s))) if !s.is_empty())
}

/// Find every Kubernetes object in `tree`, keyed by its path.
///
/// An object having non-empty string `apiVersion` and `kind` is a manifest
/// and is not descended into. Other objects and arrays are walked, `null`
/// object members are skipped. Any other leaf is an error.
pub fn extract(tree: Node) -> Result<BTreeMap<String, Manifest>, ExtractError> {
	let mut extracted = BTreeMap::new();
	walk(tree, &Trace::default(), &mut extracted)?;
	Ok(extracted)
}

fn walk(
	node: Node,
	trace: &Trace,
	extracted: &mut BTreeMap<String, Manifest>,
) -> Result<(), ExtractError> {
	match node {
		Node::Object(mut children) => {
			children.remove(KSONNET_KEY);

			if non_empty_str(&children, "apiVersion") && non_empty_str(&children, "kind") {
				let path = trace.full();
				let manifest = Manifest::new(Node::Object(children).into())
					.map_err(|e| e.with_name(path.clone()))?;
				extracted.insert(path, manifest);
				return Ok(());
			}

			for (key, child) in children {
				if matches!(child, Node::Scalar(Scalar::Null)) {
					continue;
				}
				walk(child, &trace.child(key), extracted)?;
			}
			Ok(())
		}
		Node::Array(items) => {
			for (index, item) in items.into_iter().enumerate() {
				walk(item, &trace.child(format!("[{index}]")), extracted)?;
			}
			Ok(())
		}
		Node::Scalar(scalar) => Err(ExtractError::PrimitiveReached {
			path: trace.parent(),
			key: trace.name().to_string(),
			type_name: scalar.type_name(),
		}),
	}
}

/// Replace every `List` manifest by its items.
///
/// Items are keyed `<path>.items[<index>]` and validated like any other
/// manifest. Lists nested in lists are unwrapped as well.
pub fn unwrap_lists(
	mut manifests: BTreeMap<String, Manifest>,
) -> Result<BTreeMap<String, Manifest>, ExtractError> {
	let mut pending: Vec<String> = manifests
		.iter()
		.filter(|(_, m)| m.is_list())
		.map(|(path, _)| path.clone())
		.collect();

	while let Some(path) = pending.pop() {
		let Some(list) = manifests.remove(&path) else {
			continue;
		};
		let items = list.into_items().unwrap_or_default();

		for (index, item) in items.into_iter().enumerate() {
			let item_path = format!("{path}.items[{index}]");
			if !item.is_object() {
				return Err(ExtractError::ListItem {
					path: item_path,
					type_name: value_type_name(&item),
				});
			}

			let manifest = Manifest::new(item).map_err(|e| e.with_name(item_path.clone()))?;
			if manifest.is_list() {
				pending.push(item_path.clone());
			}
			manifests.insert(item_path, manifest);
		}
	}

	Ok(manifests)
}

#[cfg(test)]
mod tests {
	use assert_matches::assert_matches;
	use serde_json::json;

	use super::*;

	fn tree(value: Value) -> Node {
		Node::from(value)
	}

	#[test]
	fn test_extract_nested() {
		let extracted = extract(tree(json!({
			"grafana": {
				"deployment": {"apiVersion": "apps/v1", "kind": "Deployment", "metadata": {"name": "grafana"}},
				"service": {"apiVersion": "v1", "kind": "Service", "metadata": {"name": "grafana"}},
				"disabled": null,
			},
			"extra": [
				{"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "a"}},
				[{"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "b"}}],
			],
		})))
		.unwrap();

		let paths: Vec<_> = extracted.keys().map(String::as_str).collect();
		assert_eq!(
			paths,
			[
				".extra.[0]",
				".extra.[1].[0]",
				".grafana.deployment",
				".grafana.service"
			]
		);
	}

	#[test]
	fn test_extract_root_manifest() {
		let manifest = json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "root"}});
		let extracted = extract(tree(manifest.clone())).unwrap();

		assert_eq!(extracted.len(), 1);
		assert_eq!(extracted["."].to_value(), manifest);
	}

	#[test]
	fn test_extract_strips_ksonnet_key() {
		let extracted = extract(tree(json!({
			"cm": {
				"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "x"},
				"__ksonnet": {"private": true},
			}
		})))
		.unwrap();
		assert!(extracted[".cm"].get(KSONNET_KEY).is_none());
	}

	#[test]
	fn test_extract_is_idempotent() {
		let value = json!({
			"a": {"apiVersion": "v1", "kind": "Secret", "metadata": {"name": "s"}},
			"b": [{"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "c"}}],
		});
		let first = extract(tree(value.clone())).unwrap();
		let second = extract(tree(value)).unwrap();
		assert_eq!(first, second);
	}

	#[test]
	fn test_extract_primitive_reached() {
		let err = extract(tree(json!({"app": {"replicas": 3}}))).unwrap_err();
		assert_matches!(
			&err,
			ExtractError::PrimitiveReached { path, key, type_name: "number" }
				if path == ".app" && key == "replicas"
		);
		assert_eq!(
			err.to_string(),
			"recursion did not resolve in a valid Kubernetes object.  In path `.app` found key \
			 `replicas` of type `number` instead."
		);
	}

	#[test]
	fn test_extract_kind_without_api_version_is_walked() {
		let err = extract(tree(json!({
			"foo": {"kind": "Deployment", "metadata": {"name": "x"}}
		})))
		.unwrap_err();
		assert_matches!(
			err,
			ExtractError::PrimitiveReached { path, key, type_name: "string" }
				if path == ".foo" && key == "kind"
		);
	}

	#[test]
	fn test_extract_schema_error_names_path() {
		let err = extract(tree(json!({
			"app": {"apiVersion": "v1", "kind": "ConfigMap", "metadata": {}}
		})))
		.unwrap_err();
		assert_matches!(
			err,
			ExtractError::Schema(SchemaError { name, missing }) if name == ".app" && missing == ["metadata.name"]
		);
	}

	#[test]
	fn test_unwrap_lists() {
		let extracted = extract(tree(json!({
			"list": {
				"apiVersion": "v1",
				"kind": "List",
				"items": [
					{"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "a"}},
					{"apiVersion": "v1", "kind": "List", "items": [
						{"apiVersion": "v1", "kind": "Secret", "metadata": {"name": "b"}},
					]},
				],
			}
		})))
		.unwrap();

		let unwrapped = unwrap_lists(extracted).unwrap();
		let paths: Vec<_> = unwrapped.keys().map(String::as_str).collect();
		assert_eq!(paths, [".list.items[0]", ".list.items[1].items[0]"]);
		assert_eq!(unwrapped[".list.items[1].items[0]"].kind(), "Secret");
	}

	#[test]
	fn test_unwrap_lists_rejects_invalid_items() {
		let extracted = extract(tree(json!({
			"list": {"apiVersion": "v1", "kind": "List", "items": [{"apiVersion": "v1", "kind": "ConfigMap"}]}
		})))
		.unwrap();

		let err = unwrap_lists(extracted).unwrap_err();
		assert_matches!(err, ExtractError::Schema(SchemaError { name, .. }) if name == ".list.items[0]");
	}
}
