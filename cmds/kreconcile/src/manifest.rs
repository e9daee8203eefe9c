//! Validated Kubernetes objects.
//!
//! A [`Manifest`] can only be obtained by passing schema validation, so every
//! accessor on it can rely on `apiVersion`, `kind` and (for non-lists)
//! `metadata.name` being present strings.

use std::{
	fmt,
	ops::{Deref, DerefMut},
};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::yaml::{self, YamlError};

/// A manifest failed schema validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}expected fields missing: {}", name_prefix(.name), .missing.join(", "))]
pub struct SchemaError {
	/// Where the object came from (tree path or `Kind/name`). Empty when unknown.
	pub name: String,
	/// Dotted names of the missing fields, in check order.
	pub missing: Vec<&'static str>,
}

fn name_prefix(name: &str) -> String {
	if name.is_empty() {
		String::new()
	} else {
		format!("{name}: ")
	}
}

impl SchemaError {
	/// Attach the location of the offending object.
	pub fn with_name(mut self, name: impl Into<String>) -> Self {
		self.name = name.into();
		self
	}
}

/// Identity of a cluster object. Two manifests with equal identities refer to
/// the same object on the cluster.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Identity {
	pub api_version: String,
	pub kind: String,
	pub namespace: String,
	pub name: String,
}

impl fmt::Display for Identity {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"{}.{}.{}.{}",
			self.api_version, self.kind, self.namespace, self.name
		)
	}
}

/// A single Kubernetes object that passed schema validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct Manifest(Map<String, Value>);

impl TryFrom<Map<String, Value>> for Manifest {
	type Error = SchemaError;

	fn try_from(map: Map<String, Value>) -> Result<Self, Self::Error> {
		let missing = verify(&map);
		if missing.is_empty() {
			Ok(Self(map))
		} else {
			Err(SchemaError {
				name: String::new(),
				missing,
			})
		}
	}
}

impl TryFrom<Value> for Manifest {
	type Error = SchemaError;

	fn try_from(value: Value) -> Result<Self, Self::Error> {
		match value {
			Value::Object(map) => Self::try_from(map),
			_ => Err(SchemaError {
				name: String::new(),
				missing: vec!["kind", "apiVersion", "metadata", "metadata.name"],
			}),
		}
	}
}

impl From<Manifest> for Map<String, Value> {
	fn from(manifest: Manifest) -> Self {
		manifest.0
	}
}

impl From<Manifest> for Value {
	fn from(manifest: Manifest) -> Self {
		Value::Object(manifest.0)
	}
}

/// Returns the fields that keep `map` from being a valid manifest.
fn verify(map: &Map<String, Value>) -> Vec<&'static str> {
	let mut missing = Vec::new();
	if !map.get("kind").is_some_and(Value::is_string) {
		missing.push("kind");
	}
	if !map.get("apiVersion").is_some_and(Value::is_string) {
		missing.push("apiVersion");
	}
	if !is_list(map) {
		let metadata = map.get("metadata").and_then(Value::as_object);
		if metadata.is_none() {
			missing.push("metadata");
		}
		if !metadata
			.and_then(|m| m.get("name"))
			.is_some_and(Value::is_string)
		{
			missing.push("metadata.name");
		}
	}
	missing
}

fn is_list(map: &Map<String, Value>) -> bool {
	map.get("items").is_some_and(Value::is_array)
}

fn str_field<'a>(map: Option<&'a Map<String, Value>>, key: &str) -> &'a str {
	map.and_then(|m| m.get(key))
		.and_then(Value::as_str)
		.unwrap_or_default()
}

impl Manifest {
	/// Validate `value` and wrap it.
	pub fn new(value: Value) -> Result<Self, SchemaError> {
		Self::try_from(value)
	}

	pub fn kind(&self) -> &str {
		str_field(Some(&self.0), "kind")
	}

	pub fn api_version(&self) -> &str {
		str_field(Some(&self.0), "apiVersion")
	}

	/// Read access to `metadata`. Absent fields read as empty.
	pub fn metadata(&self) -> Metadata<'_> {
		Metadata(self.0.get("metadata").and_then(Value::as_object))
	}

	/// Write access to `metadata`, creating it if absent.
	pub fn metadata_mut(&mut self) -> MetadataMut<'_> {
		MetadataMut(object_entry(&mut self.0, "metadata"))
	}

	/// `Kind/name`, the string target expressions are matched against.
	pub fn kind_name(&self) -> String {
		format!("{}/{}", self.kind(), self.metadata().name())
	}

	pub fn identity(&self) -> Identity {
		let metadata = self.metadata();
		Identity {
			api_version: self.api_version().to_string(),
			kind: self.kind().to_string(),
			namespace: metadata.namespace().to_string(),
			name: metadata.name().to_string(),
		}
	}

	/// Whether this manifest wraps other manifests in `items`.
	pub fn is_list(&self) -> bool {
		is_list(&self.0)
	}

	/// Take the raw `items` of a list manifest.
	pub fn into_items(mut self) -> Option<Vec<Value>> {
		match self.0.remove("items") {
			Some(Value::Array(items)) => Some(items),
			_ => None,
		}
	}

	pub fn get(&self, key: &str) -> Option<&Value> {
		self.0.get(key)
	}

	pub fn as_map(&self) -> &Map<String, Value> {
		&self.0
	}

	pub fn to_value(&self) -> Value {
		Value::Object(self.0.clone())
	}

	pub fn to_yaml(&self) -> Result<String, YamlError> {
		yaml::to_yaml(&self.to_value())
	}
}

impl fmt::Display for Manifest {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.kind_name())
	}
}

/// Get `map[key]` as an object, replacing any non-object value.
fn object_entry<'a>(map: &'a mut Map<String, Value>, key: &str) -> &'a mut Map<String, Value> {
	let entry = map
		.entry(key.to_string())
		.or_insert_with(|| Value::Object(Map::new()));
	if !entry.is_object() {
		*entry = Value::Object(Map::new());
	}
	match entry {
		Value::Object(object) => object,
		_ => unreachable!("entry was just replaced with an object"),
	}
}

/// Borrowed view of a manifest's `metadata`.
#[derive(Debug, Clone, Copy)]
pub struct Metadata<'a>(Option<&'a Map<String, Value>>);

impl<'a> Metadata<'a> {
	pub fn name(&self) -> &'a str {
		str_field(self.0, "name")
	}

	pub fn namespace(&self) -> &'a str {
		str_field(self.0, "namespace")
	}

	pub fn generate_name(&self) -> &'a str {
		str_field(self.0, "generateName")
	}

	pub fn uid(&self) -> &'a str {
		str_field(self.0, "uid")
	}

	pub fn labels(&self) -> Option<&'a Map<String, Value>> {
		self.0?.get("labels")?.as_object()
	}

	pub fn annotations(&self) -> Option<&'a Map<String, Value>> {
		self.0?.get("annotations")?.as_object()
	}

	pub fn label(&self, key: &str) -> Option<&'a str> {
		self.labels()?.get(key)?.as_str()
	}

	pub fn annotation(&self, key: &str) -> Option<&'a str> {
		self.annotations()?.get(key)?.as_str()
	}

	/// Names of the field managers listed in `managedFields`.
	pub fn managers(&self) -> impl Iterator<Item = &'a str> {
		self.0
			.and_then(|m| m.get("managedFields"))
			.and_then(Value::as_array)
			.into_iter()
			.flatten()
			.filter_map(|entry| entry.get("manager")?.as_str())
	}
}

/// Mutable view of a manifest's `metadata`.
pub struct MetadataMut<'a>(&'a mut Map<String, Value>);

impl MetadataMut<'_> {
	/// Labels map, created if absent.
	pub fn labels(&mut self) -> &mut Map<String, Value> {
		object_entry(self.0, "labels")
	}

	/// Annotations map, created if absent.
	pub fn annotations(&mut self) -> &mut Map<String, Value> {
		object_entry(self.0, "annotations")
	}

	pub fn has_namespace(&self) -> bool {
		!str_field(Some(self.0), "namespace").is_empty()
	}

	pub fn set_namespace(&mut self, namespace: &str) {
		self.0
			.insert("namespace".to_string(), Value::String(namespace.to_string()));
	}

	/// Drop `annotations` if it is an empty map.
	pub fn prune_empty_annotations(&mut self) {
		if self
			.0
			.get("annotations")
			.and_then(Value::as_object)
			.is_some_and(Map::is_empty)
		{
			self.0.remove("annotations");
		}
	}
}

/// An ordered list of manifests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct List(Vec<Manifest>);

impl List {
	pub fn new() -> Self {
		Self::default()
	}

	/// Whether a manifest with the same identity is part of this list.
	pub fn has(&self, manifest: &Manifest) -> bool {
		let identity = manifest.identity();
		self.0.iter().any(|m| m.identity() == identity)
	}

	/// Names of all `Namespace` objects in this list.
	pub fn namespaces(&self) -> Vec<&str> {
		self.0
			.iter()
			.filter(|m| m.kind() == "Namespace")
			.map(|m| m.metadata().name())
			.collect()
	}

	/// Render as a multi-document YAML stream.
	pub fn to_yaml_stream(&self) -> Result<String, YamlError> {
		let documents = self
			.0
			.iter()
			.map(Manifest::to_value)
			.collect::<Vec<_>>();
		yaml::to_yaml_stream(&documents)
	}

	pub fn into_inner(self) -> Vec<Manifest> {
		self.0
	}
}

impl Deref for List {
	type Target = Vec<Manifest>;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}

impl DerefMut for List {
	fn deref_mut(&mut self) -> &mut Self::Target {
		&mut self.0
	}
}

impl From<Vec<Manifest>> for List {
	fn from(manifests: Vec<Manifest>) -> Self {
		Self(manifests)
	}
}

impl FromIterator<Manifest> for List {
	fn from_iter<I: IntoIterator<Item = Manifest>>(iter: I) -> Self {
		Self(iter.into_iter().collect())
	}
}

impl Extend<Manifest> for List {
	fn extend<I: IntoIterator<Item = Manifest>>(&mut self, iter: I) {
		self.0.extend(iter);
	}
}

impl IntoIterator for List {
	type Item = Manifest;
	type IntoIter = std::vec::IntoIter<Manifest>;

	fn into_iter(self) -> Self::IntoIter {
		self.0.into_iter()
	}
}

impl<'a> IntoIterator for &'a List {
	type Item = &'a Manifest;
	type IntoIter = std::slice::Iter<'a, Manifest>;

	fn into_iter(self) -> Self::IntoIter {
		self.0.iter()
	}
}

#[cfg(test)]
mod tests {
	use assert_matches::assert_matches;
	use rstest::rstest;
	use serde_json::json;

	use super::*;

	#[rstest]
	#[case::configmap(json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "a"}}), vec![])]
	#[case::no_kind(json!({"apiVersion": "v1", "metadata": {"name": "a"}}), vec!["kind"])]
	#[case::numeric_api_version(json!({"apiVersion": 1, "kind": "ConfigMap", "metadata": {"name": "a"}}), vec!["apiVersion"])]
	#[case::no_metadata(json!({"apiVersion": "v1", "kind": "ConfigMap"}), vec!["metadata", "metadata.name"])]
	#[case::no_name(json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {}}), vec!["metadata.name"])]
	#[case::list_without_metadata(json!({"apiVersion": "v1", "kind": "List", "items": []}), vec![])]
	fn test_verify(#[case] value: Value, #[case] expected: Vec<&'static str>) {
		let Value::Object(map) = value else {
			panic!("fixture must be an object");
		};
		assert_eq!(verify(&map), expected);
	}

	#[test]
	fn test_schema_error_message() {
		let err = Manifest::new(json!({"kind": "Deployment"}))
			.unwrap_err()
			.with_name(".app.deployment");
		assert_eq!(
			err.to_string(),
			".app.deployment: expected fields missing: apiVersion, metadata, metadata.name"
		);
	}

	#[test]
	fn test_deserialize_validates() {
		let result: Result<Manifest, _> =
			serde_json::from_value(json!({"apiVersion": "v1", "kind": "Secret"}));
		assert_matches!(result, Err(e) if e.to_string().contains("metadata.name"));
	}

	#[test]
	fn test_metadata_accessors() {
		let mut m = Manifest::new(json!({
			"apiVersion": "apps/v1",
			"kind": "Deployment",
			"metadata": {"name": "grafana", "namespace": "monitoring"}
		}))
		.unwrap();

		assert_eq!(m.kind_name(), "Deployment/grafana");
		assert_eq!(m.metadata().namespace(), "monitoring");
		assert!(m.metadata().labels().is_none());

		m.metadata_mut()
			.labels()
			.insert("app".into(), json!("grafana"));
		assert_eq!(m.metadata().label("app"), Some("grafana"));

		m.metadata_mut().annotations();
		assert!(m.metadata().annotations().is_some());
		m.metadata_mut().prune_empty_annotations();
		assert!(m.metadata().annotations().is_none());
	}

	#[test]
	fn test_list_has_compares_identity() {
		let a = Manifest::new(json!({
			"apiVersion": "v1", "kind": "ConfigMap",
			"metadata": {"name": "a", "namespace": "default", "labels": {"x": "y"}}
		}))
		.unwrap();
		let same = Manifest::new(json!({
			"apiVersion": "v1", "kind": "ConfigMap",
			"metadata": {"name": "a", "namespace": "default"}, "data": {"k": "v"}
		}))
		.unwrap();
		let other_ns = Manifest::new(json!({
			"apiVersion": "v1", "kind": "ConfigMap",
			"metadata": {"name": "a", "namespace": "kube-system"}
		}))
		.unwrap();

		let list = List::from(vec![a]);
		assert!(list.has(&same));
		assert!(!list.has(&other_ns));
	}
}
