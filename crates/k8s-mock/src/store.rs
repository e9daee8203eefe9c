//! In-memory object store behind the mock server.

use std::{
	collections::BTreeMap,
	sync::{
		atomic::{AtomicU64, Ordering},
		RwLock,
	},
};

use serde_json::{json, Map, Value};

use crate::discovery::MockDiscovery;

/// Where an object lives: its collection plus its name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ObjectKey {
	pub api_version: String,
	pub plural: String,
	pub namespace: Option<String>,
	pub name: String,
}

impl ObjectKey {
	/// Key for `manifest`, if discovery knows its kind.
	///
	/// Namespaced objects without a namespace land in `default`.
	pub fn for_manifest(manifest: &Value, discovery: &MockDiscovery) -> Option<Self> {
		let api_version = manifest.get("apiVersion")?.as_str()?;
		let kind = manifest.get("kind")?.as_str()?;
		let name = manifest.pointer("/metadata/name")?.as_str()?;
		let resource = discovery.by_kind(api_version, kind)?;

		let namespace = resource.namespaced.then(|| {
			manifest
				.pointer("/metadata/namespace")
				.and_then(Value::as_str)
				.unwrap_or("default")
				.to_string()
		});

		Some(Self {
			api_version: api_version.to_string(),
			plural: resource.name.clone(),
			namespace,
			name: name.to_string(),
		})
	}
}

/// Why a write was refused.
#[derive(Debug, PartialEq, Eq)]
pub enum StoreError {
	NotFound,
	AlreadyExists,
}

#[derive(Default)]
pub struct Store {
	objects: RwLock<BTreeMap<ObjectKey, Value>>,
	generation: AtomicU64,
}

impl Store {
	pub fn insert(&self, key: ObjectKey, object: Value) {
		let object = self.with_server_fields(object, None);
		self.write().insert(key, object);
	}

	pub fn get(&self, key: &ObjectKey) -> Option<Value> {
		self.read().get(key).cloned()
	}

	/// Objects of one collection. `namespace: None` lists all namespaces.
	pub fn list(
		&self,
		api_version: &str,
		plural: &str,
		namespace: Option<&str>,
		selector: &[(String, String)],
	) -> Vec<Value> {
		self.read()
			.iter()
			.filter(|(key, _)| key.api_version == api_version && key.plural == plural)
			.filter(|(key, _)| namespace.is_none() || key.namespace.as_deref() == namespace)
			.filter(|(_, object)| matches_labels(object, selector))
			.map(|(_, object)| object.clone())
			.collect()
	}

	pub fn create(
		&self,
		key: ObjectKey,
		object: Value,
		manager: Option<&str>,
		dry_run: bool,
	) -> Result<Value, StoreError> {
		if self.read().contains_key(&key) {
			return Err(StoreError::AlreadyExists);
		}
		let object = self.with_server_fields(record_manager(object, manager), None);
		if !dry_run {
			self.write().insert(key, object.clone());
		}
		Ok(object)
	}

	pub fn patch(
		&self,
		key: ObjectKey,
		patch: Value,
		manager: Option<&str>,
		dry_run: bool,
	) -> Result<Value, StoreError> {
		let existing = self.get(&key).ok_or(StoreError::NotFound)?;
		let merged = strip_directives(merge_json(existing.clone(), patch));
		// No-op patches keep the resource version and managers, like the API
		// server.
		if merged == existing {
			return Ok(existing);
		}
		let object = self.with_server_fields(record_manager(merged, manager), Some(&existing));
		if !dry_run {
			self.write().insert(key, object.clone());
		}
		Ok(object)
	}

	pub fn delete(&self, key: &ObjectKey) -> Result<Value, StoreError> {
		self.write().remove(key).ok_or(StoreError::NotFound)
	}

	pub fn snapshot(&self) -> Vec<Value> {
		self.read().values().cloned().collect()
	}

	/// Keep the identity of `previous`, or mint a new one, and bump the
	/// resource version.
	fn with_server_fields(&self, mut object: Value, previous: Option<&Value>) -> Value {
		let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
		let uid = previous
			.and_then(|p| p.pointer("/metadata/uid"))
			.cloned()
			.unwrap_or_else(|| json!(format!("00000000-0000-0000-0000-{generation:012}")));
		let created = previous
			.and_then(|p| p.pointer("/metadata/creationTimestamp"))
			.cloned()
			.unwrap_or_else(|| json!("2024-01-01T00:00:00Z"));

		if let Some(metadata) = object
			.as_object_mut()
			.map(|o| o.entry("metadata").or_insert_with(|| json!({})))
			.and_then(Value::as_object_mut)
		{
			metadata.insert("uid".to_string(), uid);
			metadata.insert("creationTimestamp".to_string(), created);
			metadata.insert("resourceVersion".to_string(), json!(generation.to_string()));
		}
		object
	}

	fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<ObjectKey, Value>> {
		self.objects.read().unwrap_or_else(|e| e.into_inner())
	}

	fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<ObjectKey, Value>> {
		self.objects.write().unwrap_or_else(|e| e.into_inner())
	}
}

/// Add a `managedFields` entry for `manager` unless it already has one.
fn record_manager(mut object: Value, manager: Option<&str>) -> Value {
	let Some(manager) = manager else {
		return object;
	};
	let Some(metadata) = object
		.as_object_mut()
		.map(|o| o.entry("metadata").or_insert_with(|| json!({})))
		.and_then(Value::as_object_mut)
	else {
		return object;
	};
	let Some(entries) = metadata
		.entry("managedFields")
		.or_insert_with(|| json!([]))
		.as_array_mut()
	else {
		return object;
	};
	if !entries.iter().any(|e| e["manager"] == manager) {
		entries.push(json!({"manager": manager, "operation": "Update"}));
	}
	object
}

/// Parse an equality-based label selector (`a=b,c==d`).
pub fn parse_selector(selector: &str) -> Vec<(String, String)> {
	selector
		.split(',')
		.filter(|term| !term.is_empty())
		.filter_map(|term| {
			let (key, value) = term.split_once('=')?;
			Some((key.trim().to_string(), value.trim_start_matches('=').trim().to_string()))
		})
		.collect()
}

fn matches_labels(object: &Value, selector: &[(String, String)]) -> bool {
	let labels = object.pointer("/metadata/labels").and_then(Value::as_object);
	selector.iter().all(|(key, value)| {
		labels
			.and_then(|l| l.get(key))
			.and_then(Value::as_str)
			.is_some_and(|v| v == value)
	})
}

/// Deep merge `patch` into `base`. `null` in the patch removes the key; an
/// empty object adds nothing, the way the server omits empty maps.
pub fn merge_json(base: Value, patch: Value) -> Value {
	match (base, patch) {
		(Value::Object(mut base), Value::Object(patch)) => {
			for (key, value) in patch {
				if value.is_null() {
					base.remove(&key);
					continue;
				}
				if value.as_object().is_some_and(Map::is_empty) && !base.contains_key(&key) {
					continue;
				}
				let current = base.remove(&key).unwrap_or(Value::Null);
				base.insert(key, merge_json(current, value));
			}
			Value::Object(base)
		}
		(_, patch) => patch,
	}
}

/// Drop strategic merge patch directives (`$patch`, `$retainKeys`, ...).
fn strip_directives(value: Value) -> Value {
	match value {
		Value::Object(map) => Value::Object(
			map.into_iter()
				.filter(|(key, _)| !key.starts_with('$'))
				.map(|(key, value)| (key, strip_directives(value)))
				.collect::<Map<_, _>>(),
		),
		Value::Array(items) => Value::Array(items.into_iter().map(strip_directives).collect()),
		other => other,
	}
}
