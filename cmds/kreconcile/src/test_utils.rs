//! Common test utilities.

use std::{
	collections::{BTreeMap, BTreeSet},
	io::{self, ErrorKind, Write},
	sync::Mutex,
};

use async_trait::async_trait;
use serde_json::Value;

use crate::{
	client::{ApplyOpts, Client, ClientError, DeleteOpts, Info},
	manifest::{List, Manifest},
	resources::Catalog,
};

/// A writer that simulates a broken pipe (SIGPIPE scenario).
///
/// This writer immediately returns `ErrorKind::BrokenPipe` on any write attempt,
/// simulating what happens when stdout is connected to a process that has exited.
pub struct BrokenPipeWriter;

impl Write for BrokenPipeWriter {
	fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
		Err(io::Error::new(ErrorKind::BrokenPipe, "broken pipe"))
	}

	fn flush(&mut self) -> io::Result<()> {
		Err(io::Error::new(ErrorKind::BrokenPipe, "broken pipe"))
	}
}

/// Build a manifest from a `json!` literal.
pub fn manifest(value: Value) -> Manifest {
	Manifest::new(value).expect("test manifest is valid")
}

/// A call made against [`MockClient`].
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
	Get { namespace: String, kind: String, name: String },
	GetByLabels { namespace: String, kind: String },
	Apply(Vec<String>),
	Delete { namespace: String, kind: String, name: String },
	DiffServerSide(Vec<String>),
}

/// In-memory cluster. Applied objects are stored, deleted ones removed, and
/// every call is recorded.
pub struct MockClient {
	objects: Mutex<Vec<Manifest>>,
	namespaces: BTreeSet<String>,
	catalog: Catalog,
	info: Info,
	server_diff: Option<String>,
	failing_deletes: BTreeSet<String>,
	calls: Mutex<Vec<Call>>,
}

impl Default for MockClient {
	fn default() -> Self {
		Self {
			objects: Mutex::default(),
			namespaces: BTreeSet::new(),
			catalog: Catalog::builtin(),
			info: Info {
				cluster_name: "test-cluster".to_string(),
				endpoint: "https://127.0.0.1:6443".to_string(),
				context_name: "test-context".to_string(),
				..Default::default()
			},
			server_diff: None,
			failing_deletes: BTreeSet::new(),
			calls: Mutex::default(),
		}
	}
}

impl MockClient {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_objects(self, objects: impl IntoIterator<Item = Manifest>) -> Self {
		self.objects.lock().unwrap().extend(objects);
		self
	}

	pub fn with_namespaces<S: Into<String>>(mut self, namespaces: impl IntoIterator<Item = S>) -> Self {
		self.namespaces = namespaces.into_iter().map(Into::into).collect();
		self
	}

	pub fn with_catalog(mut self, catalog: Catalog) -> Self {
		self.catalog = catalog;
		self
	}

	pub fn with_server_version(mut self, major: &str, minor: &str) -> Self {
		self.info.server_version.major = major.to_string();
		self.info.server_version.minor = minor.to_string();
		self
	}

	/// What [`Client::diff_server_side`] returns.
	pub fn with_server_diff(mut self, diff: impl Into<String>) -> Self {
		self.server_diff = Some(diff.into());
		self
	}

	/// Make deleting `Kind/name` fail.
	pub fn failing_delete(mut self, kind_name: impl Into<String>) -> Self {
		self.failing_deletes.insert(kind_name.into());
		self
	}

	pub fn calls(&self) -> Vec<Call> {
		self.calls.lock().unwrap().clone()
	}

	/// `Kind/name` of every object currently stored.
	pub fn stored(&self) -> Vec<String> {
		self.objects
			.lock()
			.unwrap()
			.iter()
			.map(Manifest::kind_name)
			.collect()
	}

	/// Payloads of all apply calls, as `Kind/name` lists.
	pub fn applied(&self) -> Vec<Vec<String>> {
		self.calls()
			.into_iter()
			.filter_map(|call| match call {
				Call::Apply(names) => Some(names),
				_ => None,
			})
			.collect()
	}

	/// `Kind/name` of every delete call, in order.
	pub fn deleted(&self) -> Vec<String> {
		self.calls()
			.into_iter()
			.filter_map(|call| match call {
				Call::Delete { kind, name, .. } => Some(format!("{kind}/{name}")),
				_ => None,
			})
			.collect()
	}

	fn record(&self, call: Call) {
		self.calls.lock().unwrap().push(call);
	}
}

fn kind_matches(manifest: &Manifest, kind: &str) -> bool {
	let group = manifest
		.api_version()
		.split_once('/')
		.map(|(group, _)| group)
		.unwrap_or_default();
	manifest.kind() == kind || format!("{}.{group}", manifest.kind()) == kind
}

fn names(data: &List) -> Vec<String> {
	data.iter().map(Manifest::kind_name).collect()
}

#[async_trait]
impl Client for MockClient {
	async fn get(&self, namespace: &str, kind: &str, name: &str) -> Result<Manifest, ClientError> {
		self.record(Call::Get {
			namespace: namespace.to_string(),
			kind: kind.to_string(),
			name: name.to_string(),
		});

		self.objects
			.lock()
			.unwrap()
			.iter()
			.find(|m| {
				kind_matches(m, kind)
					&& m.metadata().name() == name
					&& m.metadata().namespace() == namespace
			})
			.cloned()
			.ok_or_else(|| ClientError::NotFound {
				namespace: namespace.to_string(),
				kind: kind.to_string(),
				name: name.to_string(),
			})
	}

	async fn get_by_labels(
		&self,
		namespace: &str,
		kind: &str,
		labels: &BTreeMap<String, String>,
	) -> Result<List, ClientError> {
		self.record(Call::GetByLabels {
			namespace: namespace.to_string(),
			kind: kind.to_string(),
		});

		Ok(self
			.objects
			.lock()
			.unwrap()
			.iter()
			.filter(|m| kind_matches(m, kind))
			.filter(|m| namespace.is_empty() || m.metadata().namespace() == namespace)
			.filter(|m| {
				labels
					.iter()
					.all(|(k, v)| m.metadata().label(k) == Some(v.as_str()))
			})
			.cloned()
			.collect())
	}

	async fn apply(&self, data: &List, _opts: &ApplyOpts) -> Result<(), ClientError> {
		self.record(Call::Apply(names(data)));

		let mut objects = self.objects.lock().unwrap();
		for manifest in data {
			objects.retain(|m| m.identity() != manifest.identity());
			objects.push(manifest.clone());
		}
		Ok(())
	}

	async fn delete(
		&self,
		namespace: &str,
		kind: &str,
		name: &str,
		_opts: &DeleteOpts,
	) -> Result<(), ClientError> {
		self.record(Call::Delete {
			namespace: namespace.to_string(),
			kind: kind.to_string(),
			name: name.to_string(),
		});

		if self.failing_deletes.contains(&format!("{kind}/{name}")) {
			return Err(ClientError::Other(
				format!("refusing to delete {kind}/{name}").into(),
			));
		}

		let mut objects = self.objects.lock().unwrap();
		let before = objects.len();
		objects.retain(|m| {
			!(kind_matches(m, kind)
				&& m.metadata().name() == name
				&& m.metadata().namespace() == namespace)
		});
		if objects.len() == before {
			return Err(ClientError::NotFound {
				namespace: namespace.to_string(),
				kind: kind.to_string(),
				name: name.to_string(),
			});
		}
		Ok(())
	}

	async fn diff_server_side(&self, data: &List) -> Result<Option<String>, ClientError> {
		self.record(Call::DiffServerSide(names(data)));
		Ok(self.server_diff.clone())
	}

	async fn namespaces(&self) -> Result<BTreeSet<String>, ClientError> {
		Ok(self.namespaces.clone())
	}

	async fn resources(&self) -> Result<Catalog, ClientError> {
		Ok(self.catalog.clone())
	}

	fn info(&self) -> Info {
		self.info.clone()
	}
}
