//! Differences between desired manifests and the cluster.
//!
//! Objects whose namespace does not exist yet, but is created by the same
//! apply, are always diffed statically as new. Everything else goes through
//! the selected [`DiffStrategy`].

use std::collections::BTreeSet;

use bon::Builder;
use serde_json::{Map, Value};
use similar::TextDiff;
use thiserror::Error;
use tracing::instrument;

use crate::{
	client::{ClientError, SharedClient},
	fanout::{try_join_all, Deadline, FanoutError},
	manifest::{List, Manifest},
	resources::Catalog,
	spec::{DiffStrategy, UnknownDiffStrategy},
	yaml::{self, YamlError},
};

#[derive(Debug, Error)]
pub enum DiffError {
	#[error(transparent)]
	UnknownStrategy(#[from] UnknownDiffStrategy),

	#[error(transparent)]
	Client(#[from] ClientError),

	#[error("comparing objects with the cluster")]
	Batch(#[source] FanoutError<ClientError>),

	#[error("rendering YAML")]
	Yaml(#[from] YamlError),

	#[error("deadline exceeded while computing the diff")]
	DeadlineExceeded,
}

impl From<FanoutError<ClientError>> for DiffError {
	fn from(err: FanoutError<ClientError>) -> Self {
		match err {
			FanoutError::DeadlineExceeded => DiffError::DeadlineExceeded,
			other => DiffError::Batch(other),
		}
	}
}

#[derive(Debug, Clone, Default, Builder)]
pub struct DiffOpts {
	#[builder(default)]
	pub strategy: DiffStrategy,
	/// Print a diffstat instead of the diff.
	#[builder(default)]
	pub summarize: bool,
	#[builder(default)]
	pub deadline: Deadline,
}

/// Diff `state` against the cluster. `None` if nothing differs.
#[instrument(skip_all, fields(strategy = %opts.strategy, count = state.len()))]
pub async fn diff(
	client: &SharedClient,
	state: &List,
	default_namespace: &str,
	opts: &DiffOpts,
) -> Result<Option<String>, DiffError> {
	let namespaces = client.namespaces().await?;
	let catalog = client.resources().await?;

	let (live, soon) = separate(state, default_namespace, &namespaces, &catalog);
	tracing::debug!(live = live.len(), soon = soon.len(), "separated objects");

	let live_diff = match opts.strategy {
		DiffStrategy::Native => opts
			.deadline
			.run(client.diff_server_side(&live))
			.await
			.ok_or(DiffError::DeadlineExceeded)??,
		DiffStrategy::Subset => subset_diff(client, &live, opts.deadline).await?,
	};
	let soon_diff = static_diff(&soon, true)?;

	let combined: String = [live_diff, soon_diff].into_iter().flatten().collect();
	if combined.is_empty() {
		return Ok(None);
	}
	if opts.summarize {
		return Ok(Some(diffstat(&combined)));
	}
	Ok(Some(combined))
}

/// Split `state` into objects that can be compared with the cluster (`live`)
/// and objects in a namespace that only the same apply creates (`soon`).
pub fn separate(
	state: &List,
	default_namespace: &str,
	namespaces: &BTreeSet<String>,
	catalog: &Catalog,
) -> (List, List) {
	let soon_namespaces: BTreeSet<&str> = state
		.iter()
		.filter(|m| m.kind() == "Namespace")
		.map(|m| m.metadata().name())
		.collect();

	state.iter().cloned().partition(|m| {
		if !catalog.namespaced(m) {
			return true;
		}
		let namespace = match m.metadata().namespace() {
			"" => default_namespace,
			ns => ns,
		};
		namespaces.contains(namespace) || !soon_namespaces.contains(namespace)
	})
}

/// Client-side diff: compare each manifest with the fields of the live object
/// it sets.
#[instrument(skip_all, fields(count = state.len()))]
pub async fn subset_diff(
	client: &SharedClient,
	state: &List,
	deadline: Deadline,
) -> Result<Option<String>, DiffError> {
	let mut diffs = try_join_all(state.iter().cloned(), deadline, |desired| {
		let client = client.clone();
		async move {
			let metadata = desired.metadata();
			let live = match client
				.get(metadata.namespace(), desired.kind(), metadata.name())
				.await
			{
				Ok(live) => live.to_value(),
				Err(e) if e.is_not_found() => Value::Object(Map::new()),
				Err(e) => return Err(e),
			};

			let should = desired.to_value();
			let is = subset(&should, live);
			let name = diff_name(&desired);
			let is = yaml::to_yaml_or_empty(&is).map_err(ClientError::Yaml)?;
			let should = yaml::to_yaml(&should).map_err(ClientError::Yaml)?;
			let diff = diff_str(&name, &is, &should);
			Ok::<_, ClientError>((name, diff))
		}
	})
	.await?;
	diffs.sort();

	let out: String = diffs.into_iter().map(|(_, diff)| diff).collect();
	Ok((!out.is_empty()).then_some(out))
}

/// Reduce `is` to the keys `should` sets.
///
/// Maps drop keys `should` does not have (or has as `null`) and recurse into
/// common ones. Arrays recurse position by position where both elements are
/// maps, up to the length of `should`. `namespace` and `apiVersion` are taken
/// from `should` so they never show up as changes.
pub fn subset(should: &Value, is: Value) -> Value {
	match (should, is) {
		(Value::Object(should), Value::Object(mut is)) => {
			subset_map(should, &mut is);
			Value::Object(is)
		}
		(_, is) => is,
	}
}

fn subset_map(should: &Map<String, Value>, is: &mut Map<String, Value>) {
	if let Some(namespace) = should.get("namespace") {
		is.insert("namespace".to_string(), namespace.clone());
	}
	if let (Some(api_version), true) = (should.get("apiVersion"), is.contains_key("apiVersion")) {
		is.insert("apiVersion".to_string(), api_version.clone());
	}

	is.retain(|key, _| should.get(key).is_some_and(|v| !v.is_null()));

	for (key, value) in is.iter_mut() {
		match (should.get(key), value) {
			(Some(Value::Object(should)), Value::Object(is)) => subset_map(should, is),
			(Some(Value::Array(should)), Value::Array(is)) => {
				for (should, is) in should.iter().zip(is.iter_mut()) {
					if let (Value::Object(should), Value::Object(is)) = (should, is) {
						subset_map(should, is);
					}
				}
			}
			_ => {}
		}
	}
}

/// Diff every manifest against nothing: as new objects if `create`, as
/// removed ones otherwise.
pub fn static_diff(state: &List, create: bool) -> Result<Option<String>, YamlError> {
	let mut out = String::new();
	for manifest in state {
		let rendered = manifest.to_yaml()?;
		let (is, should) = if create {
			("", rendered.as_str())
		} else {
			(rendered.as_str(), "")
		};
		out.push_str(&diff_str(&diff_name(manifest), is, should));
	}
	Ok((!out.is_empty()).then_some(out))
}

/// `apiVersion.kind.namespace.name`, with `/` replaced by `-`.
pub fn diff_name(manifest: &Manifest) -> String {
	let metadata = manifest.metadata();
	format!(
		"{}.{}.{}.{}",
		manifest.api_version(),
		manifest.kind(),
		metadata.namespace(),
		metadata.name()
	)
	.replace('/', "-")
}

/// Unified diff of `is` (live) against `should` (merged). Empty if they are
/// equal.
pub fn diff_str(name: &str, is: &str, should: &str) -> String {
	if is == should {
		return String::new();
	}

	let live = format!("LIVE/{name}");
	let merged = format!("MERGED/{name}");
	let body = TextDiff::from_lines(is, should)
		.unified_diff()
		.context_radius(3)
		.header(&live, &merged)
		.to_string();

	format!("diff -u -N {live} {merged}\n{body}")
}

/// Width of the widest histogram bar.
const DIFFSTAT_WIDTH: usize = 50;

/// Per-object histogram of changed lines, like `diffstat(1)`.
pub fn diffstat(diff: &str) -> String {
	let mut files: Vec<(String, usize, usize)> = Vec::new();
	for line in diff.lines() {
		if let Some(header) = line.strip_prefix("diff -u -N ") {
			let name = header
				.rsplit_once(" MERGED/")
				.map_or(header, |(_, name)| name);
			files.push((name.to_string(), 0, 0));
			continue;
		}
		let Some((_, insertions, deletions)) = files.last_mut() else {
			continue;
		};
		if line.starts_with("+++ ") || line.starts_with("--- ") {
			continue;
		}
		if line.starts_with('+') {
			*insertions += 1;
		} else if line.starts_with('-') {
			*deletions += 1;
		}
	}

	let name_width = files.iter().map(|(name, ..)| name.len()).max().unwrap_or(0);
	let max_changes = files.iter().map(|(_, i, d)| i + d).max().unwrap_or(0);
	let count_width = max_changes.to_string().len();
	let scale = |n: usize| {
		if max_changes <= DIFFSTAT_WIDTH {
			n
		} else {
			(n * DIFFSTAT_WIDTH).div_ceil(max_changes)
		}
	};

	let mut out = String::new();
	for (name, insertions, deletions) in &files {
		out.push_str(&format!(
			" {name:<name_width$} | {:>count_width$} {}{}\n",
			insertions + deletions,
			"+".repeat(scale(*insertions)),
			"-".repeat(scale(*deletions)),
		));
	}

	let total_insertions: usize = files.iter().map(|(_, i, _)| i).sum();
	let total_deletions: usize = files.iter().map(|(_, _, d)| d).sum();
	let plural = |n: usize, word: &str| if n == 1 { word.to_string() } else { format!("{word}s") };
	out.push_str(&format!(
		" {} {} changed, {} {}(+), {} {}(-)\n",
		files.len(),
		plural(files.len(), "file"),
		total_insertions,
		plural(total_insertions, "insertion"),
		total_deletions,
		plural(total_deletions, "deletion"),
	));
	out
}
