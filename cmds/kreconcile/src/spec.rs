//! Environment configuration (`spec.json`, `tanka.dev/v1alpha1`).

use std::{
	collections::BTreeMap,
	fmt,
	path::{Path, PathBuf},
	str::FromStr,
};

use clap::ValueEnum;
use k8s_openapi::apimachinery::pkg::version::Info;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors loading an environment file.
#[derive(Debug, Error)]
pub enum SpecError {
	#[error("reading {}", .path.display())]
	Read {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("parsing {}", .path.display())]
	Parse {
		path: PathBuf,
		#[source]
		source: serde_json::Error,
	},
}

/// An explicitly requested diff strategy that does not exist.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("diff strategy `{0}` does not exist. Pick one of: [native subset]")]
pub struct UnknownDiffStrategy(pub String);

/// How differences against the cluster are computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffStrategy {
	/// Let the API server compute the merged object with a dry-run apply (k8s 1.13+).
	#[default]
	Native,

	/// Fetch the live object and compare only the fields the manifest sets.
	/// Works with any cluster version.
	Subset,
}

impl fmt::Display for DiffStrategy {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			DiffStrategy::Native => write!(f, "native"),
			DiffStrategy::Subset => write!(f, "subset"),
		}
	}
}

impl FromStr for DiffStrategy {
	type Err = UnknownDiffStrategy;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"native" => Ok(DiffStrategy::Native),
			"subset" => Ok(DiffStrategy::Subset),
			other => Err(UnknownDiffStrategy(other.to_string())),
		}
	}
}

impl DiffStrategy {
	/// Pick the strategy for one reconciliation pass.
	///
	/// An explicit override wins, then `spec.diffStrategy`. Without either,
	/// clusters older than 1.13 (no server-side dry-run) get `subset`, all
	/// others `native`.
	pub fn resolve(
		explicit: Option<DiffStrategy>,
		spec: &Spec,
		server_version: &Info,
	) -> Result<Self, UnknownDiffStrategy> {
		if let Some(strategy) = explicit {
			return Ok(strategy);
		}

		match spec.diff_strategy.as_deref() {
			Some(configured) if !configured.is_empty() => configured.parse(),
			_ => Ok(Self::for_server_version(server_version)),
		}
	}

	fn for_server_version(server_version: &Info) -> Self {
		let major = server_version.major.trim_end_matches('+').parse::<u32>();
		let minor = server_version.minor.trim_end_matches('+').parse::<u32>();

		match (major, minor) {
			(Ok(major), Ok(minor)) if (major, minor) < (1, 13) => DiffStrategy::Subset,
			(Ok(_), Ok(_)) => DiffStrategy::Native,
			_ => {
				tracing::debug!(
					major = %server_version.major,
					minor = %server_version.minor,
					"unparseable server version, assuming a recent cluster"
				);
				DiffStrategy::Native
			}
		}
	}
}

/// Environment represents a Tanka environment (tanka.dev/v1alpha1)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
	pub api_version: String,
	pub kind: String,
	pub metadata: Metadata,
	#[serde(default)]
	pub spec: Spec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub namespace: Option<String>,
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Spec {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub api_server: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub context_names: Option<Vec<String>>,
	#[serde(default = "default_namespace")]
	pub namespace: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub diff_strategy: Option<String>,
	#[serde(default)]
	pub inject_labels: bool,
	#[serde(default)]
	pub resource_defaults: ResourceDefaults,
}

/// Annotations and labels every manifest receives unless it sets them itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceDefaults {
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub annotations: BTreeMap<String, String>,
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub labels: BTreeMap<String, String>,
}

fn default_namespace() -> String {
	"default".to_string()
}

impl Default for Spec {
	fn default() -> Self {
		Self {
			api_server: None,
			context_names: None,
			namespace: default_namespace(),
			diff_strategy: None,
			inject_labels: false,
			resource_defaults: ResourceDefaults::default(),
		}
	}
}

impl Environment {
	pub fn new() -> Self {
		Self {
			api_version: "tanka.dev/v1alpha1".to_string(),
			kind: "Environment".to_string(),
			metadata: Metadata::default(),
			spec: Spec::default(),
		}
	}

	/// Load `spec.json`.
	///
	/// A missing `metadata.name` defaults to the name of the directory holding
	/// the file.
	pub fn from_file(path: &Path) -> Result<Self, SpecError> {
		let content = std::fs::read_to_string(path).map_err(|source| SpecError::Read {
			path: path.to_path_buf(),
			source,
		})?;
		let mut env: Environment =
			serde_json::from_str(&content).map_err(|source| SpecError::Parse {
				path: path.to_path_buf(),
				source,
			})?;

		if env.metadata.name.is_none() {
			env.metadata.name = path
				.parent()
				.and_then(Path::file_name)
				.map(|n| n.to_string_lossy().into_owned());
		}

		Ok(env)
	}

	/// Value of the `tanka.dev/environment` label.
	///
	/// First 48 hex characters of `sha256("<name>:<namespace>")`.
	pub fn name_label(&self) -> String {
		use sha2::{Digest, Sha256};

		let name = self.metadata.name.as_deref().unwrap_or("");
		let namespace = self.metadata.namespace.as_deref().unwrap_or("");

		let digest = Sha256::digest(format!("{name}:{namespace}").as_bytes());
		let mut hex = format!("{digest:x}");
		hex.truncate(48);
		hex
	}
}

impl Default for Environment {
	fn default() -> Self {
		Self::new()
	}
}
