//! Utilities for command handlers.

use std::{
	fs::File,
	io::{self, BufReader, ErrorKind, IsTerminal, Write},
	path::{Path, PathBuf},
	process::ExitCode,
	sync::Arc,
	time::Duration,
};

use anyhow::{Context, Result};
use clap::Args;
use serde_json::Value;

use crate::{
	client::{KubeClient, SharedClient},
	fanout::Deadline,
	manifest::List,
	process::{self, Matchers, Node},
	reconcile::Reconciler,
	resources::Catalog,
	spec::Environment,
	term::ColorMode,
	workflow::{Console, WorkflowError},
};

/// Exit status of `diff` when there are differences.
pub const EXIT_STATUS_DIFF: u8 = 16;

/// Name of the environment file looked up next to the data.
pub const SPEC_FILE: &str = "spec.json";

/// Arguments selecting the configuration to work on.
#[derive(Args, Debug, Clone)]
pub struct EnvironmentArgs {
	/// Evaluated configuration as JSON, or `-` to read it from stdin
	pub data: PathBuf,

	/// Environment file. Defaults to spec.json next to the data
	#[arg(long)]
	pub spec: Option<PathBuf>,

	/// Regex filter on '<kind>/<name>'. See https://tanka.dev/output-filtering
	#[arg(short = 't', long)]
	pub target: Vec<String>,
}

impl EnvironmentArgs {
	fn reads_stdin(&self) -> bool {
		self.data.as_os_str() == "-"
	}

	pub fn spec_path(&self) -> PathBuf {
		if let Some(spec) = &self.spec {
			return spec.clone();
		}
		if self.reads_stdin() {
			return PathBuf::from(SPEC_FILE);
		}
		self.data
			.parent()
			.unwrap_or_else(|| Path::new(""))
			.join(SPEC_FILE)
	}

	pub fn load_environment(&self) -> Result<Environment> {
		Environment::from_file(&self.spec_path()).context("loading environment")
	}

	/// Parse the evaluated configuration tree.
	pub fn read_tree(&self) -> Result<Node> {
		let value: Value = if self.reads_stdin() {
			serde_json::from_reader(io::stdin().lock()).context("parsing configuration from stdin")?
		} else {
			let file = File::open(&self.data)
				.with_context(|| format!("opening {}", self.data.display()))?;
			serde_json::from_reader(BufReader::new(file))
				.with_context(|| format!("parsing {}", self.data.display()))?
		};
		Ok(Node::from(value))
	}

	/// Read, extract and process the configuration for `env`.
	pub fn load_manifests(&self, env: &Environment, catalog: &Catalog) -> Result<List> {
		let matchers = Matchers::new(&self.target)?;
		let state = process::process(self.read_tree()?, env, catalog, &matchers)?;
		tracing::debug!(count = state.len(), "processed manifests");
		Ok(state)
	}
}

/// Arguments for commands talking to a cluster.
#[derive(Args, Debug, Clone)]
pub struct ClusterArgs {
	/// Controls color in diff output
	#[arg(long, default_value = "auto", value_enum)]
	pub color: ColorMode,

	/// Give up on cluster queries after this many seconds
	#[arg(long)]
	pub timeout: Option<u64>,
}

impl ClusterArgs {
	pub fn deadline(&self) -> Deadline {
		Deadline::from_timeout(self.timeout.map(Duration::from_secs))
	}
}

/// Connect to the cluster `env` points at.
pub async fn connect(env: Environment) -> Result<Reconciler> {
	let client = KubeClient::connect(&env.spec)
		.await
		.context("connecting to Kubernetes cluster")?;
	let client: SharedClient = Arc::new(client);
	let info = client.info();
	tracing::debug!(
		cluster = %info.cluster_name,
		context = %info.context_name,
		server_version = %info.server_version.git_version,
		"connected to cluster"
	);
	Ok(Reconciler::new(client, env))
}

/// Load the environment, then its manifests with the cluster's catalog.
pub async fn prepare(args: &EnvironmentArgs) -> Result<(Reconciler, List)> {
	let reconciler = connect(args.load_environment()?).await?;
	let catalog = reconciler
		.client()
		.resources()
		.await
		.context("listing known API resources")?;
	let state = args.load_manifests(reconciler.environment(), &catalog)?;
	Ok((reconciler, state))
}

pub fn create_tokio_runtime() -> Result<tokio::runtime::Runtime> {
	tokio::runtime::Builder::new_multi_thread()
		.enable_all()
		.build()
		.context("creating tokio runtime")
}

/// A console writing results to `out` and notes to `err`.
pub fn console<'a>(out: &'a mut dyn Write, err: &'a mut dyn Write, color: ColorMode) -> Console<'a> {
	Console {
		out,
		err,
		color: color.enabled(io::stdout().is_terminal()),
	}
}

/// Turn a declined prompt into a plain failure exit, everything else into an
/// error.
pub fn finish(result: Result<(), WorkflowError>) -> Result<ExitCode> {
	match result {
		Ok(()) => Ok(ExitCode::SUCCESS),
		Err(e) if e.is_aborted() => {
			eprintln!("{e}");
			Ok(ExitCode::FAILURE)
		}
		Err(e) => Err(e.into()),
	}
}

/// A writer wrapper that silently handles broken pipe errors.
///
/// Lets commands exit cleanly when output is piped to a process that closes
/// early (e.g. `kreconcile show ... | head -1`).
pub struct BrokenPipeGuard<W> {
	inner: W,
}

impl<W> BrokenPipeGuard<W> {
	pub fn new(inner: W) -> Self {
		Self { inner }
	}
}

impl<W: Write> Write for BrokenPipeGuard<W> {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		match self.inner.write(buf) {
			Err(e) if e.kind() == ErrorKind::BrokenPipe => Ok(buf.len()),
			other => other,
		}
	}

	fn flush(&mut self) -> io::Result<()> {
		match self.inner.flush() {
			Err(e) if e.kind() == ErrorKind::BrokenPipe => Ok(()),
			other => other,
		}
	}
}
