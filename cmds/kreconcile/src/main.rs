use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use kreconcile::{
	commands::{self, util::BrokenPipeGuard},
	telemetry::{self, LogLevel},
};

#[cfg(all(
	target_os = "linux",
	feature = "mimalloc",
	not(feature = "system-alloc")
))]
#[global_allocator]
static GLOBAL: mimallocator::Mimalloc = mimallocator::Mimalloc;

#[derive(Parser)]
#[command(name = "kreconcile")]
#[command(about = "Reconcile evaluated Kubernetes configuration with a cluster", long_about = None)]
#[command(version = env!("KRECONCILE_VERSION"))]
struct Cli {
	/// Log level. Overrides RUST_LOG when set
	#[arg(long, global = true, value_enum)]
	log_level: Option<LogLevel>,

	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand)]
enum Commands {
	/// Apply the configuration to the cluster
	Apply(commands::apply::ApplyArgs),

	/// Configuration as YAML
	Show(commands::show::ShowArgs),

	/// Differences between the configuration and the cluster
	Diff(commands::diff::DiffArgs),

	/// Delete resources removed from the configuration
	Prune(commands::prune::PruneArgs),

	/// Delete the environment from cluster
	Delete(commands::delete::DeleteArgs),
}

fn main() -> Result<ExitCode> {
	let cli = Cli::parse();

	let _telemetry = telemetry::init(cli.log_level)?;

	let stdout = BrokenPipeGuard::new(std::io::stdout());

	match cli.command {
		Commands::Apply(args) => commands::apply::run(args, stdout),
		Commands::Show(args) => commands::show::run(args, stdout).map(|()| ExitCode::SUCCESS),
		Commands::Diff(args) => commands::diff::run(args, stdout),
		Commands::Prune(args) => commands::prune::run(args, stdout),
		Commands::Delete(args) => commands::delete::run(args, stdout),
	}
}
