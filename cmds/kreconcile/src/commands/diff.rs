//! Diff command handler.

use std::{
	io::{self, Write},
	process::ExitCode,
};

use anyhow::Result;
use clap::Args;

use super::util::{console, create_tokio_runtime, prepare, ClusterArgs, EnvironmentArgs, EXIT_STATUS_DIFF};
use crate::{diff::DiffOpts, spec::DiffStrategy, workflow};

#[derive(Args)]
pub struct DiffArgs {
	#[command(flatten)]
	pub env: EnvironmentArgs,

	#[command(flatten)]
	pub cluster: ClusterArgs,

	/// Force the diff-strategy to use. Automatically chosen if not set.
	#[arg(long, value_enum)]
	pub diff_strategy: Option<DiffStrategy>,

	/// Exit with 0 even when differences are found
	#[arg(short = 'z', long)]
	pub exit_zero: bool,

	/// Print summary of the differences, not the actual contents
	#[arg(short = 's', long)]
	pub summarize: bool,
}

/// Run the diff command.
///
/// Exits with [`EXIT_STATUS_DIFF`] when there are differences, unless
/// `--exit-zero` is set.
pub fn run<W: Write>(args: DiffArgs, writer: W) -> Result<ExitCode> {
	let runtime = create_tokio_runtime()?;
	runtime.block_on(run_async(args, writer))
}

async fn run_async<W: Write>(args: DiffArgs, mut writer: W) -> Result<ExitCode> {
	let (reconciler, state) = prepare(&args.env).await?;

	let opts = DiffOpts::builder()
		.strategy(reconciler.diff_strategy(args.diff_strategy)?)
		.summarize(args.summarize)
		.deadline(args.cluster.deadline())
		.build();

	let mut stderr = io::stderr();
	let has_changes = {
		let mut console = console(&mut writer, &mut stderr, args.cluster.color);
		workflow::diff(&reconciler, &state, &opts, &mut console).await?
	};
	writer.flush()?;

	Ok(ExitCode::from(exit_status(has_changes, args.exit_zero)))
}

fn exit_status(has_changes: bool, exit_zero: bool) -> u8 {
	if has_changes && !exit_zero {
		EXIT_STATUS_DIFF
	} else {
		0
	}
}
