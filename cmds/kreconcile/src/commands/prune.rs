//! Prune command handler.

use std::{
	io::{self, Write},
	process::ExitCode,
};

use anyhow::Result;
use clap::Args;

use super::util::{console, create_tokio_runtime, finish, prepare, ClusterArgs, EnvironmentArgs};
use crate::{
	term::stdin_prompt,
	workflow::{self, AutoApprove, PruneWorkflowOpts},
};

#[derive(Args)]
pub struct PruneArgs {
	#[command(flatten)]
	pub env: EnvironmentArgs,

	#[command(flatten)]
	pub cluster: ClusterArgs,

	/// Look for orphans of every listable kind, not just the common ones
	#[arg(long)]
	pub all_kinds: bool,

	/// Skip interactive approval. Only for automation! Allowed values: 'always', 'never', 'if-no-changes'
	#[arg(long, default_value = "never", value_enum)]
	pub auto_approve: AutoApprove,

	/// Force deleting (kubectl delete --force)
	#[arg(long)]
	pub force: bool,
}

/// Run the prune command.
pub fn run<W: Write>(args: PruneArgs, writer: W) -> Result<ExitCode> {
	let runtime = create_tokio_runtime()?;
	runtime.block_on(run_async(args, writer))
}

async fn run_async<W: Write>(args: PruneArgs, mut writer: W) -> Result<ExitCode> {
	let (reconciler, state) = prepare(&args.env).await?;

	let opts = PruneWorkflowOpts::builder()
		.all_kinds(args.all_kinds)
		.auto_approve(args.auto_approve)
		.force(args.force)
		.deadline(args.cluster.deadline())
		.build();

	let mut stderr = io::stderr();
	let mut prompt = stdin_prompt();
	let result = {
		let mut console = console(&mut writer, &mut stderr, args.cluster.color);
		workflow::prune(&reconciler, &state, &opts, &mut prompt, &mut console).await
	};
	writer.flush()?;
	finish(result)
}
