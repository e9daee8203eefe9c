//! Apply command handler.

use std::{
	io::{self, Write},
	process::ExitCode,
};

use anyhow::Result;
use clap::Args;

use super::util::{console, create_tokio_runtime, finish, prepare, ClusterArgs, EnvironmentArgs};
use crate::{
	diff::DiffOpts,
	spec::DiffStrategy,
	term::stdin_prompt,
	workflow::{self, ApplyWorkflowOpts, AutoApprove},
};

#[derive(Args)]
pub struct ApplyArgs {
	#[command(flatten)]
	pub env: EnvironmentArgs,

	#[command(flatten)]
	pub cluster: ClusterArgs,

	/// Skip interactive approval. Only for automation! Allowed values: 'always', 'never', 'if-no-changes'
	#[arg(long, default_value = "never", value_enum)]
	pub auto_approve: AutoApprove,

	/// Force the diff-strategy to use. Automatically chosen if not set.
	#[arg(long, value_enum)]
	pub diff_strategy: Option<DiffStrategy>,

	/// Replace objects the server refuses to patch
	#[arg(long)]
	pub force: bool,

	/// Validation of resources
	#[arg(long, default_value = "true", action = clap::ArgAction::Set)]
	pub validate: bool,
}

/// Run the apply command.
pub fn run<W: Write>(args: ApplyArgs, writer: W) -> Result<ExitCode> {
	let runtime = create_tokio_runtime()?;
	runtime.block_on(run_async(args, writer))
}

async fn run_async<W: Write>(args: ApplyArgs, mut writer: W) -> Result<ExitCode> {
	let (reconciler, state) = prepare(&args.env).await?;

	let diff = DiffOpts::builder()
		.strategy(reconciler.diff_strategy(args.diff_strategy)?)
		.deadline(args.cluster.deadline())
		.build();
	let opts = ApplyWorkflowOpts::builder()
		.diff(diff)
		.auto_approve(args.auto_approve)
		.force(args.force)
		.validate(args.validate)
		.build();

	let mut stderr = io::stderr();
	let mut prompt = stdin_prompt();
	let result = {
		let mut console = console(&mut writer, &mut stderr, args.cluster.color);
		workflow::apply(&reconciler, &state, &opts, &mut prompt, &mut console).await
	};
	writer.flush()?;
	finish(result)
}
