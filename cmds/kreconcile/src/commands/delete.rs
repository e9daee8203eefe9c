//! Delete command handler.

use std::{
	io::{self, Write},
	process::ExitCode,
};

use anyhow::Result;
use clap::Args;

use super::util::{console, create_tokio_runtime, finish, prepare, ClusterArgs, EnvironmentArgs};
use crate::{
	term::stdin_prompt,
	workflow::{self, AutoApprove, DeleteWorkflowOpts},
};

#[derive(Args)]
pub struct DeleteArgs {
	#[command(flatten)]
	pub env: EnvironmentArgs,

	#[command(flatten)]
	pub cluster: ClusterArgs,

	/// Skip interactive approval. Only for automation! Allowed values: 'always', 'never', 'if-no-changes'
	#[arg(long, default_value = "never", value_enum)]
	pub auto_approve: AutoApprove,

	/// Force deleting (kubectl delete --force)
	#[arg(long)]
	pub force: bool,
}

/// Run the delete command.
pub fn run<W: Write>(args: DeleteArgs, writer: W) -> Result<ExitCode> {
	let runtime = create_tokio_runtime()?;
	runtime.block_on(run_async(args, writer))
}

async fn run_async<W: Write>(args: DeleteArgs, mut writer: W) -> Result<ExitCode> {
	let (reconciler, state) = prepare(&args.env).await?;

	let opts = DeleteWorkflowOpts::builder()
		.auto_approve(args.auto_approve)
		.force(args.force)
		.build();

	let mut stderr = io::stderr();
	let mut prompt = stdin_prompt();
	let result = {
		let mut console = console(&mut writer, &mut stderr, args.cluster.color);
		workflow::delete(&reconciler, &state, &opts, &mut prompt, &mut console).await
	};
	writer.flush()?;
	finish(result)
}
