//! Show command handler.

use std::io::{self, IsTerminal, Write};

use anyhow::Result;
use clap::Args;

use super::util::EnvironmentArgs;
use crate::{resources::Catalog, workflow};

const REDIRECT_REFUSED: &str = "\
Redirection of the output of kreconcile show is discouraged and disabled by default.
Otherwise run kreconcile show --dangerous-allow-redirect to bypass this check.";

#[derive(Args)]
pub struct ShowArgs {
	#[command(flatten)]
	pub env: EnvironmentArgs,

	/// Allow redirecting output to a file or a pipe
	#[arg(long)]
	pub dangerous_allow_redirect: bool,
}

/// Run the show command.
///
/// Namespacing uses the builtin resource catalog; no cluster is contacted.
pub fn run<W: Write>(args: ShowArgs, writer: W) -> Result<()> {
	run_with(args, writer, io::stdout().is_terminal())
}

fn run_with<W: Write>(args: ShowArgs, mut writer: W, interactive: bool) -> Result<()> {
	if !interactive && !args.dangerous_allow_redirect {
		eprintln!("{REDIRECT_REFUSED}");
		return Ok(());
	}

	let env = args.env.load_environment()?;
	let state = args.env.load_manifests(&env, &Catalog::builtin())?;
	workflow::show(&state, &mut writer)?;
	writer.flush()?;
	Ok(())
}
