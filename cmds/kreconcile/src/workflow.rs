//! User-facing operations: show, diff, apply, prune and delete.
//!
//! These wrap [`Reconciler`] with what a person at a terminal expects: a diff
//! before anything changes, warnings, and a confirmation prompt.

use std::{fmt, io::Write};

use bon::Builder;
use clap::ValueEnum;
use nu_ansi_term::Color;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;

use crate::{
	client::{ApplyOpts, DeleteOpts},
	diff::{static_diff, DiffError, DiffOpts},
	fanout::Deadline,
	manifest::List,
	reconcile::{ReconcileError, Reconciler},
	term::{colordiff, Confirm, ConfirmError},
	yaml::YamlError,
};

#[derive(Debug, Error)]
pub enum WorkflowError {
	#[error(transparent)]
	Reconcile(#[from] ReconcileError),

	#[error(transparent)]
	Diff(#[from] DiffError),

	#[error(transparent)]
	Confirm(#[from] ConfirmError),

	#[error("rendering YAML")]
	Yaml(#[from] YamlError),

	#[error("writing output")]
	Io(#[from] std::io::Error),
}

impl WorkflowError {
	/// The user declined a confirmation prompt.
	pub fn is_aborted(&self) -> bool {
		match self {
			WorkflowError::Confirm(ConfirmError::Aborted) => true,
			WorkflowError::Reconcile(e) => e.is_aborted(),
			_ => false,
		}
	}
}

/// When to skip the confirmation prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AutoApprove {
	/// Always require manual approval.
	#[default]
	Never,

	/// Never prompt.
	Always,

	/// Prompt only if there are changes.
	IfNoChanges,
}

impl AutoApprove {
	pub fn skips_prompt(self, has_changes: bool) -> bool {
		match self {
			AutoApprove::Never => false,
			AutoApprove::Always => true,
			AutoApprove::IfNoChanges => !has_changes,
		}
	}
}

impl fmt::Display for AutoApprove {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			AutoApprove::Never => write!(f, "never"),
			AutoApprove::Always => write!(f, "always"),
			AutoApprove::IfNoChanges => write!(f, "if-no-changes"),
		}
	}
}

/// Where workflows write: results to `out`, notes and warnings to `err`.
pub struct Console<'a> {
	pub out: &'a mut dyn Write,
	pub err: &'a mut dyn Write,
	pub color: bool,
}

impl Console<'_> {
	fn diff(&mut self, diff: &str) -> std::io::Result<()> {
		if self.color {
			self.out.write_all(colordiff(diff).as_bytes())
		} else {
			self.out.write_all(diff.as_bytes())
		}
	}

	fn note(&mut self, message: &str) -> std::io::Result<()> {
		writeln!(self.err, "{message}")
	}

	fn warn(&mut self, message: &str) -> std::io::Result<()> {
		if self.color {
			writeln!(self.err, "{}", Color::Yellow.paint(message))
		} else {
			writeln!(self.err, "{message}")
		}
	}
}

/// Write `state` as a YAML stream.
pub fn show(state: &List, out: &mut dyn Write) -> Result<(), WorkflowError> {
	out.write_all(state.to_yaml_stream()?.as_bytes())?;
	Ok(())
}

/// Print the differences between `state` and the cluster.
///
/// Returns whether there are any.
#[instrument(skip_all, fields(strategy = %opts.strategy))]
pub async fn diff(
	reconciler: &Reconciler,
	state: &List,
	opts: &DiffOpts,
	console: &mut Console<'_>,
) -> Result<bool, WorkflowError> {
	match reconciler.diff(state, opts).await? {
		Some(diff) => {
			console.diff(&diff)?;
			Ok(true)
		}
		None => {
			console.note("No differences.")?;
			Ok(false)
		}
	}
}

#[derive(Debug, Clone, Default, Builder)]
pub struct ApplyWorkflowOpts {
	#[builder(default)]
	pub diff: DiffOpts,
	#[builder(default)]
	pub auto_approve: AutoApprove,
	#[builder(default)]
	pub force: bool,
	#[builder(default)]
	pub validate: bool,
}

/// Show the diff, confirm, apply.
///
/// A failing diff is reported but does not stop the apply.
#[instrument(skip_all, fields(count = state.len(), auto_approve = %opts.auto_approve))]
pub async fn apply(
	reconciler: &Reconciler,
	state: &List,
	opts: &ApplyWorkflowOpts,
	confirm: &mut dyn Confirm,
	console: &mut Console<'_>,
) -> Result<(), WorkflowError> {
	let has_changes = match reconciler.diff(state, &opts.diff).await {
		Ok(Some(diff)) => {
			console.diff(&diff)?;
			true
		}
		Ok(None) => {
			console.warn("Warning: There are no differences. Your apply may not do anything at all.")?;
			false
		}
		Err(e) => {
			tracing::error!(error = %e, "diffing failed");
			console.warn(&format!("Error diffing: {e}"))?;
			true
		}
	};

	let apply_opts = ApplyOpts::builder()
		.force(opts.force)
		.validate(opts.validate)
		.auto_approve(opts.auto_approve.skips_prompt(has_changes))
		.build();
	reconciler.apply(state, &apply_opts, confirm).await?;
	Ok(())
}

#[derive(Debug, Clone, Default, Builder)]
pub struct PruneWorkflowOpts {
	/// Look at every listable kind instead of the most common ones.
	#[builder(default)]
	pub all_kinds: bool,
	#[builder(default)]
	pub force: bool,
	#[builder(default)]
	pub auto_approve: AutoApprove,
	#[builder(default)]
	pub deadline: Deadline,
}

/// Delete objects of this environment that `state` does not declare anymore.
#[instrument(skip_all, fields(all_kinds = opts.all_kinds))]
pub async fn prune(
	reconciler: &Reconciler,
	state: &List,
	opts: &PruneWorkflowOpts,
	confirm: &mut dyn Confirm,
	console: &mut Console<'_>,
) -> Result<(), WorkflowError> {
	let orphaned = reconciler
		.orphaned(state, opts.all_kinds, opts.deadline)
		.await?;
	if orphaned.is_empty() {
		console.note("Nothing found to prune.")?;
		return Ok(());
	}

	if let Some(diff) = static_diff(&orphaned, false)? {
		console.diff(&diff)?;
	}

	let namespaces = orphaned.namespaces();
	if !namespaces.is_empty() {
		console.warn("WARNING: This will delete following namespaces and all resources in them:")?;
		for namespace in namespaces {
			console.warn(&format!(" - {namespace}"))?;
		}
		console.note("")?;
	}

	if !opts.auto_approve.skips_prompt(true) {
		confirm.confirm(&reconciler.target_message("Pruning from"))?;
	}

	// Reverse sort order: namespaces go after what is inside them.
	let reversed: List = orphaned.iter().rev().cloned().collect();
	let delete_opts = DeleteOpts::builder().force(opts.force).build();
	reconciler.delete_all(&reversed, &delete_opts).await?;
	Ok(())
}

#[derive(Debug, Clone, Default, Builder)]
pub struct DeleteWorkflowOpts {
	#[builder(default)]
	pub force: bool,
	#[builder(default)]
	pub auto_approve: AutoApprove,
}

/// Delete every object `state` declares, dependents before their namespaces.
#[instrument(skip_all, fields(count = state.len()))]
pub async fn delete(
	reconciler: &Reconciler,
	state: &List,
	opts: &DeleteWorkflowOpts,
	confirm: &mut dyn Confirm,
	console: &mut Console<'_>,
) -> Result<(), WorkflowError> {
	if let Some(diff) = static_diff(state, false)? {
		console.diff(&diff)?;
	}

	if !opts.auto_approve.skips_prompt(!state.is_empty()) {
		confirm.confirm(&reconciler.target_message("Deleting from"))?;
	}

	let reversed: List = state.iter().rev().cloned().collect();
	let delete_opts = DeleteOpts::builder().force(opts.force).build();
	reconciler.delete_all(&reversed, &delete_opts).await?;
	Ok(())
}
