//! Integration tests for applying an environment to the mock API server.

mod common;

use std::io::Cursor;

use assert_matches::assert_matches;
use k8s_mock::DiscoveryMode;
use kreconcile::{
	client::ApplyOpts,
	diff::DiffOpts,
	reconcile::ReconcileError,
	term::{ConfirmError, Prompt},
	workflow::{self, ApplyWorkflowOpts, AutoApprove, Console},
};
use rstest::rstest;
use serde_json::{json, Value};

use common::{cluster, environment, reconciler, state};

fn tree() -> Value {
	json!({
		"app": {
			"namespace": {
				"apiVersion": "v1",
				"kind": "Namespace",
				"metadata": {"name": "shop"}
			},
			"settings": {
				"apiVersion": "v1",
				"kind": "ConfigMap",
				"metadata": {"name": "settings", "namespace": "shop"},
				"data": {"mode": "fast"}
			},
			"web": {
				"apiVersion": "apps/v1",
				"kind": "Deployment",
				"metadata": {"name": "web"},
				"spec": {"replicas": 2}
			}
		}
	})
}

fn approve_all() -> ApplyOpts {
	ApplyOpts::builder().auto_approve(true).validate(true).build()
}

#[rstest]
#[case::aggregated(DiscoveryMode::Aggregated)]
#[case::legacy(DiscoveryMode::Legacy)]
#[tokio::test]
async fn test_apply_creates_then_settles(#[case] mode: DiscoveryMode) {
	let server = cluster(mode, Vec::new()).await;
	let reconciler = reconciler(&server, environment("shop", true)).await;
	let state = state(&reconciler, tree()).await;

	let mut prompt = Prompt::new(Cursor::new(String::new()), Vec::new());
	reconciler
		.apply(&state, &approve_all(), &mut prompt)
		.await
		.unwrap();

	let settings = server.object("ConfigMap", "settings").unwrap();
	assert_eq!(settings["data"]["mode"], "fast");
	assert_eq!(
		settings["metadata"]["labels"]["tanka.dev/environment"],
		reconciler.environment().name_label()
	);
	assert_eq!(
		settings["metadata"]["annotations"]["tanka.dev/jsonpath"],
		".app.settings"
	);

	let web = server.object("Deployment", "web").unwrap();
	assert_eq!(web["metadata"]["namespace"], "default");
	assert!(server.object("Namespace", "shop").is_some());

	let diff = reconciler.diff(&state, &DiffOpts::default()).await.unwrap();
	assert_eq!(diff, None);
}

#[tokio::test]
async fn test_apply_updates_existing() {
	let server = cluster(
		DiscoveryMode::Aggregated,
		vec![json!({
			"apiVersion": "v1",
			"kind": "ConfigMap",
			"metadata": {"name": "settings", "namespace": "shop"},
			"data": {"mode": "slow"}
		})],
	)
	.await;
	let reconciler = reconciler(&server, environment("shop", false)).await;
	let state = state(&reconciler, tree()).await;

	let mut prompt = Prompt::new(Cursor::new(String::new()), Vec::new());
	reconciler
		.apply(&state, &approve_all(), &mut prompt)
		.await
		.unwrap();

	let settings = server.object("ConfigMap", "settings").unwrap();
	assert_eq!(settings["data"]["mode"], "fast");
}

#[tokio::test]
async fn test_apply_declined_changes_nothing() {
	let server = cluster(DiscoveryMode::Aggregated, Vec::new()).await;
	let reconciler = reconciler(&server, environment("shop", true)).await;
	let state = state(&reconciler, tree()).await;

	let mut prompt = Prompt::new(Cursor::new("no\n".to_string()), Vec::new());
	let result = reconciler
		.apply(&state, &ApplyOpts::default(), &mut prompt)
		.await;
	assert_matches!(result, Err(ReconcileError::Confirm(ConfirmError::Aborted)));

	let prompt_text = String::from_utf8(prompt.into_output()).unwrap();
	assert!(
		prompt_text.starts_with(&format!(
			"Applying to namespace 'default' of cluster 'mock-cluster' at '{}' using context 'mock-context'.",
			server.uri()
		)),
		"{prompt_text}"
	);

	let writes: Vec<String> = server
		.requests()
		.await
		.into_iter()
		.filter(|r| r.starts_with("POST") || r.starts_with("PATCH"))
		.collect();
	assert!(writes.is_empty(), "{writes:?}");
}

#[tokio::test]
async fn test_apply_workflow_shows_diff() {
	let server = cluster(DiscoveryMode::Aggregated, Vec::new()).await;
	let reconciler = reconciler(&server, environment("shop", true)).await;
	let state = state(&reconciler, tree()).await;

	let opts = ApplyWorkflowOpts::builder()
		.auto_approve(AutoApprove::Always)
		.validate(true)
		.build();
	let mut prompt = Prompt::new(Cursor::new(String::new()), Vec::new());
	let (mut out, mut err) = (Vec::new(), Vec::new());
	let mut console = Console {
		out: &mut out,
		err: &mut err,
		color: false,
	};
	workflow::apply(&reconciler, &state, &opts, &mut prompt, &mut console)
		.await
		.unwrap();

	let out = String::from_utf8(out).unwrap();
	assert!(out.contains("MERGED/v1.Namespace..shop"), "{out}");
	assert!(out.contains("MERGED/apps.v1.Deployment.default.web"), "{out}");
	// The namespace does not exist yet, so its content is diffed statically.
	assert!(out.contains("MERGED/v1.ConfigMap.shop.settings"), "{out}");
	assert!(server.object("Deployment", "web").is_some());
}
