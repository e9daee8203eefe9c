//! Shared setup for tests against the mock API server.

#![allow(dead_code)]

use std::sync::Arc;

use k8s_mock::{DiscoveryMode, HttpMockK8sServer, RunningHttpMockK8sServer};
use kreconcile::{
	client::{Client, ClusterConnection, KubeClient, SharedClient, FIELD_MANAGER},
	manifest::List,
	process::{self, Matchers, Node},
	reconcile::Reconciler,
	spec::{Environment, Spec},
};
use serde_json::Value;

pub const CONTEXT: &str = "mock-context";

/// Start a mock cluster holding `objects`.
pub async fn cluster(mode: DiscoveryMode, objects: Vec<Value>) -> RunningHttpMockK8sServer {
	HttpMockK8sServer::builder()
		.discovery_mode(mode)
		.resources(objects)
		.build()
		.start()
		.await
}

pub fn environment(name: &str, inject_labels: bool) -> Environment {
	let mut env = Environment::new();
	env.metadata.name = Some(name.to_string());
	env.metadata.namespace = Some(format!("environments/{name}/main.jsonnet"));
	env.spec = Spec {
		context_names: Some(vec![CONTEXT.to_string()]),
		inject_labels,
		..Spec::default()
	};
	env
}

pub async fn client(server: &RunningHttpMockK8sServer, env: &Environment) -> SharedClient {
	let connection = ClusterConnection::from_spec_with_kubeconfig(&env.spec, server.kubeconfig())
		.await
		.expect("connecting to the mock server");
	Arc::new(KubeClient::new(connection, env.spec.namespace.clone()))
}

pub async fn reconciler(server: &RunningHttpMockK8sServer, env: Environment) -> Reconciler {
	let client = client(server, &env).await;
	Reconciler::new(client, env)
}

/// Process an evaluated configuration tree with the cluster's catalog.
pub async fn state(reconciler: &Reconciler, tree: Value) -> List {
	let catalog = reconciler
		.client()
		.resources()
		.await
		.expect("listing resources");
	process::process(
		Node::from(tree),
		reconciler.environment(),
		&catalog,
		&Matchers::new::<&str>(&[]).expect("no matchers"),
	)
	.expect("processing the tree")
}

/// A labeled object as a previous apply of `env` would have left it.
pub fn owned_config_map(env: &Environment, namespace: &str, name: &str) -> Value {
	serde_json::json!({
		"apiVersion": "v1",
		"kind": "ConfigMap",
		"metadata": {
			"name": name,
			"namespace": namespace,
			"labels": {"tanka.dev/environment": env.name_label()},
			"managedFields": [{"manager": FIELD_MANAGER, "operation": "Update"}]
		},
		"data": {"key": "value"}
	})
}
