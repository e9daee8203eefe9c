//! Bringing a cluster in line with an environment.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;
use tracing::instrument;

use crate::{
	client::{ApplyOpts, ClientError, DeleteOpts, SharedClient, FIELD_MANAGER},
	diff::{self, DiffError, DiffOpts},
	error::MultiError,
	fanout::{try_join_all, Deadline, FanoutError},
	manifest::{List, Manifest},
	process::{self, LABEL_ENVIRONMENT},
	spec::{DiffStrategy, Environment, UnknownDiffStrategy},
	term::{Confirm, ConfirmError},
};

/// Set by client-side `kubectl apply`.
pub const ANNOTATION_LAST_APPLIED: &str = "kubectl.kubernetes.io/last-applied-configuration";

/// Field managers whose objects count as applied by us.
const APPLYING_MANAGERS: &[&str] = &[FIELD_MANAGER, "kubectl-client-side-apply"];

/// Kinds checked for orphans unless every kind is requested.
pub const DEFAULT_PRUNE_KINDS: &[&str] = &[
	// core
	"ConfigMap",
	"Endpoints",
	"Namespace",
	"PersistentVolumeClaim",
	"PersistentVolume",
	"Pod",
	"ReplicationController",
	"Secret",
	"ServiceAccount",
	"Service",
	// apps
	"DaemonSet",
	"Deployment",
	"ReplicaSet",
	"StatefulSet",
	// batch
	"Job",
	"CronJob",
	// networking
	"Ingress",
	// rbac
	"ClusterRole",
	"ClusterRoleBinding",
	"Role",
	"RoleBinding",
];

#[derive(Debug, Error)]
pub enum ReconcileError {
	#[error(
		"spec.injectLabels is set to false in your spec.json. Pruning needs a label on \
		 your resources to reliably detect which were removed from the configuration. \
		 See https://tanka.dev/garbage-collection for more details"
	)]
	PruneRequiresInjectLabels,

	#[error(transparent)]
	Confirm(#[from] ConfirmError),

	#[error(transparent)]
	Client(#[from] ClientError),

	#[error(transparent)]
	Diff(#[from] DiffError),

	#[error("listing orphaned objects")]
	Orphans(#[source] FanoutError<ClientError>),

	#[error("deadline exceeded while listing orphaned objects")]
	DeadlineExceeded,

	#[error(transparent)]
	Delete(MultiError<ClientError>),
}

impl ReconcileError {
	/// The user declined a confirmation prompt.
	pub fn is_aborted(&self) -> bool {
		matches!(self, ReconcileError::Confirm(ConfirmError::Aborted))
	}
}

/// Diff, apply and prune for one environment against one cluster.
pub struct Reconciler {
	client: SharedClient,
	env: Environment,
}

impl Reconciler {
	pub fn new(client: SharedClient, env: Environment) -> Self {
		Self { client, env }
	}

	pub fn client(&self) -> &SharedClient {
		&self.client
	}

	pub fn environment(&self) -> &Environment {
		&self.env
	}

	/// `explicit`, or whatever the environment and cluster call for.
	pub fn diff_strategy(
		&self,
		explicit: Option<DiffStrategy>,
	) -> Result<DiffStrategy, UnknownDiffStrategy> {
		let strategy =
			DiffStrategy::resolve(explicit, &self.env.spec, &self.client.info().server_version)?;
		tracing::debug!(%strategy, "resolved diff strategy");
		Ok(strategy)
	}

	/// The line shown before touching the cluster, e.g.
	/// `Applying to namespace 'default' of cluster 'prod' at 'https://..' using context 'prod'.`
	pub fn target_message(&self, action: &str) -> String {
		let info = self.client.info();
		format!(
			"{action} namespace '{}' of cluster '{}' at '{}' using context '{}'.",
			self.env.spec.namespace, info.cluster_name, info.endpoint, info.context_name
		)
	}

	pub async fn diff(&self, state: &List, opts: &DiffOpts) -> Result<Option<String>, DiffError> {
		diff::diff(&self.client, state, &self.env.spec.namespace, opts).await
	}

	/// Apply `state`, namespaces first.
	///
	/// Asks for confirmation unless `opts.auto_approve`. Namespaces are applied
	/// on their own before everything else, so objects inside them can be
	/// created in the same run.
	#[instrument(skip_all, fields(count = state.len()))]
	pub async fn apply(
		&self,
		state: &List,
		opts: &ApplyOpts,
		confirm: &mut dyn Confirm,
	) -> Result<(), ReconcileError> {
		if !opts.auto_approve {
			confirm.confirm(&self.target_message("Applying to"))?;
		}

		let namespaces: List = state
			.iter()
			.filter(|m| m.kind() == "Namespace")
			.cloned()
			.collect();
		if !namespaces.is_empty() {
			tracing::debug!(count = namespaces.len(), "applying namespaces");
			self.client.apply(&namespaces, opts).await?;
		}

		self.client.apply(state, opts).await?;
		Ok(())
	}

	/// Objects on the cluster carrying this environment's label that `state`
	/// does not declare anymore.
	///
	/// Looks at the [`DEFAULT_PRUNE_KINDS`] the cluster serves, or at every
	/// listable kind if `all_kinds`. Only objects that were applied, not
	/// created by a controller, are reported.
	#[instrument(skip_all, fields(all_kinds = all_kinds))]
	pub async fn orphaned(
		&self,
		state: &List,
		all_kinds: bool,
		deadline: Deadline,
	) -> Result<List, ReconcileError> {
		if !self.env.spec.inject_labels {
			return Err(ReconcileError::PruneRequiresInjectLabels);
		}

		let catalog = self.client.resources().await?;
		let kinds: Vec<String> = if all_kinds {
			catalog.listable_kinds()
		} else {
			DEFAULT_PRUNE_KINDS
				.iter()
				.filter(|kind| {
					let served = catalog.lookup(kind).is_some();
					if !served {
						tracing::debug!(kind, "not served by the cluster, skipping");
					}
					served
				})
				.map(|k| k.to_string())
				.collect()
		};
		tracing::debug!(kinds = kinds.len(), "looking for orphaned objects");

		let labels = BTreeMap::from([(LABEL_ENVIRONMENT.to_string(), self.env.name_label())]);
		let found = try_join_all(kinds, deadline, |kind| {
			let client = self.client.clone();
			let labels = labels.clone();
			async move { client.get_by_labels("", &kind, &labels).await }
		})
		.await
		.map_err(|e| match e {
			FanoutError::DeadlineExceeded => ReconcileError::DeadlineExceeded,
			other => ReconcileError::Orphans(other),
		})?;

		let mut seen = BTreeSet::new();
		let mut orphaned: List = found
			.into_iter()
			.flatten()
			.filter(|m| !is_component_status(m))
			.filter(is_applied)
			.filter(|m| !state.has(m))
			.filter(|m| seen.insert(m.identity()))
			.collect();
		process::sort(&mut orphaned);

		tracing::debug!(count = orphaned.len(), "found orphaned objects");
		Ok(orphaned)
	}

	/// Delete every object in `objects`, in order.
	///
	/// Keeps going after a failure; all failures are reported together.
	/// Objects already gone count as deleted.
	#[instrument(skip_all, fields(count = objects.len(), force = opts.force))]
	pub async fn delete_all(&self, objects: &List, opts: &DeleteOpts) -> Result<(), ReconcileError> {
		let mut errors = Vec::new();
		for object in objects {
			let metadata = object.metadata();
			match self
				.client
				.delete(metadata.namespace(), object.kind(), metadata.name(), opts)
				.await
			{
				Ok(()) => {}
				Err(e) if e.is_not_found() => {
					tracing::debug!(object = %object, "already gone");
				}
				Err(e) => {
					tracing::warn!(object = %object, error = %e, "deleting failed");
					errors.push(e);
				}
			}
		}

		match MultiError::from_vec(errors) {
			Some(errors) => Err(ReconcileError::Delete(errors)),
			None => Ok(()),
		}
	}
}

/// Whether `manifest` was written by an apply, ours or kubectl's, rather than
/// by a controller copying labels from its owner.
fn is_applied(manifest: &Manifest) -> bool {
	let metadata = manifest.metadata();
	metadata.annotation(ANNOTATION_LAST_APPLIED).is_some()
		|| metadata
			.managers()
			.any(|manager| APPLYING_MANAGERS.contains(&manager))
}

/// `ComponentStatus` ignores label selectors on old clusters.
fn is_component_status(manifest: &Manifest) -> bool {
	manifest.api_version() == "v1" && manifest.kind() == "ComponentStatus"
}

#[cfg(test)]
mod tests {
	use std::{io::Cursor, sync::Arc};

	use assert_matches::assert_matches;
	use serde_json::json;

	use super::*;
	use crate::{
		resources::Catalog,
		term::Prompt,
		test_utils::{manifest, Call, MockClient},
	};

	fn environment(inject_labels: bool) -> Environment {
		let mut env = Environment::new();
		env.metadata.name = Some("prod".to_string());
		env.metadata.namespace = Some("environments/prod/main.jsonnet".to_string());
		env.spec.inject_labels = inject_labels;
		env
	}

	/// A labeled object as our apply leaves it.
	fn labeled(env: &Environment, kind: &str, namespace: &str, name: &str) -> Manifest {
		manifest(json!({
			"apiVersion": "v1",
			"kind": kind,
			"metadata": {
				"name": name,
				"namespace": namespace,
				"labels": {LABEL_ENVIRONMENT: env.name_label()},
				"managedFields": [{"manager": FIELD_MANAGER, "operation": "Update"}]
			}
		}))
	}

	fn yes() -> Prompt<Cursor<String>, Vec<u8>> {
		Prompt::new(Cursor::new("yes\n".to_string()), Vec::new())
	}

	#[tokio::test]
	async fn test_apply_namespaces_first() {
		let client = Arc::new(MockClient::new());
		let reconciler = Reconciler::new(client.clone(), environment(false));
		let state = List::from(vec![
			manifest(json!({"apiVersion": "v1", "kind": "Namespace", "metadata": {"name": "ns"}})),
			manifest(json!({
				"apiVersion": "apps/v1", "kind": "Deployment",
				"metadata": {"name": "app", "namespace": "ns"}
			})),
		]);

		reconciler
			.apply(&state, &ApplyOpts::default(), &mut yes())
			.await
			.unwrap();

		assert_eq!(
			client.applied(),
			[
				vec!["Namespace/ns".to_string()],
				vec!["Namespace/ns".to_string(), "Deployment/app".to_string()],
			]
		);
	}

	#[tokio::test]
	async fn test_apply_without_namespaces_is_one_pass() {
		let client = Arc::new(MockClient::new());
		let reconciler = Reconciler::new(client.clone(), environment(false));
		let state = List::from(vec![manifest(json!({
			"apiVersion": "v1", "kind": "ConfigMap",
			"metadata": {"name": "demo", "namespace": "default"}
		}))]);

		let opts = ApplyOpts::builder().auto_approve(true).build();
		reconciler.apply(&state, &opts, &mut yes()).await.unwrap();

		assert_eq!(client.applied(), [vec!["ConfigMap/demo".to_string()]]);
	}

	#[tokio::test]
	async fn test_apply_declined() {
		let client = Arc::new(MockClient::new());
		let reconciler = Reconciler::new(client.clone(), environment(false));
		let mut prompt = Prompt::new(Cursor::new("no\n".to_string()), Vec::new());

		let err = reconciler
			.apply(&List::new(), &ApplyOpts::default(), &mut prompt)
			.await
			.unwrap_err();

		assert!(err.is_aborted());
		assert_eq!(err.to_string(), "aborted by user");
		assert!(client.calls().is_empty());

		let shown = String::from_utf8(prompt.into_output()).unwrap();
		assert!(shown.starts_with(
			"Applying to namespace 'default' of cluster 'test-cluster' at \
			 'https://127.0.0.1:6443' using context 'test-context'.\n"
		));
	}

	#[tokio::test]
	async fn test_orphaned_requires_inject_labels() {
		let reconciler = Reconciler::new(Arc::new(MockClient::new()), environment(false));
		assert_matches!(
			reconciler.orphaned(&List::new(), false, Deadline::none()).await,
			Err(ReconcileError::PruneRequiresInjectLabels)
		);
	}

	#[tokio::test]
	async fn test_orphaned_excludes_declared_objects() {
		let env = environment(true);
		let kept = labeled(&env, "ConfigMap", "default", "kept");
		let orphan = labeled(&env, "ConfigMap", "default", "orphan");
		let foreign = manifest(json!({
			"apiVersion": "v1", "kind": "ConfigMap",
			"metadata": {"name": "foreign", "namespace": "default", "labels": {LABEL_ENVIRONMENT: "other"}}
		}));
		let component_status = manifest(json!({
			"apiVersion": "v1", "kind": "ComponentStatus",
			"metadata": {
				"name": "scheduler",
				"labels": {LABEL_ENVIRONMENT: env.name_label()},
				"managedFields": [{"manager": FIELD_MANAGER}]
			}
		}));
		let client = Arc::new(MockClient::new().with_objects([
			kept.clone(),
			orphan,
			foreign,
			component_status,
		]));
		let reconciler = Reconciler::new(client.clone(), env);

		let orphaned = reconciler
			.orphaned(&List::from(vec![kept]), true, Deadline::none())
			.await
			.unwrap();

		assert_eq!(
			orphaned.iter().map(Manifest::kind_name).collect::<Vec<_>>(),
			["ConfigMap/orphan"]
		);
	}

	#[tokio::test]
	async fn test_orphaned_queries_default_kinds() {
		let client = Arc::new(MockClient::new());
		let reconciler = Reconciler::new(client.clone(), environment(true));

		reconciler
			.orphaned(&List::new(), false, Deadline::none())
			.await
			.unwrap();

		let mut kinds: Vec<String> = client
			.calls()
			.into_iter()
			.filter_map(|call| match call {
				Call::GetByLabels { namespace, kind } if namespace.is_empty() => Some(kind),
				_ => None,
			})
			.collect();
		kinds.sort();
		let mut expected: Vec<String> = DEFAULT_PRUNE_KINDS.iter().map(|k| k.to_string()).collect();
		expected.sort();
		assert_eq!(kinds, expected);
	}

	#[tokio::test]
	async fn test_orphaned_skips_unserved_kinds() {
		let catalog: Catalog = Catalog::builtin()
			.iter()
			.filter(|r| r.kind == "ConfigMap" || r.kind == "Deployment")
			.cloned()
			.collect();
		let client = Arc::new(MockClient::new().with_catalog(catalog));
		let reconciler = Reconciler::new(client.clone(), environment(true));

		reconciler
			.orphaned(&List::new(), false, Deadline::none())
			.await
			.unwrap();

		let kinds: BTreeSet<String> = client
			.calls()
			.into_iter()
			.filter_map(|call| match call {
				Call::GetByLabels { kind, .. } => Some(kind),
				_ => None,
			})
			.collect();
		assert_eq!(
			kinds,
			BTreeSet::from(["ConfigMap".to_string(), "Deployment".to_string()])
		);
	}

	#[tokio::test]
	async fn test_orphaned_only_applied_objects() {
		let env = environment(true);
		let label = env.name_label();
		let client = Arc::new(MockClient::new().with_objects([
			labeled(&env, "ConfigMap", "default", "ours"),
			manifest(json!({
				"apiVersion": "v1",
				"kind": "ConfigMap",
				"metadata": {
					"name": "client-side",
					"namespace": "default",
					"labels": {LABEL_ENVIRONMENT: label},
					"annotations": {ANNOTATION_LAST_APPLIED: "{}"}
				}
			})),
			// Copied labels from its Deployment, written by the controller.
			manifest(json!({
				"apiVersion": "v1",
				"kind": "Pod",
				"metadata": {
					"name": "web-5d8f9",
					"namespace": "default",
					"labels": {LABEL_ENVIRONMENT: label},
					"managedFields": [{"manager": "kube-controller-manager", "operation": "Update"}]
				}
			})),
			manifest(json!({
				"apiVersion": "v1",
				"kind": "Secret",
				"metadata": {
					"name": "unmarked",
					"namespace": "default",
					"labels": {LABEL_ENVIRONMENT: label}
				}
			})),
		]));
		let reconciler = Reconciler::new(client, env);

		let orphaned = reconciler
			.orphaned(&List::new(), false, Deadline::none())
			.await
			.unwrap();

		let names: Vec<_> = orphaned.iter().map(Manifest::kind_name).collect();
		assert_eq!(names, ["ConfigMap/client-side", "ConfigMap/ours"]);
	}

	#[tokio::test]
	async fn test_orphaned_sorted_and_unique() {
		let env = environment(true);
		let client = Arc::new(MockClient::new().with_objects([
			labeled(&env, "Service", "default", "web"),
			labeled(&env, "Namespace", "", "team"),
			labeled(&env, "ConfigMap", "default", "settings"),
		]));
		let reconciler = Reconciler::new(client, env);

		let orphaned = reconciler
			.orphaned(&List::new(), false, Deadline::none())
			.await
			.unwrap();

		assert_eq!(
			orphaned.iter().map(Manifest::kind_name).collect::<Vec<_>>(),
			["Namespace/team", "ConfigMap/settings", "Service/web"]
		);
	}

	#[tokio::test]
	async fn test_delete_all_aggregates_failures() {
		let env = environment(true);
		let objects = List::from(vec![
			labeled(&env, "ConfigMap", "default", "a"),
			labeled(&env, "ConfigMap", "default", "b"),
			labeled(&env, "ConfigMap", "default", "c"),
		]);
		let client = Arc::new(
			MockClient::new()
				.with_objects(objects.iter().cloned())
				.failing_delete("ConfigMap/a")
				.failing_delete("ConfigMap/c"),
		);
		let reconciler = Reconciler::new(client.clone(), env);

		let err = reconciler
			.delete_all(&objects, &DeleteOpts::default())
			.await
			.unwrap_err();

		assert_matches!(err, ReconcileError::Delete(errors) if errors.len() == 2);
		assert_eq!(client.deleted(), ["ConfigMap/a", "ConfigMap/b", "ConfigMap/c"]);
		assert_eq!(client.stored(), ["ConfigMap/a", "ConfigMap/c"]);
	}

	#[tokio::test]
	async fn test_delete_all_tolerates_missing() {
		let env = environment(true);
		let reconciler = Reconciler::new(Arc::new(MockClient::new()), env.clone());
		let objects = List::from(vec![labeled(&env, "ConfigMap", "default", "gone")]);

		reconciler
			.delete_all(&objects, &DeleteOpts::default())
			.await
			.unwrap();
	}

	#[test]
	fn test_diff_strategy() {
		let old = Reconciler::new(
			Arc::new(MockClient::new().with_server_version("1", "12")),
			environment(false),
		);
		assert_eq!(old.diff_strategy(None).unwrap(), DiffStrategy::Subset);
		assert_eq!(
			old.diff_strategy(Some(DiffStrategy::Native)).unwrap(),
			DiffStrategy::Native
		);

		let recent = Reconciler::new(
			Arc::new(MockClient::new().with_server_version("1", "31")),
			environment(false),
		);
		assert_eq!(recent.diff_strategy(None).unwrap(), DiffStrategy::Native);
	}
}
