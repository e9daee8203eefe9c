//! [`Client`] backed by the Kubernetes API through kube-rs.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::{
	api::{
		Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams,
		ValidationDirective,
	},
	core::TypeMeta,
	discovery::ApiResource,
};
use serde_json::{Map, Value};
use tokio::sync::OnceCell;
use tracing::instrument;

use super::{
	ApiResourceCache, ApplyOpts, Client, ClientError, ClusterConnection, ConnectionError,
	DeleteOpts, DiscoveredResource, Info, FIELD_MANAGER,
};
use crate::{
	diff::diff_str,
	fanout::{try_join_all, Deadline},
	manifest::{List, Manifest},
	resources::Catalog,
	spec::Spec,
	yaml,
};

/// Live cluster client. Discovery runs once, on first use.
pub struct KubeClient {
	client: kube::Client,
	info: Info,
	/// Namespace for namespaced objects that do not set one.
	default_namespace: String,
	api_cache: OnceCell<ApiResourceCache>,
}

impl KubeClient {
	pub fn new(connection: ClusterConnection, default_namespace: impl Into<String>) -> Self {
		Self {
			client: connection.client().clone(),
			info: connection.info().clone(),
			default_namespace: default_namespace.into(),
			api_cache: OnceCell::new(),
		}
	}

	/// Connect to the cluster of an environment.
	pub async fn connect(spec: &Spec) -> Result<Self, ConnectionError> {
		let connection = ClusterConnection::from_spec(spec).await?;
		Ok(Self::new(connection, spec.namespace.clone()))
	}

	async fn api_cache(&self) -> Result<&ApiResourceCache, ClientError> {
		self.api_cache
			.get_or_try_init(|| ApiResourceCache::build(&self.client))
			.await
			.map_err(|e| ClientError::Discovery(Box::new(e)))
	}

	async fn resolve_kind(&self, kind: &str) -> Result<DiscoveredResource, ClientError> {
		self.api_cache()
			.await?
			.lookup_kind(kind)
			.cloned()
			.ok_or_else(|| ClientError::UnknownResource {
				kind: kind.to_string(),
			})
	}

	fn resolve_manifest(
		cache: &ApiResourceCache,
		manifest: &Manifest,
	) -> Result<DiscoveredResource, ClientError> {
		cache
			.resolve(manifest.api_version(), manifest.kind())
			.cloned()
			.ok_or_else(|| ClientError::UnknownResource {
				kind: format!("{}/{}", manifest.api_version(), manifest.kind()),
			})
	}

	/// Namespace an object of `resource` lives in, `""` for cluster-wide ones.
	fn effective_namespace<'a>(&'a self, resource: &DiscoveredResource, namespace: &'a str) -> &'a str {
		match (resource.namespaced(), namespace) {
			(false, _) => "",
			(true, "") => &self.default_namespace,
			(true, ns) => ns,
		}
	}

	/// API for single objects.
	fn object_api(&self, resource: &DiscoveredResource, namespace: &str) -> Api<DynamicObject> {
		match self.effective_namespace(resource, namespace) {
			"" => Api::all_with(self.client.clone(), &resource.api_resource),
			ns => Api::namespaced_with(self.client.clone(), ns, &resource.api_resource),
		}
	}

	/// API for listings. An empty `namespace` lists across all namespaces.
	fn list_api(&self, resource: &DiscoveredResource, namespace: &str) -> Api<DynamicObject> {
		if resource.namespaced() && !namespace.is_empty() {
			Api::namespaced_with(self.client.clone(), namespace, &resource.api_resource)
		} else {
			Api::all_with(self.client.clone(), &resource.api_resource)
		}
	}

	#[instrument(skip_all, fields(object = %manifest))]
	async fn apply_one(
		&self,
		cache: &ApiResourceCache,
		manifest: &Manifest,
		opts: &ApplyOpts,
	) -> Result<(), ClientError> {
		let resource = Self::resolve_manifest(cache, manifest)?;
		let api = self.object_api(&resource, manifest.metadata().namespace());
		let name = manifest.metadata().name();
		let target = manifest.kind_name();
		let body = ensure_annotations(manifest.to_value());

		let params = PatchParams {
			field_manager: Some(FIELD_MANAGER.to_string()),
			field_validation: Some(if opts.validate {
				ValidationDirective::Strict
			} else {
				ValidationDirective::Ignore
			}),
			..Default::default()
		};

		match patch_with_fallback(&api, name, &params, &body).await {
			Ok(_) => {
				tracing::info!("{target} configured");
				Ok(())
			}
			Err(kube::Error::Api(ref err)) if err.code == 404 => {
				create(&api, &target, body, false).await?;
				tracing::info!("{target} created");
				Ok(())
			}
			Err(kube::Error::Api(ref err)) if opts.force && matches!(err.code, 409 | 422) => {
				tracing::debug!(code = err.code, "patch refused, replacing object");
				api.delete(name, &DeleteParams::default())
					.await
					.map_err(|source| api_error("deleting", &target, source))?;
				create(&api, &target, body, false).await?;
				tracing::info!("{target} replaced");
				Ok(())
			}
			Err(source) => Err(api_error("applying", &target, source)),
		}
	}
}

#[async_trait]
impl Client for KubeClient {
	#[instrument(skip(self))]
	async fn get(&self, namespace: &str, kind: &str, name: &str) -> Result<Manifest, ClientError> {
		let resource = self.resolve_kind(kind).await?;
		let api = self.object_api(&resource, namespace);

		match api.get_opt(name).await {
			Ok(Some(object)) => into_manifest(object, &resource.api_resource),
			Ok(None) => Err(ClientError::NotFound {
				namespace: namespace.to_string(),
				kind: kind.to_string(),
				name: name.to_string(),
			}),
			Err(source) => Err(api_error("getting", &format!("{kind}/{name}"), source)),
		}
	}

	#[instrument(skip(self))]
	async fn get_by_labels(
		&self,
		namespace: &str,
		kind: &str,
		labels: &BTreeMap<String, String>,
	) -> Result<List, ClientError> {
		let resource = self.resolve_kind(kind).await?;
		let selector = labels
			.iter()
			.map(|(k, v)| format!("{k}={v}"))
			.collect::<Vec<_>>()
			.join(",");

		let objects = self
			.list_api(&resource, namespace)
			.list(&ListParams::default().labels(&selector))
			.await
			.map_err(|source| api_error("listing", kind, source))?;
		tracing::debug!(count = objects.items.len(), "listed objects");

		objects
			.items
			.into_iter()
			.map(|object| into_manifest(object, &resource.api_resource))
			.collect()
	}

	#[instrument(skip_all, fields(count = data.len(), force = opts.force, validate = opts.validate))]
	async fn apply(&self, data: &List, opts: &ApplyOpts) -> Result<(), ClientError> {
		let cache = self.api_cache().await?;
		for manifest in data {
			self.apply_one(cache, manifest, opts).await?;
		}
		Ok(())
	}

	#[instrument(skip(self, opts), fields(force = opts.force))]
	async fn delete(
		&self,
		namespace: &str,
		kind: &str,
		name: &str,
		opts: &DeleteOpts,
	) -> Result<(), ClientError> {
		let resource = self.resolve_kind(kind).await?;
		let params = DeleteParams {
			grace_period_seconds: opts.force.then_some(0),
			..Default::default()
		};

		match self.object_api(&resource, namespace).delete(name, &params).await {
			Ok(_) => {
				tracing::info!("{kind}/{name} deleted");
				Ok(())
			}
			Err(kube::Error::Api(ref err)) if err.code == 404 => Err(ClientError::NotFound {
				namespace: namespace.to_string(),
				kind: kind.to_string(),
				name: name.to_string(),
			}),
			Err(source) => Err(api_error("deleting", &format!("{kind}/{name}"), source)),
		}
	}

	#[instrument(skip_all, fields(count = data.len()))]
	async fn diff_server_side(&self, data: &List) -> Result<Option<String>, ClientError> {
		let cache = self.api_cache().await?;

		let jobs = data
			.iter()
			.map(|manifest| {
				let resource = Self::resolve_manifest(cache, manifest)?;
				let namespace = self.effective_namespace(&resource, manifest.metadata().namespace());
				let name = native_diff_name(manifest, namespace);
				let api = self.object_api(&resource, namespace);
				Ok((api, manifest.clone(), name))
			})
			.collect::<Result<Vec<_>, ClientError>>()?;

		let mut diffs = try_join_all(jobs, Deadline::none(), |(api, manifest, name)| async move {
			let diff = dry_run_diff(&api, &manifest, &name).await?;
			Ok::<_, ClientError>((name, diff))
		})
		.await?;
		diffs.sort();

		let out: String = diffs.into_iter().map(|(_, diff)| diff).collect();
		Ok((!out.is_empty()).then_some(out))
	}

	#[instrument(skip(self))]
	async fn namespaces(&self) -> Result<BTreeSet<String>, ClientError> {
		let api: Api<Namespace> = Api::all(self.client.clone());
		let namespaces = api
			.list(&ListParams::default())
			.await
			.map_err(|source| api_error("listing", "namespaces", source))?;

		Ok(namespaces
			.items
			.into_iter()
			.filter_map(|ns| ns.metadata.name)
			.collect())
	}

	async fn resources(&self) -> Result<Catalog, ClientError> {
		Ok(self.api_cache().await?.catalog())
	}

	fn info(&self) -> Info {
		self.info.clone()
	}
}

fn api_error(action: &'static str, target: &str, source: kube::Error) -> ClientError {
	ClientError::Api {
		action,
		target: target.to_string(),
		source: Box::new(source),
	}
}

/// Strategic merge patch, or JSON merge patch for types that don't support
/// it (custom resources answer 415).
async fn patch_with_fallback(
	api: &Api<DynamicObject>,
	name: &str,
	params: &PatchParams,
	body: &Value,
) -> Result<DynamicObject, kube::Error> {
	match api.patch(name, params, &Patch::Strategic(body)).await {
		Err(kube::Error::Api(ref err)) if err.code == 415 => {
			api.patch(name, params, &Patch::Merge(body)).await
		}
		result => result,
	}
}

async fn create(
	api: &Api<DynamicObject>,
	target: &str,
	body: Value,
	dry_run: bool,
) -> Result<DynamicObject, ClientError> {
	let object: DynamicObject =
		serde_json::from_value(body).map_err(|source| ClientError::Conversion {
			target: target.to_string(),
			source,
		})?;
	let params = PostParams {
		dry_run,
		field_manager: Some(FIELD_MANAGER.to_string()),
	};
	api.create(&params, &object)
		.await
		.map_err(|source| api_error("creating", target, source))
}

/// Unified diff between the live object and what a dry-run apply returns.
async fn dry_run_diff(
	api: &Api<DynamicObject>,
	manifest: &Manifest,
	diff_name: &str,
) -> Result<String, ClientError> {
	let name = manifest.metadata().name();
	let target = manifest.kind_name();
	let body = ensure_annotations(manifest.to_value());

	let current = api
		.get_opt(name)
		.await
		.map_err(|source| api_error("getting", &target, source))?;

	let (live, merged) = match current {
		None => {
			let created = create(api, &target, body, true).await?;
			(String::new(), object_yaml(&created)?)
		}
		Some(current) => {
			let params = PatchParams {
				dry_run: true,
				field_manager: Some(FIELD_MANAGER.to_string()),
				..Default::default()
			};
			let merged = patch_with_fallback(api, name, &params, &body)
				.await
				.map_err(|source| api_error("dry-run patching", &target, source))?;
			(object_yaml(&current)?, object_yaml(&merged)?)
		}
	};

	Ok(diff_str(diff_name, &live, &merged))
}

/// `group.version.kind.namespace.name`, the group omitted for core types.
fn native_diff_name(manifest: &Manifest, namespace: &str) -> String {
	let api_version = manifest.api_version().replace('/', ".");
	format!(
		"{api_version}.{}.{namespace}.{}",
		manifest.kind(),
		manifest.metadata().name()
	)
}

/// Lists omit apiVersion/kind on their items; put them back.
fn into_manifest(mut object: DynamicObject, resource: &ApiResource) -> Result<Manifest, ClientError> {
	if object.types.is_none() {
		object.types = Some(TypeMeta {
			api_version: resource.api_version.clone(),
			kind: resource.kind.clone(),
		});
	}
	let value = serde_json::to_value(&object).map_err(|source| ClientError::Conversion {
		target: format!("{}/{}", resource.kind, object.metadata.name.as_deref().unwrap_or_default()),
		source,
	})?;
	Ok(Manifest::new(value)?)
}

fn object_yaml(object: &DynamicObject) -> Result<String, ClientError> {
	let value = serde_json::to_value(object).map_err(|source| ClientError::Conversion {
		target: object.metadata.name.clone().unwrap_or_default(),
		source,
	})?;
	yaml::to_yaml(&strip_server_fields(value)).map_err(ClientError::Yaml)
}

/// kubectl always sends `metadata.annotations`, even when empty.
fn ensure_annotations(mut value: Value) -> Value {
	if let Some(Value::Object(metadata)) = value.get_mut("metadata") {
		metadata
			.entry("annotations")
			.or_insert_with(|| Value::Object(Map::new()));
	}
	value
}

/// Drop what only clutters a diff: `managedFields` and the empty
/// annotations [`ensure_annotations`] adds.
fn strip_server_fields(mut value: Value) -> Value {
	if let Some(Value::Object(metadata)) = value.get_mut("metadata") {
		metadata.remove("managedFields");
		if metadata
			.get("annotations")
			.and_then(Value::as_object)
			.is_some_and(Map::is_empty)
		{
			metadata.remove("annotations");
		}
	}
	value
}
