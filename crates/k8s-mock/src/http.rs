//! HTTP-based mock Kubernetes server using wiremock.
//!
//! A real HTTP server, so actual kubeconfig-based connections work against
//! it. Objects live in memory; GET, LIST (with label selectors), POST, PATCH
//! and DELETE behave like the API server for the parts clients rely on,
//! including `dryRun` and 404/409 statuses.

use std::sync::Arc;

use bon::Builder;
use kube::config::{
	AuthInfo, Cluster, Context, Kubeconfig, NamedAuthInfo, NamedCluster, NamedContext,
};
use serde_json::{json, Value};
use tracing::{debug, trace};
use wiremock::{
	matchers::{header_regex, method, path, path_regex},
	Mock, MockServer, Request, ResponseTemplate,
};

use crate::{
	discovery::{DiscoveryMode, MockApiResource, MockDiscovery},
	store::{parse_selector, ObjectKey, Store, StoreError},
};

const AGGREGATED_DISCOVERY_CONTENT_TYPE: &str =
	"application/json;g=apidiscovery.k8s.io;v=v2;as=APIGroupDiscoveryList";

/// A mock Kubernetes server exposed over HTTP.
#[derive(Builder)]
pub struct HttpMockK8sServer {
	#[builder(default)]
	discovery_mode: DiscoveryMode,
	#[builder(default)]
	discovery: MockDiscovery,
	/// Objects present at startup. Their paths are derived from apiVersion
	/// and kind through discovery; unknown kinds are skipped.
	#[builder(default)]
	resources: Vec<Value>,
	/// Reported by `/version`.
	#[builder(default = (1, 28))]
	version: (u32, u32),
}

/// A running HTTP mock server instance.
pub struct RunningHttpMockK8sServer {
	server: MockServer,
	store: Arc<Store>,
}

impl HttpMockK8sServer {
	/// Start the mock server with all configured resources.
	pub async fn start(self) -> RunningHttpMockK8sServer {
		let server = MockServer::start().await;
		debug!(uri = %server.uri(), "Started mock K8s server");

		let store = Arc::new(Store::default());
		for manifest in self.resources {
			match ObjectKey::for_manifest(&manifest, &self.discovery) {
				Some(key) => {
					trace!(?key, "Registered resource");
					store.insert(key, manifest);
				}
				None => debug!("Skipping resource of unknown kind"),
			}
		}

		let default_namespace = json!({
			"apiVersion": "v1",
			"kind": "Namespace",
			"metadata": {"name": "default"}
		});
		if let Some(key) = ObjectKey::for_manifest(&default_namespace, &self.discovery) {
			if store.get(&key).is_none() {
				store.insert(key, default_namespace);
			}
		}

		mount_version(&server, self.version).await;
		mount_discovery(&server, &self.discovery, self.discovery_mode).await;
		mount_objects(&server, Arc::new(self.discovery), &store).await;

		RunningHttpMockK8sServer { server, store }
	}
}

impl RunningHttpMockK8sServer {
	/// Get the server's URI (e.g., "http://127.0.0.1:12345").
	pub fn uri(&self) -> String {
		self.server.uri()
	}

	/// Every object currently stored.
	pub fn objects(&self) -> Vec<Value> {
		self.store.snapshot()
	}

	/// The stored object of `kind` named `name`, in any namespace.
	pub fn object(&self, kind: &str, name: &str) -> Option<Value> {
		self.objects().into_iter().find(|o| {
			o.get("kind").and_then(Value::as_str) == Some(kind)
				&& o.pointer("/metadata/name").and_then(Value::as_str) == Some(name)
		})
	}

	/// `METHOD /path?query` of every request received so far.
	pub async fn requests(&self) -> Vec<String> {
		self.server
			.received_requests()
			.await
			.unwrap_or_default()
			.iter()
			.map(|r| match r.url.query() {
				Some(query) => format!("{} {}?{query}", r.method, r.url.path()),
				None => format!("{} {}", r.method, r.url.path()),
			})
			.collect()
	}

	/// Create a Kubeconfig pointing to this mock server.
	pub fn kubeconfig(&self) -> Kubeconfig {
		self.kubeconfig_with_context("mock-context")
	}

	/// Create a Kubeconfig pointing to this mock server with a custom context name.
	pub fn kubeconfig_with_context(&self, context_name: &str) -> Kubeconfig {
		let cluster_name = "mock-cluster";
		let user_name = "mock-user";

		Kubeconfig {
			clusters: vec![NamedCluster {
				name: cluster_name.to_string(),
				cluster: Some(Cluster {
					server: Some(self.uri()),
					insecure_skip_tls_verify: Some(true),
					..Default::default()
				}),
			}],
			contexts: vec![NamedContext {
				name: context_name.to_string(),
				context: Some(Context {
					cluster: cluster_name.to_string(),
					user: Some(user_name.to_string()),
					namespace: Some("default".to_string()),
					..Default::default()
				}),
			}],
			auth_infos: vec![NamedAuthInfo {
				name: user_name.to_string(),
				auth_info: Some(AuthInfo::default()),
			}],
			current_context: Some(context_name.to_string()),
			..Default::default()
		}
	}
}

/// A request path split into its parts, e.g.
/// `/apis/apps/v1/namespaces/web/deployments/api`.
#[derive(Debug, PartialEq, Eq)]
struct ResourcePath {
	api_version: String,
	namespace: Option<String>,
	plural: String,
	name: Option<String>,
}

impl ResourcePath {
	fn parse(path: &str) -> Option<Self> {
		let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
		let (api_version, rest) = match segments.as_slice() {
			["api", version, rest @ ..] => (version.to_string(), rest),
			["apis", group, version, rest @ ..] => (format!("{group}/{version}"), rest),
			_ => return None,
		};

		let (namespace, rest) = match rest {
			["namespaces", namespace, rest @ ..] if !rest.is_empty() => {
				(Some(namespace.to_string()), rest)
			}
			rest => (None, rest),
		};

		match rest {
			[plural] => Some(Self {
				api_version,
				namespace,
				plural: plural.to_string(),
				name: None,
			}),
			[plural, name] => Some(Self {
				api_version,
				namespace,
				plural: plural.to_string(),
				name: Some(name.to_string()),
			}),
			_ => None,
		}
	}

	fn key(&self, resource: &MockApiResource, name: String) -> ObjectKey {
		let namespace = resource
			.namespaced
			.then(|| self.namespace.clone().unwrap_or_else(|| "default".to_string()));
		ObjectKey {
			api_version: self.api_version.clone(),
			plural: self.plural.clone(),
			namespace,
			name,
		}
	}
}

fn status(code: u16, reason: &str, message: impl Into<String>) -> ResponseTemplate {
	ResponseTemplate::new(code).set_body_json(json!({
		"kind": "Status",
		"apiVersion": "v1",
		"metadata": {},
		"status": "Failure",
		"message": message.into(),
		"reason": reason,
		"code": code
	}))
}

fn not_found(path: &ResourcePath) -> ResponseTemplate {
	let name = path.name.as_deref().unwrap_or_default();
	status(404, "NotFound", format!("{} \"{name}\" not found", path.plural))
}

fn query_param(req: &Request, name: &str) -> Option<String> {
	req.url
		.query_pairs()
		.find(|(key, _)| key == name)
		.map(|(_, value)| value.into_owned())
}

fn is_dry_run(req: &Request) -> bool {
	query_param(req, "dryRun").is_some()
}

/// Resolve the request path, answering 404 for anything discovery does not
/// serve.
fn resolve<'a>(
	req: &Request,
	discovery: &'a MockDiscovery,
) -> Result<(ResourcePath, &'a MockApiResource), ResponseTemplate> {
	let path = ResourcePath::parse(req.url.path())
		.ok_or_else(|| status(404, "NotFound", "the server could not find the requested resource"))?;
	let resource = discovery
		.by_plural(&path.api_version, &path.plural)
		.ok_or_else(|| status(404, "NotFound", "the server could not find the requested resource"))?;
	Ok((path, resource))
}

fn handle_get(req: &Request, discovery: &MockDiscovery, store: &Store) -> ResponseTemplate {
	let (path, resource) = match resolve(req, discovery) {
		Ok(resolved) => resolved,
		Err(response) => return response,
	};

	if let Some(name) = path.name.clone() {
		return match store.get(&path.key(resource, name)) {
			Some(object) => ResponseTemplate::new(200).set_body_json(object),
			None => not_found(&path),
		};
	}

	let selector = query_param(req, "labelSelector")
		.map(|s| parse_selector(&s))
		.unwrap_or_default();
	let namespace = if resource.namespaced {
		path.namespace.as_deref()
	} else {
		None
	};
	let items = store.list(&path.api_version, &path.plural, namespace, &selector);
	ResponseTemplate::new(200).set_body_json(json!({
		"kind": format!("{}List", resource.kind),
		"apiVersion": path.api_version,
		"metadata": {"resourceVersion": "1"},
		"items": items
	}))
}

fn handle_post(req: &Request, discovery: &MockDiscovery, store: &Store) -> ResponseTemplate {
	let (path, resource) = match resolve(req, discovery) {
		Ok(resolved) => resolved,
		Err(response) => return response,
	};
	let Ok(body) = serde_json::from_slice::<Value>(&req.body) else {
		return status(400, "BadRequest", "invalid JSON body");
	};
	let Some(name) = body.pointer("/metadata/name").and_then(Value::as_str).map(str::to_owned) else {
		return status(422, "Invalid", "metadata.name: Required value");
	};

	let key = path.key(resource, name.clone());
	let manager = query_param(req, "fieldManager");
	match store.create(key, body, manager.as_deref(), is_dry_run(req)) {
		Ok(object) => ResponseTemplate::new(201).set_body_json(object),
		Err(_) => status(
			409,
			"AlreadyExists",
			format!("{} \"{name}\" already exists", path.plural),
		),
	}
}

fn handle_patch(req: &Request, discovery: &MockDiscovery, store: &Store) -> ResponseTemplate {
	let (path, resource) = match resolve(req, discovery) {
		Ok(resolved) => resolved,
		Err(response) => return response,
	};
	let Some(name) = path.name.clone() else {
		return status(405, "MethodNotAllowed", "PATCH needs an object name");
	};
	let Ok(patch) = serde_json::from_slice::<Value>(&req.body) else {
		return status(400, "BadRequest", "invalid JSON body");
	};

	let manager = query_param(req, "fieldManager");
	match store.patch(path.key(resource, name), patch, manager.as_deref(), is_dry_run(req)) {
		Ok(object) => ResponseTemplate::new(200).set_body_json(object),
		Err(StoreError::NotFound | StoreError::AlreadyExists) => not_found(&path),
	}
}

fn handle_delete(req: &Request, discovery: &MockDiscovery, store: &Store) -> ResponseTemplate {
	let (path, resource) = match resolve(req, discovery) {
		Ok(resolved) => resolved,
		Err(response) => return response,
	};
	let Some(name) = path.name.clone() else {
		return status(405, "MethodNotAllowed", "collection deletion is not supported");
	};

	match store.delete(&path.key(resource, name)) {
		Ok(object) => ResponseTemplate::new(200).set_body_json(object),
		Err(_) => not_found(&path),
	}
}

async fn mount_objects(server: &MockServer, discovery: Arc<MockDiscovery>, store: &Arc<Store>) {
	type Handler = fn(&Request, &MockDiscovery, &Store) -> ResponseTemplate;
	let handlers: [(&str, Handler); 4] = [
		("GET", handle_get),
		("POST", handle_post),
		("PATCH", handle_patch),
		("DELETE", handle_delete),
	];

	for (verb, handler) in handlers {
		let discovery = Arc::clone(&discovery);
		let store = Arc::clone(store);
		Mock::given(method(verb))
			.and(path_regex(r"^/apis?/.+"))
			.respond_with(move |req: &Request| handler(req, &discovery, &store))
			.mount(server)
			.await;
	}
}

async fn mount_version(server: &MockServer, (major, minor): (u32, u32)) {
	Mock::given(method("GET"))
		.and(path("/version"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({
			"major": major.to_string(),
			"minor": minor.to_string(),
			"gitVersion": format!("v{major}.{minor}.0"),
			"gitCommit": "fake",
			"gitTreeState": "clean",
			"buildDate": "2024-01-01T00:00:00Z",
			"goVersion": "go1.21.0",
			"compiler": "gc",
			"platform": "linux/amd64"
		})))
		.mount(server)
		.await;
}

fn scope(resource: &MockApiResource) -> &'static str {
	if resource.namespaced {
		"Namespaced"
	} else {
		"Cluster"
	}
}

fn aggregated_group(group: &str, version: &str, resources: &[MockApiResource]) -> Value {
	let resources: Vec<_> = resources
		.iter()
		.map(|r| {
			json!({
				"resource": r.name,
				"responseKind": {"group": group, "version": version, "kind": r.kind},
				"scope": scope(r),
				"verbs": r.verbs,
			})
		})
		.collect();
	json!({
		"metadata": {"name": group},
		"versions": [{"version": version, "resources": resources, "freshness": "Current"}]
	})
}

fn resource_list(group_version: &str, resources: &[MockApiResource]) -> Value {
	let resources: Vec<_> = resources
		.iter()
		.map(|r| {
			json!({
				"name": r.name,
				"singularName": "",
				"namespaced": r.namespaced,
				"kind": r.kind,
				"verbs": r.verbs,
			})
		})
		.collect();
	json!({
		"kind": "APIResourceList",
		"apiVersion": "v1",
		"groupVersion": group_version,
		"resources": resources
	})
}

async fn mount_aggregated(server: &MockServer, at: &str, items: Vec<Value>, mode: DiscoveryMode) {
	let response = match mode {
		DiscoveryMode::Aggregated => {
			let body = json!({
				"kind": "APIGroupDiscoveryList",
				"apiVersion": "apidiscovery.k8s.io/v2",
				"items": items
			});
			// set_body_json would overwrite the content type clients check for.
			ResponseTemplate::new(200)
				.set_body_raw(body.to_string().into_bytes(), AGGREGATED_DISCOVERY_CONTENT_TYPE)
		}
		DiscoveryMode::Legacy => ResponseTemplate::new(406),
	};

	Mock::given(method("GET"))
		.and(path(at))
		.and(header_regex("accept", "apidiscovery"))
		.respond_with(response)
		.mount(server)
		.await;
}

async fn mount_discovery(server: &MockServer, discovery: &MockDiscovery, mode: DiscoveryMode) {
	// Aggregated endpoints are mounted first so they win for matching requests.
	mount_aggregated(
		server,
		"/api",
		vec![aggregated_group("", "v1", &discovery.core_resources)],
		mode,
	)
	.await;
	let groups = discovery
		.group_resources
		.iter()
		.map(|(gv, resources)| {
			let (group, version) = gv.split_once('/').unwrap_or(("", gv));
			aggregated_group(group, version, resources)
		})
		.collect();
	mount_aggregated(server, "/apis", groups, mode).await;

	Mock::given(method("GET"))
		.and(path("/api"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({
			"kind": "APIVersions",
			"versions": ["v1"],
			"serverAddressByClientCIDRs": []
		})))
		.mount(server)
		.await;

	let groups: Vec<_> = discovery
		.group_resources
		.keys()
		.map(|gv| {
			let (group, version) = gv.split_once('/').unwrap_or(("", gv));
			json!({
				"name": group,
				"versions": [{"groupVersion": gv, "version": version}],
				"preferredVersion": {"groupVersion": gv, "version": version}
			})
		})
		.collect();
	Mock::given(method("GET"))
		.and(path("/apis"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({
			"kind": "APIGroupList",
			"apiVersion": "v1",
			"groups": groups
		})))
		.mount(server)
		.await;

	Mock::given(method("GET"))
		.and(path("/api/v1"))
		.respond_with(
			ResponseTemplate::new(200).set_body_json(resource_list("v1", &discovery.core_resources)),
		)
		.mount(server)
		.await;

	for (gv, resources) in &discovery.group_resources {
		Mock::given(method("GET"))
			.and(path(format!("/apis/{gv}")))
			.respond_with(ResponseTemplate::new(200).set_body_json(resource_list(gv, resources)))
			.mount(server)
			.await;
	}
}
