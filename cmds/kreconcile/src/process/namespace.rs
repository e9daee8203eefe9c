//! Default namespace injection.

use crate::{
	manifest::{List, Manifest},
	process::ANNOTATION_NAMESPACED,
	resources::Catalog,
};

/// Whether `manifest` lives in a namespace.
///
/// The `tanka.dev/namespaced` annotation overrides the catalog: `"true"`
/// means namespaced, any other value means cluster-wide.
fn is_namespaced(manifest: &Manifest, catalog: &Catalog) -> bool {
	match manifest.metadata().annotation(ANNOTATION_NAMESPACED) {
		Some(value) => value == "true",
		None => catalog.namespaced(manifest),
	}
}

/// Give every namespaced manifest without a namespace `default_namespace`.
///
/// Does nothing when `default_namespace` is empty. Leaves no empty
/// `annotations` map behind.
pub fn namespace(mut list: List, default_namespace: &str, catalog: &Catalog) -> List {
	if default_namespace.is_empty() {
		return list;
	}

	for manifest in list.iter_mut() {
		let namespaced = is_namespaced(manifest, catalog);
		let mut metadata = manifest.metadata_mut();
		if namespaced && !metadata.has_namespace() {
			metadata.set_namespace(default_namespace);
		}
		metadata.prune_empty_annotations();
	}

	list
}
