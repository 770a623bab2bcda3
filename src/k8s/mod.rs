//! Kubernetes-side collaborators: label selectors, cached listers and watches

pub mod lister;
pub mod selector;
pub mod watch;

pub use lister::{ResourceLister, StoreLister};
pub use selector::{parse_label_selector, Selectors};
pub use watch::{spawn_watch, wait_for_cache_sync, Watches};

use kube::{Resource, ResourceExt};

/// Cache key of an object: `namespace/name`, or `name` for cluster-scoped objects
pub fn object_key<K: Resource>(obj: &K) -> String {
    match obj.namespace() {
        Some(ns) if !ns.is_empty() => format!("{}/{}", ns, obj.name_any()),
        _ => obj.name_any(),
    }
}
