//! Per-host registry of recently used plugins.
//!
//! Process-lifetime, memory-only. Unbounded in hosts, bounded per host.

use crate::catalog::{create_plugin_id, find_plugin_description, PluginCatalog, PluginDescription};
use dashmap::DashMap;
use std::sync::OnceLock;

static RECENTS: OnceLock<DashMap<String, Vec<PluginDescription>>> = OnceLock::new();

fn registry() -> &'static DashMap<String, Vec<PluginDescription>> {
    RECENTS.get_or_init(DashMap::new)
}

/// Move the plugin identified by `id` to the front of `host`'s list,
/// truncating to `max` entries. Unresolvable ids are ignored.
pub fn add_to_recents(catalog: &dyn PluginCatalog, id: &str, host: &str, max: usize) {
    let Some(desc) = find_plugin_description(catalog, id) else {
        return;
    };
    let mut recents = registry().entry(host.to_string()).or_default();
    recents.retain(|d| d != &desc);
    recents.insert(0, desc);
    recents.truncate(max);
}

/// Render `host`'s list as newline-terminated canonical plugin ids, empty
/// when the host is unknown.
pub fn recents_list(host: &str) -> String {
    let Some(recents) = registry().get(host) else {
        return String::new();
    };
    let mut list = String::new();
    for desc in recents.iter() {
        list.push_str(&create_plugin_id(desc));
        list.push('\n');
    }
    list
}
