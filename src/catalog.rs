//! Plugin descriptions, identifiers, and the catalog seam.
//!
//! The catalog itself (scanning, persistence) lives outside this crate; the
//! core consumes it read-only to resolve identifiers and instantiate plugins.
//!
//! Two textual id forms are recognized. The canonical form is
//! `<format>-<name>-<hex-id>`; the legacy form carries an extra file-hash
//! segment (`<format>-<name>-<file-hash>-<hex-id>`) which conversion strips.
//! As a last resort an id may be a filesystem path resolved by the catalog.

use crate::instance::PluginInstance;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Plugin format tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PluginFormat {
    AudioUnit,
    Vst,
    Vst3,
}

impl fmt::Display for PluginFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginFormat::AudioUnit => write!(f, "AudioUnit"),
            PluginFormat::Vst => write!(f, "VST"),
            PluginFormat::Vst3 => write!(f, "VST3"),
        }
    }
}

impl FromStr for PluginFormat {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s {
            "AudioUnit" => Ok(PluginFormat::AudioUnit),
            "VST" => Ok(PluginFormat::Vst),
            "VST3" => Ok(PluginFormat::Vst3),
            _ => Err(()),
        }
    }
}

/// Catalog entry describing an installed plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginDescription {
    pub format: PluginFormat,
    pub name: String,
    /// Stable unique id within the format.
    pub uid: i32,
    pub file_or_identifier: String,
    pub num_inputs: u16,
    pub num_outputs: u16,
    pub supports_f64: bool,
}

impl PluginDescription {
    pub fn new(format: PluginFormat, name: impl Into<String>, uid: i32) -> Self {
        Self {
            format,
            name: name.into(),
            uid,
            file_or_identifier: String::new(),
            num_inputs: 2,
            num_outputs: 2,
            supports_f64: false,
        }
    }

    pub fn file(mut self, file_or_identifier: impl Into<String>) -> Self {
        self.file_or_identifier = file_or_identifier.into();
        self
    }

    pub fn io(mut self, inputs: u16, outputs: u16) -> Self {
        self.num_inputs = inputs;
        self.num_outputs = outputs;
        self
    }

    pub fn f64_support(mut self, supports_f64: bool) -> Self {
        self.supports_f64 = supports_f64;
        self
    }
}

/// Read-only view of the installed-plugin catalog.
pub trait PluginCatalog: Send + Sync {
    fn get_types(&self) -> Vec<PluginDescription>;

    fn get_type_for_file(&self, path: &str) -> Option<PluginDescription>;

    /// Instantiate a plugin at the given rate and block size. Must be invoked
    /// on the message thread; the error string is the SDK's human-readable
    /// reason.
    fn create_instance(
        &self,
        desc: &PluginDescription,
        sample_rate: f64,
        block_size: usize,
    ) -> std::result::Result<Box<dyn PluginInstance>, String>;
}

/// Canonical id for a description: `<format>-<name>-<hex-id>`.
pub fn create_plugin_id(desc: &PluginDescription) -> String {
    format!("{}-{}-{:x}", desc.format, desc.name, desc.uid as u32)
}

/// Convert a legacy id (`<format>-<name>-<file-hash>-<hex-id>`) to canonical
/// form. Returns `None` unless the format tag is recognized and the file-hash
/// segment is hex.
pub fn convert_legacy_id(id: &str) -> Option<String> {
    let (format, rest) = id.split_once('-')?;
    PluginFormat::from_str(format).ok()?;
    let (rest, plugin_id) = rest.rsplit_once('-')?;
    let (name, file_hash) = rest.rsplit_once('-')?;

    let file_hash = file_hash.to_ascii_lowercase();
    if !file_hash
        .bytes()
        .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    {
        return None;
    }

    let converted = format!("{format}-{name}-{plugin_id}");
    debug!("converted legacy id {id} to {converted}");
    Some(converted)
}

/// Resolve an id against the catalog: by canonical id, by converted legacy
/// id, or as a filesystem path.
pub fn find_plugin_description(
    catalog: &dyn PluginCatalog,
    id: &str,
) -> Option<PluginDescription> {
    let converted = convert_legacy_id(id);
    for desc in catalog.get_types() {
        let desc_id = create_plugin_id(&desc);
        if desc_id == id || Some(&desc_id) == converted.as_ref() {
            return Some(desc);
        }
    }
    catalog.get_type_for_file(id)
}
