//! Serde model of the package-registry dump.
//!
//! The dump is a flat JSON object: locator string -> entry. A `null`
//! entry is a tombstone for a package that was resolved but later
//! removed; the builder skips it. `BTreeMap` keeps iteration order
//! independent of the producer's insertion order, so the same dump
//! always yields the same graph walk.

use serde::Deserialize;
use std::collections::BTreeMap;

/// Locator string -> entry (or tombstone).
pub type RegistryDump = BTreeMap<String, Option<RegistryEntry>>;

/// One resolved package as the upstream resolver serialized it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegistryEntry {
  /// eg. `node`, `unknown`
  pub language_name: Option<String>,

  /// `hard` or `soft`
  pub link_type: Option<String>,

  pub version: Option<String>,

  /// Fetch-stage checksum. May arrive version-tagged (`10c0/<hex>`) or
  /// bare; the builder tags bare ones.
  pub checksum: Option<String>,

  /// Platform constraint string, eg. `os=linux&cpu=x64`
  pub conditions: Option<String>,

  /// Dependency edges: requested name -> target locator string.
  pub package_dependencies: BTreeMap<String, String>,

  /// Dev-only edges, same shape. Kept apart for the manifest's
  /// `devDependencies` block.
  pub package_dev_dependencies: BTreeMap<String, String>,

  /// Peer requests: requested name -> range.
  pub package_peers: BTreeMap<String, String>,

  /// Per-dependency metadata; only `unplugged` matters to us.
  pub dependencies_meta: DependenciesMeta,

  /// Command name -> relative script path.
  pub bin: BTreeMap<String, String>,

  /// Absolute on-disk location, present for workspaces and already
  /// materialized packages.
  pub package_location: Option<String>,

  /// Build output root; the package itself then lives under
  /// `<packageOut>/node_modules/<ident>`.
  pub package_out: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DependenciesMeta {
  pub unplugged: Option<bool>,
}

impl RegistryEntry {
  /// The on-disk location this entry claims, if any.
  pub fn location(&self, ident_string: &str) -> Option<String> {
    if let Some(location) = &self.package_location {
      return Some(location.clone());
    }
    self
      .package_out
      .as_ref()
      .map(|out| format!("{out}/node_modules/{ident_string}"))
  }
}

/// Parse a registry dump from its JSON text.
pub fn parse_dump(json: &str) -> serde_json::Result<RegistryDump> {
  serde_json::from_str(json)
}
