//! Serializes the rebuilt graph as a Yarn-format lockfile.
//!
//! Same grammar the resolver itself writes: a `__metadata` block, then
//! one entry per canonical package keyed by every descriptor string
//! that resolves to it (comma-joined, sorted), entries sorted by key.
//! Virtual identities never appear - the lockfile describes canonical
//! resolutions only.

use crate::graph::ProjectSnapshot;
use crate::ident::LocatorHash;
use crate::veil::{devirtualize_descriptor, is_virtual_locator, is_virtual_reference};
use std::collections::BTreeMap;

const LOCKFILE_VERSION: &str = "8";
const CACHE_KEY: &str = "9";

/// Render the snapshot as lockfile text.
pub fn render_lockfile(snapshot: &ProjectSnapshot) -> String {
  // Group every stored descriptor by the locator it resolves to.
  let mut descriptors_by_locator: BTreeMap<&LocatorHash, Vec<String>> = BTreeMap::new();
  for (descriptor_hash, descriptor) in snapshot.stored_descriptors() {
    if is_virtual_reference(descriptor.range()) {
      continue;
    }
    let Some(locator_hash) = snapshot.resolution(descriptor_hash) else {
      continue;
    };
    descriptors_by_locator
      .entry(locator_hash)
      .or_default()
      .push(descriptor.stringify());
  }

  let mut blocks: BTreeMap<String, String> = BTreeMap::new();

  for (locator_hash, mut descriptors) in descriptors_by_locator {
    let Some(package) = snapshot.original_packages().get(locator_hash) else {
      // resolutions onto virtual instances stay out of the lockfile
      continue;
    };
    if is_virtual_locator(&package.locator) {
      continue;
    }

    descriptors.sort();
    descriptors.dedup();
    let key = descriptors.join(", ");

    let mut lines: Vec<String> = Vec::new();
    lines.push(format!("\"{key}\":"));
    if let Some(version) = &package.version {
      lines.push(format!("  version: {version}"));
    }
    lines.push(format!("  resolution: \"{}\"", package.locator.stringify()));

    // Edges onto virtual instances show their canonical range.
    let dependencies: BTreeMap<String, String> = package
      .dependencies
      .values()
      .map(|descriptor| {
        let canonical = devirtualize_descriptor(descriptor);
        (canonical.ident().stringify(), canonical.range().to_string())
      })
      .collect();
    if !dependencies.is_empty() {
      lines.push("  dependencies:".to_string());
      for (name, range) in dependencies {
        lines.push(format!("    {name}: {range}"));
      }
    }

    let peers: BTreeMap<String, &str> = package
      .peer_dependencies
      .values()
      .map(|descriptor| (descriptor.ident().stringify(), descriptor.range()))
      .collect();
    if !peers.is_empty() {
      lines.push("  peerDependencies:".to_string());
      for (name, range) in peers {
        lines.push(format!("    {name}: {range}"));
      }
    }

    if !package.bin.is_empty() {
      lines.push("  bin:".to_string());
      for (name, path) in &package.bin {
        lines.push(format!("    {name}: {path}"));
      }
    }

    if let Some(checksum) = snapshot.checksum(locator_hash) {
      lines.push(format!("  checksum: {checksum}"));
    }
    if let Some(conditions) = &package.conditions {
      lines.push(format!("  conditions: {conditions}"));
    }
    lines.push(format!("  languageName: {}", package.language_name.as_ref()));
    lines.push(format!("  linkType: {}", package.link_type.as_lockfile_str()));

    blocks.insert(key, lines.join("\n"));
  }

  let mut out = String::new();
  out.push_str("# This file is generated by running \"yarn install\" inside your project.\n");
  out.push_str("# Manual changes might be lost - proceed with caution!\n\n");
  out.push_str("__metadata:\n");
  out.push_str(&format!("  version: {LOCKFILE_VERSION}\n"));
  out.push_str(&format!("  cacheKey: {CACHE_KEY}\n"));
  for block in blocks.values() {
    out.push('\n');
    out.push_str(block);
    out.push('\n');
  }
  out
}
