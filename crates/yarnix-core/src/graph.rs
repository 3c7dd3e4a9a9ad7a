//! Two-pass reconstruction of the package graph from the registry dump.
//!
//! Pass 1 builds every identity into indexed stores; pass 2 wires the
//! dependency edges by lookup. Edges reference entries that have not
//! been hashed yet during pass 1, so a single pass would need forward
//! references - the split avoids that entirely.
//!
//! The builder replays an external resolution. It never resolves
//! anything itself: an edge either finds its target in the dump or is
//! dropped (with a warning), degrading completeness but nothing else.

use crate::error::{Error, Result};
use crate::ident::{Descriptor, DescriptorHash, Locator, LocatorHash};
use crate::package::{LinkType, Package};
use crate::parse::{clean_locator_string, parse_ident, parse_locator, patch_source_descriptor};
use crate::registry::{RegistryDump, RegistryEntry};
use crate::veil::is_virtual_locator;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Synthetic root-workspace key, injected when the dump has none so the
/// graph always has exactly one top-level entry point.
pub const ROOT_WORKSPACE: &str = "root-workspace-0b6124@workspace:.";

/// Cache-version tag prefixed onto untagged input checksums.
const CHECKSUM_VERSION_TAG: &str = "9";

/// Immutable output of the graph builder. Written once, never mutated;
/// the devirtualized working set is a separate value constructed from
/// it ([`ResolvedWorkingSet::resolve`]).
#[derive(Debug)]
pub struct ProjectSnapshot {
  /// Canonical packages only, keyed by locator hash.
  original_packages: HashMap<LocatorHash, Package>,
  /// Virtual instances replayed from the dump, kept apart until the
  /// working-set phase transition.
  virtual_packages: HashMap<LocatorHash, Package>,
  stored_descriptors: HashMap<DescriptorHash, Descriptor>,
  /// descriptorHash -> locatorHash
  stored_resolutions: HashMap<DescriptorHash, LocatorHash>,
  /// Inverse of `stored_resolutions` for the self-resolution of each
  /// package, maintained incrementally so "which descriptor produced
  /// this package" is a lookup, not a scan.
  resolved_descriptors: HashMap<LocatorHash, DescriptorHash>,
  /// locatorHash -> version-tagged checksum
  stored_checksums: HashMap<LocatorHash, String>,
  /// locatorHash -> on-disk location claimed by the dump
  locations: HashMap<LocatorHash, String>,
  top_level: Locator,
}

impl ProjectSnapshot {
  pub fn original_packages(&self) -> &HashMap<LocatorHash, Package> {
    &self.original_packages
  }

  pub fn virtual_packages(&self) -> &HashMap<LocatorHash, Package> {
    &self.virtual_packages
  }

  pub fn stored_descriptors(&self) -> &HashMap<DescriptorHash, Descriptor> {
    &self.stored_descriptors
  }

  pub fn resolution(&self, descriptor: &DescriptorHash) -> Option<&LocatorHash> {
    self.stored_resolutions.get(descriptor)
  }

  /// Reverse lookup: the self-descriptor that resolves to a package.
  pub fn descriptor_for(&self, locator: &LocatorHash) -> Option<&Descriptor> {
    self
      .resolved_descriptors
      .get(locator)
      .and_then(|hash| self.stored_descriptors.get(hash))
  }

  pub fn checksum(&self, locator: &LocatorHash) -> Option<&str> {
    self.stored_checksums.get(locator).map(String::as_str)
  }

  pub fn location(&self, locator: &LocatorHash) -> Option<&str> {
    self.locations.get(locator).map(String::as_str)
  }

  pub fn top_level(&self) -> &Locator {
    &self.top_level
  }

  /// The package a descriptor resolves to, canonical or virtual.
  pub fn resolve_package(&self, descriptor: &DescriptorHash) -> Option<&Package> {
    let locator = self.stored_resolutions.get(descriptor)?;
    self
      .original_packages
      .get(locator)
      .or_else(|| self.virtual_packages.get(locator))
  }
}

/// The post-devirtualization working set: every canonical package plus
/// every virtual instance. Built from the snapshot in a single
/// wholesale step - the one store replacement the lifecycle allows.
#[derive(Debug)]
pub struct ResolvedWorkingSet {
  packages: HashMap<LocatorHash, Package>,
}

impl ResolvedWorkingSet {
  pub fn resolve(snapshot: &ProjectSnapshot) -> Self {
    let mut packages = snapshot.original_packages.clone();
    packages.extend(
      snapshot
        .virtual_packages
        .iter()
        .map(|(hash, pkg)| (hash.clone(), pkg.clone())),
    );
    Self { packages }
  }

  pub fn packages(&self) -> &HashMap<LocatorHash, Package> {
    &self.packages
  }

  pub fn get(&self, locator: &LocatorHash) -> Option<&Package> {
    self.packages.get(locator)
  }
}

/// Tag a checksum with the cache version unless the producer already
/// did. A tag is a `<version>/` or `<algo>-` prefix.
fn tag_checksum(checksum: &str) -> String {
  if checksum.contains('/') || checksum.contains('-') {
    checksum.to_string()
  } else {
    format!("{CHECKSUM_VERSION_TAG}/{checksum}")
  }
}

/// Strip the version tag back off, for use as a content hash.
pub fn strip_checksum_tag(checksum: &str) -> &str {
  if let Some((_, hash)) = checksum.split_once('/') {
    return hash;
  }
  if let Some((_, hash)) = checksum.split_once('-') {
    return hash;
  }
  checksum
}

struct IndexedEntry {
  locator: Locator,
  self_descriptor: Descriptor,
}

pub struct GraphBuilder<'a> {
  dump: &'a RegistryDump,
  top_level_string: String,
}

impl<'a> GraphBuilder<'a> {
  pub fn new(dump: &'a RegistryDump, top_level_locator_string: &str) -> Self {
    Self {
      dump,
      top_level_string: top_level_locator_string.to_string(),
    }
  }

  pub fn build(self) -> Result<ProjectSnapshot> {
    let top_level = parse_locator(&clean_locator_string(&self.top_level_string)?)?;

    // The dump is borrowed; the synthetic root (if needed) lives here.
    let synthetic_root = self.synthetic_root_entry();
    let entries = synthetic_root
      .iter()
      .map(|entry| (ROOT_WORKSPACE, Some(entry)))
      .chain(
        self
          .dump
          .iter()
          .map(|(key, entry)| (key.as_str(), entry.as_ref())),
      );

    let mut snapshot = ProjectSnapshot {
      original_packages: HashMap::new(),
      virtual_packages: HashMap::new(),
      stored_descriptors: HashMap::new(),
      stored_resolutions: HashMap::new(),
      resolved_descriptors: HashMap::new(),
      stored_checksums: HashMap::new(),
      locations: HashMap::new(),
      top_level,
    };

    // Raw and cleaned locator strings both index the same entry: edge
    // targets in the dump use raw keys, everything downstream uses
    // cleaned identities.
    let mut index: HashMap<String, IndexedEntry> = HashMap::new();

    // Pass 1: identities and per-package state.
    for (key, entry) in entries.clone() {
      let Some(entry) = entry else {
        debug!(locator = key, "skipping tombstone entry");
        continue;
      };
      self.build_package(key, entry, &mut snapshot, &mut index)?;
    }

    // Pass 2: dependency edges, by index lookup.
    for (key, entry) in entries {
      let Some(entry) = entry else { continue };
      self.wire_edges(key, entry, &mut snapshot, &index)?;
    }

    Ok(snapshot)
  }

  /// A root workspace with a single edge onto the real top-level
  /// package, unless the dump already has one. A root workspace is any
  /// entry whose reference is `workspace:.` - the project directory
  /// itself, as opposed to a member in a subdirectory.
  fn synthetic_root_entry(&self) -> Option<RegistryEntry> {
    let has_root_workspace = self
      .dump
      .iter()
      .any(|(key, entry)| entry.is_some() && key.ends_with("@workspace:."));
    if has_root_workspace {
      return None;
    }
    let top_level_ident = match parse_locator(&self.top_level_string) {
      Ok(locator) => locator.ident().stringify(),
      // Pass 1 reports the parse failure with proper context.
      Err(_) => return None,
    };
    let mut entry = RegistryEntry {
      language_name: Some("unknown".to_string()),
      link_type: Some("soft".to_string()),
      ..RegistryEntry::default()
    };
    entry
      .package_dependencies
      .insert(top_level_ident, self.top_level_string.clone());
    Some(entry)
  }

  fn build_package(
    &self,
    key: &str,
    entry: &RegistryEntry,
    snapshot: &mut ProjectSnapshot,
    index: &mut HashMap<String, IndexedEntry>,
  ) -> Result<()> {
    let cleaned = clean_locator_string(key).map_err(|err| Error::MalformedRegistry {
      locator: key.to_string(),
      reason: err.to_string(),
    })?;
    let locator = parse_locator(&cleaned)?;

    let link_type = match entry.link_type.as_deref() {
      None => LinkType::Hard,
      Some(raw) => LinkType::try_from(raw).map_err(|()| Error::MalformedRegistry {
        locator: key.to_string(),
        reason: format!("invalid linkType {raw:?}"),
      })?,
    };
    let language_name = entry
      .language_name
      .clone()
      .unwrap_or_else(|| "unknown".to_string());

    let mut package = Package::new(locator.clone(), language_name, link_type)
      .with_version(entry.version.clone())
      .with_conditions(entry.conditions.clone());
    package.bin = entry.bin.clone();
    package.unplugged = entry.dependencies_meta.unplugged.unwrap_or(false);

    // The top-level package provides peer contexts, it never consumes
    // them - its own peer map stays empty.
    let is_top_level = cleaned == snapshot.top_level.stringify() || key == ROOT_WORKSPACE;
    if !is_top_level {
      for (name, range) in &entry.package_peers {
        let descriptor = Descriptor::new(parse_ident(name)?, range.clone());
        package
          .peer_dependencies
          .insert(descriptor.ident().hash(), descriptor);
      }
    }

    let locator_hash = locator.hash();
    let self_descriptor = locator.as_descriptor();
    let descriptor_hash = self_descriptor.hash();

    snapshot
      .stored_descriptors
      .insert(descriptor_hash.clone(), self_descriptor.clone());
    snapshot
      .stored_resolutions
      .insert(descriptor_hash.clone(), locator_hash.clone());
    snapshot
      .resolved_descriptors
      .insert(locator_hash.clone(), descriptor_hash);

    if let Some(checksum) = &entry.checksum {
      snapshot
        .stored_checksums
        .insert(locator_hash.clone(), tag_checksum(checksum));
    }
    if let Some(location) = entry.location(&locator.ident().stringify()) {
      snapshot.locations.insert(locator_hash.clone(), location);
    }

    if is_virtual_locator(&locator) {
      snapshot.virtual_packages.insert(locator_hash.clone(), package);
    } else {
      snapshot.original_packages.insert(locator_hash.clone(), package);
    }

    let indexed = IndexedEntry {
      locator,
      self_descriptor,
    };
    if cleaned != key {
      index.insert(cleaned, IndexedEntry {
        locator: indexed.locator.clone(),
        self_descriptor: indexed.self_descriptor.clone(),
      });
    }
    index.insert(key.to_string(), indexed);
    Ok(())
  }

  fn wire_edges(
    &self,
    key: &str,
    entry: &RegistryEntry,
    snapshot: &mut ProjectSnapshot,
    index: &HashMap<String, IndexedEntry>,
  ) -> Result<()> {
    let owner_hash = index
      .get(key)
      .map(|indexed| indexed.locator.hash())
      .expect("pass 1 indexed every surviving entry");

    let edge_sets = [
      (&entry.package_dependencies, false),
      (&entry.package_dev_dependencies, true),
    ];

    for (edges, is_dev) in edge_sets {
      for (dependency_name, target_string) in edges {
        let Some(target) = index.get(target_string.as_str()) else {
          // Recovered by omission: the manifest simply lacks the edge.
          warn!(
            owner = key,
            dependency = dependency_name.as_str(),
            target = target_string.as_str(),
            "dropping dependency edge: target absent from registry dump"
          );
          continue;
        };

        let mut descriptor = Descriptor::new(
          parse_ident(dependency_name)?,
          target.self_descriptor.range().to_string(),
        );

        // Traverse through patches transparently: the edge presents the
        // underlying source descriptor, resolved to the patched package.
        if let Some(source) = patch_source_descriptor(descriptor.range()) {
          descriptor = source?;
        }

        let target_locator_hash = target.locator.hash();
        snapshot
          .stored_resolutions
          .insert(descriptor.hash(), target_locator_hash.clone());
        snapshot
          .stored_descriptors
          .insert(descriptor.hash(), descriptor.clone());

        let owner = snapshot
          .original_packages
          .get_mut(&owner_hash)
          .or_else(|| snapshot.virtual_packages.get_mut(&owner_hash))
          .expect("pass 1 built every surviving entry");
        let ident_hash = descriptor.ident().hash();
        if is_dev {
          owner.dev_dependencies.insert(ident_hash, descriptor);
        } else {
          owner.dependencies.insert(ident_hash, descriptor);
        }
      }
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::registry::parse_dump;
  use pretty_assertions::assert_eq;

  fn build(json: &str, top_level: &str) -> ProjectSnapshot {
    let dump = parse_dump(json).unwrap();
    GraphBuilder::new(&dump, top_level).build().unwrap()
  }

  const TWO_PACKAGE_DUMP: &str = r#"{
    "root@workspace:.": {
      "languageName": "unknown",
      "linkType": "soft",
      "packageDependencies": {"left-pad": "left-pad@npm:1.0.0"},
      "packageLocation": "/src/app"
    },
    "left-pad@npm:1.0.0": {
      "languageName": "node",
      "linkType": "hard",
      "version": "1.0.0",
      "checksum": "deadbeef"
    }
  }"#;

  #[test]
  fn builds_packages_and_self_resolutions() {
    let snapshot = build(TWO_PACKAGE_DUMP, "root@workspace:.");

    // the dump already has a root workspace, so nothing gets injected
    assert_eq!(snapshot.original_packages().len(), 2);

    let left_pad = parse_locator("left-pad@npm:1.0.0").unwrap();
    let pkg = &snapshot.original_packages()[&left_pad.hash()];
    assert_eq!(pkg.version.as_deref(), Some("1.0.0"));

    // self-resolution is in place, and the inverse index agrees
    let self_descriptor = left_pad.as_descriptor();
    assert_eq!(
      snapshot.resolution(&self_descriptor.hash()),
      Some(&left_pad.hash())
    );
    assert_eq!(
      snapshot.descriptor_for(&left_pad.hash()).unwrap().hash(),
      self_descriptor.hash()
    );
  }

  #[test]
  fn wires_edges_through_the_index() {
    let snapshot = build(TWO_PACKAGE_DUMP, "root@workspace:.");
    let root = parse_locator("root@workspace:.").unwrap();
    let pkg = &snapshot.original_packages()[&root.hash()];
    assert_eq!(pkg.dependencies.len(), 1);
    let edge = pkg.dependencies.values().next().unwrap();
    assert_eq!(edge.stringify(), "left-pad@npm:1.0.0");
  }

  #[test]
  fn injects_synthetic_root_when_no_root_workspace_exists() {
    // top level is a workspace member, not the project root
    let snapshot = build(
      r#"{
        "app@workspace:packages/app": {
          "languageName": "unknown",
          "linkType": "soft",
          "packageLocation": "/src/packages/app"
        }
      }"#,
      "app@workspace:packages/app",
    );

    let synthetic = parse_locator(ROOT_WORKSPACE).unwrap();
    let pkg = &snapshot.original_packages()[&synthetic.hash()];
    assert_eq!(pkg.link_type, LinkType::Soft);
    assert_eq!(pkg.dependencies.len(), 1);
    assert_eq!(
      pkg.dependencies.values().next().unwrap().stringify(),
      "app@workspace:packages/app"
    );
  }

  #[test]
  fn existing_root_workspace_suppresses_injection() {
    let snapshot = build(TWO_PACKAGE_DUMP, "root@workspace:.");
    let synthetic = parse_locator(ROOT_WORKSPACE).unwrap();
    assert!(!snapshot.original_packages().contains_key(&synthetic.hash()));
  }

  #[test]
  fn tombstones_are_skipped() {
    let snapshot = build(
      r#"{
        "root@workspace:.": {"linkType": "soft"},
        "ghost@npm:1.0.0": null
      }"#,
      "root@workspace:.",
    );
    let ghost = parse_locator("ghost@npm:1.0.0").unwrap();
    assert!(!snapshot.original_packages().contains_key(&ghost.hash()));
  }

  #[test]
  fn unresolved_edges_are_dropped_not_fatal() {
    let snapshot = build(
      r#"{
        "root@workspace:.": {
          "linkType": "soft",
          "packageDependencies": {"gone": "gone@npm:9.9.9"}
        }
      }"#,
      "root@workspace:.",
    );
    let root = parse_locator("root@workspace:.").unwrap();
    assert!(snapshot.original_packages()[&root.hash()].dependencies.is_empty());
  }

  #[test]
  fn patch_edges_substitute_the_source_descriptor() {
    let snapshot = build(
      r#"{
        "root@workspace:.": {
          "linkType": "soft",
          "packageDependencies": {
            "lodash": "lodash@patch:lodash@npm%3A4.17.21#./fix.patch::version=4.17.21"
          }
        },
        "lodash@patch:lodash@npm%3A4.17.21#./fix.patch::version=4.17.21": {
          "languageName": "node",
          "linkType": "hard",
          "version": "4.17.21"
        }
      }"#,
      "root@workspace:.",
    );

    let root = parse_locator("root@workspace:.").unwrap();
    let edge = snapshot.original_packages()[&root.hash()]
      .dependencies
      .values()
      .next()
      .cloned()
      .unwrap();
    // the edge traverses through the patch to the underlying source...
    assert_eq!(edge.stringify(), "lodash@npm:4.17.21");
    // ...but resolves to the patched package (cleaned of its params)
    let patched = parse_locator("lodash@patch:lodash@npm%3A4.17.21#./fix.patch").unwrap();
    assert_eq!(snapshot.resolution(&edge.hash()), Some(&patched.hash()));
  }

  #[test]
  fn checksums_are_version_tagged_once() {
    assert_eq!(tag_checksum("deadbeef"), "9/deadbeef");
    assert_eq!(tag_checksum("10c0/deadbeef"), "10c0/deadbeef");
    assert_eq!(tag_checksum("sha1-XYZ"), "sha1-XYZ");

    assert_eq!(strip_checksum_tag("9/deadbeef"), "deadbeef");
    assert_eq!(strip_checksum_tag("sha1-XYZ"), "XYZ");
    assert_eq!(strip_checksum_tag("deadbeef"), "deadbeef");
  }

  #[test]
  fn virtual_entries_join_the_working_set_not_the_snapshot() {
    let snapshot = build(
      r#"{
        "root@workspace:.": {
          "linkType": "soft",
          "packageDependencies": {
            "react-dom": "react-dom@virtual:ctx1234#npm:18.2.0"
          }
        },
        "react-dom@virtual:ctx1234#npm:18.2.0": {
          "languageName": "node",
          "linkType": "hard",
          "version": "18.2.0"
        },
        "react-dom@npm:18.2.0": {
          "languageName": "node",
          "linkType": "hard",
          "version": "18.2.0"
        }
      }"#,
      "root@workspace:.",
    );

    let virtual_locator = parse_locator("react-dom@virtual:ctx1234#npm:18.2.0").unwrap();
    let canonical = parse_locator("react-dom@npm:18.2.0").unwrap();

    assert!(!snapshot.original_packages().contains_key(&virtual_locator.hash()));
    assert!(snapshot.virtual_packages().contains_key(&virtual_locator.hash()));

    let working_set = ResolvedWorkingSet::resolve(&snapshot);
    assert!(working_set.get(&virtual_locator.hash()).is_some());
    assert!(working_set.get(&canonical.hash()).is_some());
    assert_eq!(
      working_set.packages().len(),
      snapshot.original_packages().len() + 1
    );
  }

  #[test]
  fn malformed_locator_key_is_fatal() {
    let dump = parse_dump(r#"{"not a locator": {"linkType": "hard"}}"#).unwrap();
    let err = GraphBuilder::new(&dump, "root@workspace:.").build().unwrap_err();
    assert!(matches!(err, Error::MalformedRegistry { .. }));
  }
}
