//! The build manifest: one deterministically ordered nix attrset,
//! `packages."name@reference" = { ... };` per package, with dependency
//! and peer edges rendered as references to other entries - a single
//! acyclic reference graph mirroring the package graph, never inline
//! duplicates.
//!
//! Virtual packages emit only a pointer at their canonical entry; the
//! recipe lives in one place.

use crate::graph::{ProjectSnapshot, ResolvedWorkingSet};
use crate::materialize::{Materialization, install_condition};
use crate::outputs::OutputHashes;
use crate::package::Package;
use crate::veil::{devirtualize_locator, is_virtual_locator};
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

/// Classifier + hash-engine results for one package, keyed by manifest
/// package-id on the way in.
#[derive(Debug, Clone)]
pub struct PackageOutputs {
  pub materialization: Materialization,
  pub hashes: OutputHashes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestEntry {
  /// A peer-context instance: everything about it lives on its
  /// canonical entry.
  Virtual { canonical_package: String },
  Canonical(Box<CanonicalEntry>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalEntry {
  pub name: String,
  pub reference: String,
  pub locator_hash: String,
  pub link_type: &'static str,
  pub output_name: String,
  pub output_hash: Option<String>,
  pub output_hash_by_platform: BTreeMap<String, String>,
  pub src: Option<String>,
  pub should_be_unplugged: bool,
  /// A nix lambda, rendered raw.
  pub install_condition: Option<String>,
  pub bin: BTreeMap<String, String>,

  // lockfile-reconstruction scalars
  pub flat_name: String,
  pub scope: Option<String>,
  pub language_name: String,
  pub descriptor_hash: String,
  pub descriptor_range: String,
  pub descriptor_ident_hash: String,
  pub checksum: Option<String>,

  /// requested name -> manifest package-id
  pub dependencies: BTreeMap<String, String>,
  pub dev_dependencies: BTreeMap<String, String>,
  /// requested name -> manifest package-id, or none while unprovided
  pub package_peers: BTreeMap<String, Option<String>>,
}

/// Assemble the manifest for every package in the working set.
/// `outputs` must cover every canonical package id.
pub fn build_manifest(
  snapshot: &ProjectSnapshot,
  working_set: &ResolvedWorkingSet,
  outputs: &HashMap<String, PackageOutputs>,
) -> BTreeMap<String, ManifestEntry> {
  let mut entries = BTreeMap::new();

  for package in working_set.packages().values() {
    let package_id = package.locator.stringify();

    if is_virtual_locator(&package.locator) {
      entries.insert(
        package_id,
        ManifestEntry::Virtual {
          canonical_package: devirtualize_locator(&package.locator).stringify(),
        },
      );
      continue;
    }

    let Some(package_outputs) = outputs.get(&package_id) else {
      warn!(package = package_id, "no classifier output for package; skipping entry");
      continue;
    };
    entries.insert(
      package_id,
      ManifestEntry::Canonical(Box::new(canonical_entry(
        snapshot,
        working_set,
        package,
        package_outputs,
      ))),
    );
  }

  entries
}

fn canonical_entry(
  snapshot: &ProjectSnapshot,
  working_set: &ResolvedWorkingSet,
  package: &Package,
  outputs: &PackageOutputs,
) -> CanonicalEntry {
  let locator = &package.locator;
  let is_zip = outputs.materialization == Materialization::Zip;
  let src = match &outputs.materialization {
    Materialization::Source { path } => Some(path.clone()),
    _ => None,
  };

  // The self-descriptor comes off the inverse resolution index.
  let descriptor = snapshot.descriptor_for(&locator.hash());
  let (descriptor_hash, descriptor_range, descriptor_ident_hash) = match descriptor {
    Some(descriptor) => (
      descriptor.hash().as_str().to_string(),
      descriptor.range().to_string(),
      descriptor.ident().hash().as_str().to_string(),
    ),
    None => (String::new(), String::new(), String::new()),
  };

  CanonicalEntry {
    name: locator.ident().stringify(),
    reference: locator.reference().to_string(),
    locator_hash: locator.hash().as_str().to_string(),
    link_type: package.link_type.as_manifest_str(),
    output_name: format!("{}{}", package.slug(), if is_zip { ".zip" } else { "" }),
    output_hash: outputs.hashes.output_hash.clone(),
    output_hash_by_platform: outputs.hashes.output_hash_by_platform.clone(),
    src,
    should_be_unplugged: outputs.materialization.is_unplugged(),
    install_condition: install_condition(package.conditions.as_deref()),
    bin: package.bin.clone(),
    flat_name: locator.ident().name().to_string(),
    scope: locator.ident().scope().map(ToString::to_string),
    language_name: package.language_name.as_ref().to_string(),
    descriptor_hash,
    descriptor_range,
    descriptor_ident_hash,
    checksum: snapshot.checksum(&locator.hash()).map(ToString::to_string),
    dependencies: edge_targets(snapshot, working_set, package, false),
    dev_dependencies: edge_targets(snapshot, working_set, package, true),
    package_peers: peer_targets(snapshot, working_set, package),
  }
}

/// Resolved edges as manifest package-ids. Dropped edges were never
/// wired, so everything here references an existing entry.
fn edge_targets(
  snapshot: &ProjectSnapshot,
  working_set: &ResolvedWorkingSet,
  package: &Package,
  dev: bool,
) -> BTreeMap<String, String> {
  let edges = if dev {
    &package.dev_dependencies
  } else {
    &package.dependencies
  };
  edges
    .values()
    .filter_map(|descriptor| {
      let target = snapshot
        .resolution(&descriptor.hash())
        .and_then(|locator| working_set.get(locator))?;
      Some((
        descriptor.ident().stringify(),
        target.locator.stringify(),
      ))
    })
    .collect()
}

fn peer_targets(
  snapshot: &ProjectSnapshot,
  working_set: &ResolvedWorkingSet,
  package: &Package,
) -> BTreeMap<String, Option<String>> {
  package
    .peer_dependencies
    .values()
    .map(|descriptor| {
      let target = snapshot
        .resolution(&descriptor.hash())
        .and_then(|locator| working_set.get(locator))
        .map(|pkg| pkg.locator.stringify());
      (descriptor.ident().stringify(), target)
    })
    .collect()
}

/// nix string literal, JSON-escaped (the original used JSON.stringify
/// for exactly this).
fn quote(value: &str) -> String {
  serde_json::to_string(value).unwrap_or_else(|_| format!("{value:?}"))
}

/// Render the manifest text. Entries emit in lexicographic key order,
/// so two runs over the same dump produce byte-identical files.
pub fn render_manifest(entries: &BTreeMap<String, ManifestEntry>) -> String {
  let mut out: Vec<String> = Vec::new();

  out.push("# This file is generated by running \"yarn install\" inside your project.".to_string());
  out.push("# It is essentially a version of yarn.lock that Nix can better understand".to_string());
  out.push("# Manual changes WILL be lost - proceed with caution!".to_string());
  out.push("let".to_string());
  out.push("  packages = {".to_string());

  for (key, entry) in entries {
    out.push(format!("    {} = {{", quote(key)));
    match entry {
      ManifestEntry::Virtual { canonical_package } => {
        out.push(format!(
          "      canonicalPackage = packages.{};",
          quote(canonical_package)
        ));
      }
      ManifestEntry::Canonical(entry) => render_canonical(&mut out, entry),
    }
    out.push("    };".to_string());
  }

  out.push("  };".to_string());
  out.push("in".to_string());
  out.push("packages".to_string());
  out.push(String::new());
  out.join("\n")
}

fn render_canonical(out: &mut Vec<String>, entry: &CanonicalEntry) {
  out.push(format!("      name = {};", quote(&entry.name)));
  out.push(format!("      reference = {};", quote(&entry.reference)));
  out.push(format!("      locatorHash = {};", quote(&entry.locator_hash)));
  out.push(format!("      linkType = {};", quote(entry.link_type)));
  out.push(format!("      outputName = {};", quote(&entry.output_name)));
  if let Some(output_hash) = &entry.output_hash {
    out.push(format!("      outputHash = {};", quote(output_hash)));
  }
  if !entry.output_hash_by_platform.is_empty() {
    out.push("      outputHashByPlatform = {".to_string());
    for (platform, hash) in &entry.output_hash_by_platform {
      out.push(format!("        {} = {};", quote(platform), quote(hash)));
    }
    out.push("      };".to_string());
  }
  if let Some(src) = &entry.src {
    // a nix path, deliberately unquoted
    out.push(format!("      src = {src};"));
  }
  if entry.should_be_unplugged {
    out.push("      shouldBeUnplugged = true;".to_string());
  }
  if let Some(condition) = &entry.install_condition {
    out.push(format!("      installCondition = {condition};"));
  }

  out.push(format!("      flatName = {};", quote(&entry.flat_name)));
  out.push(format!("      descriptorHash = {};", quote(&entry.descriptor_hash)));
  out.push(format!("      languageName = {};", quote(&entry.language_name)));
  out.push(format!(
    "      scope = {};",
    entry.scope.as_deref().map_or_else(|| "null".to_string(), quote)
  ));
  out.push(format!("      descriptorRange = {};", quote(&entry.descriptor_range)));
  out.push(format!(
    "      descriptorIdentHash = {};",
    quote(&entry.descriptor_ident_hash)
  ));
  if let Some(checksum) = &entry.checksum {
    out.push(format!("      checksum = {};", quote(checksum)));
  }

  if !entry.bin.is_empty() {
    out.push("      bin = {".to_string());
    for (name, path) in &entry.bin {
      out.push(format!("        {} = {};", quote(name), quote(path)));
    }
    out.push("      };".to_string());
  }

  render_edges(out, "dependencies", &entry.dependencies);
  render_edges(out, "devDependencies", &entry.dev_dependencies);

  if !entry.package_peers.is_empty() {
    out.push("      packagePeers = {".to_string());
    for (name, target) in &entry.package_peers {
      match target {
        Some(package_id) => out.push(format!(
          "        {} = packages.{};",
          quote(name),
          quote(package_id)
        )),
        None => out.push(format!("        {} = null;", quote(name))),
      }
    }
    out.push("      };".to_string());
  }
}

fn render_edges(out: &mut Vec<String>, block: &str, edges: &BTreeMap<String, String>) {
  if edges.is_empty() {
    return;
  }
  out.push(format!("      {block} = {{"));
  for (name, package_id) in edges {
    out.push(format!("        {} = packages.{};", quote(name), quote(package_id)));
  }
  out.push("      };".to_string());
}
