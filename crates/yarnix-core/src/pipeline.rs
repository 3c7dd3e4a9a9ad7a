//! End-to-end orchestration: dump -> snapshot -> working set ->
//! classification -> output hashes -> rendered artifacts.
//!
//! Phases run strictly in sequence; only the hash probing inside the
//! policy engine fans out into cooperative tasks. Nothing here mutates
//! a store - each phase consumes the previous phase's value.

use crate::error::Result;
use crate::graph::{GraphBuilder, ProjectSnapshot, ResolvedWorkingSet};
use crate::loader::{PnpData, generate_loader_data};
use crate::manifest::{ManifestEntry, PackageOutputs, build_manifest, render_manifest};
use crate::materialize::{Materialization, StrategyRegistry, classify};
use crate::outputs::{HashPolicyEngine, PathHasher, PriorManifest, SystemProbe};
use crate::package::Package;
use crate::parse::parse_locator;
use crate::registry::RegistryDump;
use crate::veil::is_virtual_locator;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

pub struct PipelineOptions<'a> {
  /// Current platform key, eg. `x86_64-linux`.
  pub system: &'a str,
  /// Directory under which unplugged packages extract.
  pub unplugged_root: &'a Path,
  pub prior_manifest: Option<&'a PriorManifest>,
}

/// Build the snapshot and devirtualized working set from a dump.
pub fn build_graph(
  dump: &RegistryDump,
  top_level_locator_string: &str,
) -> Result<(ProjectSnapshot, ResolvedWorkingSet)> {
  let snapshot = GraphBuilder::new(dump, top_level_locator_string).build()?;
  let working_set = ResolvedWorkingSet::resolve(&snapshot);
  Ok((snapshot, working_set))
}

/// Classify every canonical package in the working set.
pub fn classify_all<'a>(
  snapshot: &ProjectSnapshot,
  working_set: &'a ResolvedWorkingSet,
) -> Vec<(String, &'a Package, Materialization)> {
  let registry = StrategyRegistry::default();
  let lookup = |locator_string: &str| {
    parse_locator(locator_string)
      .ok()
      .and_then(|locator| snapshot.location(&locator.hash()))
      .map(ToString::to_string)
  };

  working_set
    .packages()
    .values()
    .filter(|package| !is_virtual_locator(&package.locator))
    .map(|package| {
      let materialization = classify(package, &registry, &lookup);
      (package.locator.stringify(), package, materialization)
    })
    .collect()
}

/// Run classification and the hash policy engine, producing the
/// per-package inputs the manifest serializer needs.
pub async fn assign_outputs<C>(
  snapshot: &ProjectSnapshot,
  working_set: &ResolvedWorkingSet,
  options: &PipelineOptions<'_>,
  capabilities: &C,
) -> HashMap<String, PackageOutputs>
where
  C: SystemProbe + PathHasher,
{
  let classified = classify_all(snapshot, working_set);
  let engine = HashPolicyEngine::new(
    options.prior_manifest,
    options.system,
    options.unplugged_root,
    capabilities,
  );

  let work = classified
    .iter()
    .map(|(package_id, package, materialization)| {
      (
        package_id.clone(),
        *package,
        materialization.clone(),
        snapshot.checksum(&package.locator.hash()),
      )
    })
    .collect();
  let hashes = engine.assign_all(work).await;

  classified
    .into_iter()
    .map(|(package_id, _, materialization)| {
      let hashes = hashes.get(&package_id).cloned().unwrap_or_default();
      (
        package_id,
        PackageOutputs {
          materialization,
          hashes,
        },
      )
    })
    .collect()
}

/// The full manifest path: graph is assumed built; returns the entries
/// and their rendered text.
pub async fn synthesize_manifest<C>(
  snapshot: &ProjectSnapshot,
  working_set: &ResolvedWorkingSet,
  options: &PipelineOptions<'_>,
  capabilities: &C,
) -> (BTreeMap<String, ManifestEntry>, String)
where
  C: SystemProbe + PathHasher,
{
  let outputs = assign_outputs(snapshot, working_set, options, capabilities).await;
  let entries = build_manifest(snapshot, working_set, &outputs);
  let rendered = render_manifest(&entries);
  (entries, rendered)
}

/// The loader registry for the same graph.
pub fn synthesize_loader_data(
  snapshot: &ProjectSnapshot,
  working_set: &ResolvedWorkingSet,
  out_directory: &str,
  top_level_directory: &str,
) -> Result<PnpData> {
  generate_loader_data(snapshot, working_set, out_directory, top_level_directory)
}
