//! The registry the module loader needs: (name, reference) ->
//! {on-disk location, dependency edges}.
//!
//! Virtual instances are included deliberately - peer-correct
//! resolution requires each peer context to be independently
//! addressable, even though every virtual instance of a canonical
//! package shares its files. The structure serializes to the loader's
//! nested-pair JSON and is handed off unformatted; generating the
//! loader file itself is someone else's job.

use crate::error::{Error, Result};
use crate::graph::{ProjectSnapshot, ResolvedWorkingSet};
use crate::package::Package;
use crate::veil::{devirtualize_locator, is_virtual_locator, peer_idents};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::warn;

/// A resolved dependency edge as the loader sees it: `null` for a peer
/// request nothing provided, `[name, reference]` otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum PnpResolution {
  Unresolved,
  Resolved(String, String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PnpPackageData {
  /// Relative to the output directory, always with a trailing slash.
  pub package_location: String,
  /// Requested name -> target, sorted by name.
  pub package_dependencies: BTreeMap<String, PnpResolution>,
  /// Idents whose resolution depends on the instantiating parent.
  pub package_peers: Vec<String>,
  pub link_type: &'static str,
  pub discard_from_lookup: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyTreeRoot {
  pub name: String,
  pub reference: String,
}

/// The loader registry. `package_registry_data` is the nested-pair
/// shape the loader consumes: `[ident | null, [[reference | null,
/// data]]]`, with the single `null`/`null` entry being the top level.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PnpData {
  pub dependency_tree_roots: Vec<DependencyTreeRoot>,
  pub package_registry_data: Vec<(Option<String>, Vec<(Option<String>, PnpPackageData)>)>,
}

/// Build the loader registry.
///
/// Fails with [`Error::TopLevelNotFound`] when no entry's on-disk
/// location matches `top_level_directory` - no output is meaningful
/// without a root.
pub fn generate_loader_data(
  snapshot: &ProjectSnapshot,
  working_set: &ResolvedWorkingSet,
  out_directory: &str,
  top_level_directory: &str,
) -> Result<PnpData> {
  let mut registry: BTreeMap<Option<String>, BTreeMap<Option<String>, PnpPackageData>> =
    BTreeMap::new();
  let mut dependency_tree_roots = Vec::new();
  let mut top_level: Option<PnpPackageData> = None;

  // Deterministic walk: sort by stringified locator.
  let mut packages: Vec<&Package> = working_set.packages().values().collect();
  packages.sort_by_key(|pkg| pkg.locator.stringify());

  for package in packages {
    let locator = &package.locator;
    let is_virtual = is_virtual_locator(locator);
    let canonical = if is_virtual {
      devirtualize_locator(locator)
    } else {
      locator.clone()
    };

    // Virtual instances share the canonical package's files.
    let Some(location) = snapshot.location(&canonical.hash()) else {
      continue;
    };

    let package_location = if is_virtual {
      virtual_location(package, &relative_location(out_directory, location))
    } else {
      let relative = relative_location(out_directory, location);
      format!("{relative}/")
    };

    let data = PnpPackageData {
      package_location: package_location.clone(),
      package_dependencies: dependency_edges(snapshot, working_set, package),
      package_peers: peer_idents(package).into_iter().collect(),
      link_type: package.link_type.as_manifest_str(),
      discard_from_lookup: false,
    };

    if locator.reference().starts_with("workspace:") {
      dependency_tree_roots.push(DependencyTreeRoot {
        name: locator.ident().stringify(),
        reference: locator.reference().to_string(),
      });
    }

    if location.starts_with(top_level_directory) && !is_virtual {
      top_level = Some(data.clone());
    }

    registry
      .entry(Some(locator.ident().stringify()))
      .or_default()
      .insert(Some(locator.reference().to_string()), data);
  }

  // Exactly one sentinel entry names the top level.
  let top_level =
    top_level.ok_or_else(|| Error::TopLevelNotFound(top_level_directory.to_string()))?;
  registry
    .entry(None)
    .or_default()
    .insert(None, top_level);

  Ok(PnpData {
    dependency_tree_roots,
    package_registry_data: registry
      .into_iter()
      .map(|(ident, references)| (ident, references.into_iter().collect()))
      .collect(),
  })
}

/// Peer requests first (null until a parent provides them), then the
/// wired edges. An edge whose target fell out of the working set was
/// already dropped with a warning during graph construction.
fn dependency_edges(
  snapshot: &ProjectSnapshot,
  working_set: &ResolvedWorkingSet,
  package: &Package,
) -> BTreeMap<String, PnpResolution> {
  let mut edges: BTreeMap<String, PnpResolution> = BTreeMap::new();

  for descriptor in package.peer_dependencies.values() {
    edges.insert(descriptor.ident().stringify(), PnpResolution::Unresolved);
  }

  let wired = package
    .dependencies
    .values()
    .chain(package.dev_dependencies.values());
  for descriptor in wired {
    let resolved = snapshot
      .resolution(&descriptor.hash())
      .and_then(|locator| working_set.get(locator));
    match resolved {
      Some(target) => {
        edges.insert(
          descriptor.ident().stringify(),
          PnpResolution::Resolved(
            target.locator.ident().stringify(),
            target.locator.reference().to_string(),
          ),
        );
      }
      None => {
        warn!(
          owner = package.locator.stringify(),
          dependency = descriptor.stringify(),
          "edge target missing from working set; leaving it out of the loader registry"
        );
      }
    }
  }

  edges
}

/// Namespaced location for a virtual instance, so colliding canonical
/// locations don't merge in the loader's eyes.
fn virtual_location(package: &Package, relative: &str) -> String {
  let slug = package.slug();
  let stripped = relative.strip_prefix("./").unwrap_or(relative);
  format!("./.yarn/__virtual__/{slug}/0/{stripped}/")
}

/// Pure relative-path computation over `/`-separated absolute strings.
/// Result carries a `./` prefix unless it escapes upward.
fn relative_location(base: &str, target: &str) -> String {
  let base_parts: Vec<&str> = base.split('/').filter(|part| !part.is_empty()).collect();
  let target_parts: Vec<&str> = target.split('/').filter(|part| !part.is_empty()).collect();

  let common = base_parts
    .iter()
    .zip(target_parts.iter())
    .take_while(|(a, b)| a == b)
    .count();

  let ups = base_parts.len() - common;
  let mut parts: Vec<String> = std::iter::repeat_n("..".to_string(), ups).collect();
  parts.extend(target_parts[common..].iter().map(ToString::to_string));

  if parts.is_empty() {
    return ".".to_string();
  }
  let joined = parts.join("/");
  if joined.starts_with("..") {
    joined
  } else {
    format!("./{joined}")
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::graph::GraphBuilder;
  use crate::registry::parse_dump;
  use pretty_assertions::assert_eq;

  fn fixture() -> (ProjectSnapshot, ResolvedWorkingSet) {
    let dump = parse_dump(
      r#"{
        "root@workspace:.": {
          "languageName": "unknown",
          "linkType": "soft",
          "packageLocation": "/src/app",
          "packageDependencies": {
            "react-dom": "react-dom@virtual:ctx1234#npm:18.2.0"
          }
        },
        "react-dom@virtual:ctx1234#npm:18.2.0": {
          "languageName": "node",
          "linkType": "hard",
          "version": "18.2.0",
          "packagePeers": {"react": "npm:^18.0.0"},
          "packageDependencies": {"scheduler": "scheduler@npm:0.23.0"}
        },
        "react-dom@npm:18.2.0": {
          "languageName": "node",
          "linkType": "hard",
          "version": "18.2.0",
          "packageOut": "/nix/store/aaa-react-dom",
          "packagePeers": {"react": "npm:^18.0.0"}
        },
        "scheduler@npm:0.23.0": {
          "languageName": "node",
          "linkType": "hard",
          "version": "0.23.0",
          "packageOut": "/nix/store/bbb-scheduler"
        }
      }"#,
    )
    .unwrap();
    let snapshot = GraphBuilder::new(&dump, "root@workspace:.").build().unwrap();
    let working_set = ResolvedWorkingSet::resolve(&snapshot);
    (snapshot, working_set)
  }

  fn lookup<'a>(
    data: &'a PnpData,
    ident: Option<&str>,
    reference: Option<&str>,
  ) -> Option<&'a PnpPackageData> {
    let ident = ident.map(ToString::to_string);
    let reference = reference.map(ToString::to_string);
    data
      .package_registry_data
      .iter()
      .find(|(name, _)| *name == ident)
      .and_then(|(_, refs)| refs.iter().find(|(r, _)| *r == reference))
      .map(|(_, pkg)| pkg)
  }

  #[test]
  fn top_level_sentinel_matches_the_supplied_directory() {
    let (snapshot, working_set) = fixture();
    let data = generate_loader_data(&snapshot, &working_set, "/src/app", "/src/app").unwrap();
    let sentinel = lookup(&data, None, None).unwrap();
    let root = lookup(&data, Some("root"), Some("workspace:.")).unwrap();
    assert_eq!(sentinel, root);
    assert_eq!(root.package_location, ".".to_string() + "/");
  }

  #[test]
  fn missing_top_level_is_fatal() {
    let (snapshot, working_set) = fixture();
    let err =
      generate_loader_data(&snapshot, &working_set, "/src/app", "/nowhere").unwrap_err();
    assert!(matches!(err, Error::TopLevelNotFound(_)));
  }

  #[test]
  fn virtual_instances_are_independently_addressable() {
    let (snapshot, working_set) = fixture();
    let data = generate_loader_data(&snapshot, &working_set, "/src/app", "/src/app").unwrap();

    let virtual_entry =
      lookup(&data, Some("react-dom"), Some("virtual:ctx1234#npm:18.2.0")).unwrap();
    let canonical_entry = lookup(&data, Some("react-dom"), Some("npm:18.2.0")).unwrap();

    // same files, different addresses
    assert!(virtual_entry.package_location.starts_with("./.yarn/__virtual__/"));
    assert!(virtual_entry.package_location.contains("react-dom-18.2.0-"));
    assert_ne!(virtual_entry.package_location, canonical_entry.package_location);

    // the virtual instance carries its own wired edges
    assert_eq!(
      virtual_entry.package_dependencies.get("scheduler"),
      Some(&PnpResolution::Resolved(
        "scheduler".to_string(),
        "npm:0.23.0".to_string()
      ))
    );
  }

  #[test]
  fn unprovided_peers_render_null() {
    let (snapshot, working_set) = fixture();
    let data = generate_loader_data(&snapshot, &working_set, "/src/app", "/src/app").unwrap();
    let entry = lookup(&data, Some("react-dom"), Some("npm:18.2.0")).unwrap();
    assert_eq!(
      entry.package_dependencies.get("react"),
      Some(&PnpResolution::Unresolved)
    );
    assert_eq!(entry.package_peers, vec!["react".to_string()]);
    assert_eq!(
      serde_json::to_value(&entry.package_dependencies).unwrap()["react"],
      serde_json::Value::Null
    );
  }

  #[test]
  fn workspace_packages_are_dependency_tree_roots() {
    let (snapshot, working_set) = fixture();
    let data = generate_loader_data(&snapshot, &working_set, "/src/app", "/src/app").unwrap();
    assert!(
      data
        .dependency_tree_roots
        .iter()
        .any(|root| root.name == "root" && root.reference == "workspace:.")
    );
  }

  #[test]
  fn relative_location_handles_all_directions() {
    assert_eq!(relative_location("/src/app", "/src/app"), ".");
    assert_eq!(relative_location("/src/app", "/src/app/packages/a"), "./packages/a");
    assert_eq!(relative_location("/src/app", "/nix/store/xyz"), "../../nix/store/xyz");
  }
}
