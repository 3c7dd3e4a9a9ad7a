//! Per-package install-strategy classification and platform conditions.
//!
//! Every package gets exactly one materialization: `source` (already on
//! disk, rebuilt locally, never hashed here), `zip` (single-file
//! archive, identity = fetch checksum), or `unplugged` (extracted
//! directory). The decision drives hashing, so it must be a pure
//! function of its inputs - no filesystem access, no hidden ordering.

use crate::package::{LinkType, Package};
use crate::veil::{devirtualize_locator, is_virtual_locator};

/// How a resolved package reaches disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Materialization {
  /// Contents already on disk: workspace member, portal, or a local
  /// file reference. The build system treats it as a volatile input.
  Source { path: String },
  /// Stays a single-file archive in the cache.
  Zip,
  /// Extracted to a plain directory (native deps, install scripts,
  /// case-sensitivity needs).
  Unplugged,
}

impl Materialization {
  pub fn is_source(&self) -> bool {
    matches!(self, Self::Source { .. })
  }

  pub fn is_unplugged(&self) -> bool {
    matches!(self, Self::Unplugged)
  }
}

/// A registered materialization strategy. Strategies are queried in
/// registration order; the first one claiming the package decides.
pub trait LinkStrategy {
  fn supports_package(&self, package: &Package) -> bool;
  fn should_be_unplugged(&self, package: &Package) -> bool;
}

/// The PnP strategy: claims hard-linked `node` packages, unplugs the
/// user-forced ones and anything with platform conditions (native
/// builds cannot run from inside an archive).
pub struct PnpLinkStrategy;

impl LinkStrategy for PnpLinkStrategy {
  fn supports_package(&self, package: &Package) -> bool {
    package.language_name.as_ref() == "node" && package.link_type == LinkType::Hard
  }

  fn should_be_unplugged(&self, package: &Package) -> bool {
    package.unplugged || package.conditions.is_some()
  }
}

/// Ordered strategy list. Data-driven so tests can register their own.
pub struct StrategyRegistry {
  strategies: Vec<Box<dyn LinkStrategy>>,
}

impl StrategyRegistry {
  pub fn new(strategies: Vec<Box<dyn LinkStrategy>>) -> Self {
    Self { strategies }
  }

  pub fn first_match(&self, package: &Package) -> Option<&dyn LinkStrategy> {
    self
      .strategies
      .iter()
      .map(Box::as_ref)
      .find(|strategy| strategy.supports_package(package))
  }
}

impl Default for StrategyRegistry {
  fn default() -> Self {
    Self::new(vec![Box::new(PnpLinkStrategy)])
  }
}

/// Lookup for local paths of already-materialized parents, injected so
/// classification stays pure. Returns the on-disk path for a locator
/// string, if the dump knows one.
pub trait LocalPathLookup {
  fn local_path(&self, locator_string: &str) -> Option<String>;
}

impl<F> LocalPathLookup for F
where
  F: Fn(&str) -> Option<String>,
{
  fn local_path(&self, locator_string: &str) -> Option<String> {
    self(locator_string)
  }
}

/// Classify a package. Local-path references win outright; otherwise
/// the first claiming strategy decides unplugged-vs-zip.
pub fn classify(
  package: &Package,
  registry: &StrategyRegistry,
  paths: &dyn LocalPathLookup,
) -> Materialization {
  if let Some(path) = source_path(package, paths) {
    return Materialization::Source { path };
  }

  let unplug = registry
    .first_match(package)
    .is_some_and(|strategy| strategy.should_be_unplugged(package));
  if unplug {
    Materialization::Unplugged
  } else {
    Materialization::Zip
  }
}

/// The local source path for workspace/portal/file references, if the
/// reference (or the path lookup) can produce one.
fn source_path(package: &Package, paths: &dyn LocalPathLookup) -> Option<String> {
  let reference = if is_virtual_locator(&package.locator) {
    devirtualize_locator(&package.locator).reference().to_string()
  } else {
    package.locator.reference().to_string()
  };

  if let Some(path) = reference.strip_prefix("workspace:") {
    return Some(format!("./{path}"));
  }
  if let Some(path) = reference.strip_prefix("portal:") {
    return Some(path.to_string());
  }
  if reference.starts_with("file:") {
    // file: references resolve relative to their parent's local path;
    // the dump records the materialized location, so ask the lookup.
    return paths.local_path(&package.locator.stringify());
  }
  None
}

/// Translate a `&`-joined `key=value` condition string into the nix
/// predicate the manifest carries, eg.
/// `os=linux&cpu=x64` -> `stdenv: (stdenv.isLinux) && (stdenv.isx86_64)`.
///
/// Unrecognized values become a `false` clause: exclusion, never an
/// error. A string yielding no clauses yields no condition.
pub fn install_condition(conditions: Option<&str>) -> Option<String> {
  let conditions = conditions?;

  let mut clauses: Vec<&str> = Vec::new();
  for part in conditions.split('&') {
    let Some((key, value)) = part.trim().split_once('=') else {
      continue;
    };
    match key {
      "os" => clauses.push(match value {
        "linux" => "stdenv.isLinux",
        "darwin" => "stdenv.isDarwin",
        _ => "false",
      }),
      "cpu" => clauses.push(match value {
        "ia32" => "stdenv.isi686",
        "x64" => "stdenv.isx86_64",
        "arm" => "stdenv.isAarch32",
        "arm64" => "stdenv.isAarch64",
        _ => "false",
      }),
      "libc" => {
        // only glibc exists on nix; other implementations exclude
        if value != "glibc" {
          clauses.push("false");
        }
      }
      _ => {}
    }
  }

  if clauses.is_empty() {
    return None;
  }
  let joined = clauses
    .iter()
    .map(|clause| format!("({clause})"))
    .collect::<Vec<_>>()
    .join(" && ");
  Some(format!("stdenv: {joined}"))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ident::{Ident, Locator};
  use pretty_assertions::assert_eq;

  fn node_package(name: &str, reference: &str) -> Package {
    Package::new(
      Locator::new(Ident::new(None, name.to_string()), reference.to_string()),
      "node".to_string(),
      LinkType::Hard,
    )
  }

  fn no_paths(_: &str) -> Option<String> {
    None
  }

  #[test]
  fn workspace_reference_is_source() {
    let pkg = Package::new(
      Locator::new(
        Ident::new(None, "app".to_string()),
        "workspace:packages/app".to_string(),
      ),
      "unknown".to_string(),
      LinkType::Soft,
    );
    assert_eq!(
      classify(&pkg, &StrategyRegistry::default(), &no_paths),
      Materialization::Source {
        path: "./packages/app".to_string()
      }
    );
  }

  #[test]
  fn portal_reference_is_source() {
    let pkg = node_package("linked", "portal:/home/me/linked");
    assert_eq!(
      classify(&pkg, &StrategyRegistry::default(), &no_paths),
      Materialization::Source {
        path: "/home/me/linked".to_string()
      }
    );
  }

  #[test]
  fn file_reference_resolves_through_the_lookup() {
    let pkg = node_package("local", "file:./vendor/local");
    let lookup = |locator: &str| {
      (locator == "local@file:./vendor/local").then(|| "/src/app/vendor/local".to_string())
    };
    assert_eq!(
      classify(&pkg, &StrategyRegistry::default(), &lookup),
      Materialization::Source {
        path: "/src/app/vendor/local".to_string()
      }
    );
    // unresolvable file: falls through to the strategies
    assert_eq!(
      classify(&pkg, &StrategyRegistry::default(), &no_paths),
      Materialization::Zip
    );
  }

  #[test]
  fn plain_npm_package_is_zip() {
    let pkg = node_package("ms", "npm:0.6.2");
    assert_eq!(
      classify(&pkg, &StrategyRegistry::default(), &no_paths),
      Materialization::Zip
    );
  }

  #[test]
  fn conditions_force_unplugged() {
    let pkg = node_package("esbuild-linux-64", "npm:0.15.0")
      .with_conditions(Some("os=linux&cpu=x64".to_string()));
    assert_eq!(
      classify(&pkg, &StrategyRegistry::default(), &no_paths),
      Materialization::Unplugged
    );
  }

  #[test]
  fn forced_unplug_wins() {
    let mut pkg = node_package("enhanced-resolve", "npm:5.0.0");
    pkg.unplugged = true;
    assert_eq!(
      classify(&pkg, &StrategyRegistry::default(), &no_paths),
      Materialization::Unplugged
    );
  }

  #[test]
  fn first_matching_strategy_wins() {
    struct ClaimAll(bool);
    impl LinkStrategy for ClaimAll {
      fn supports_package(&self, _: &Package) -> bool {
        true
      }
      fn should_be_unplugged(&self, _: &Package) -> bool {
        self.0
      }
    }

    let registry = StrategyRegistry::new(vec![Box::new(ClaimAll(false)), Box::new(ClaimAll(true))]);
    let pkg = node_package("ms", "npm:0.6.2");
    // the second strategy would unplug, but the first claims it
    assert_eq!(classify(&pkg, &registry, &no_paths), Materialization::Zip);
  }

  #[test]
  fn install_condition_renders_conjunction() {
    assert_eq!(
      install_condition(Some("os=linux&cpu=x64")),
      Some("stdenv: (stdenv.isLinux) && (stdenv.isx86_64)".to_string())
    );
  }

  #[test]
  fn unknown_values_become_false_clauses() {
    assert_eq!(
      install_condition(Some("os=win32")),
      Some("stdenv: (false)".to_string())
    );
    assert_eq!(
      install_condition(Some("libc=musl")),
      Some("stdenv: (false)".to_string())
    );
  }

  #[test]
  fn supported_libc_and_absent_conditions_yield_none() {
    assert_eq!(install_condition(Some("libc=glibc")), None);
    assert_eq!(install_condition(None), None);
  }
}
