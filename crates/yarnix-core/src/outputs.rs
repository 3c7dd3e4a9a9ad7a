//! Output-hash assignment with incremental reuse.
//!
//! Hashing an unpacked tree is by far the most expensive step of a run,
//! so the engine reuses hashes from the prior manifest whenever it has
//! one for the current platform. That trades a small risk of a silently
//! stale platform hash for fast repeated runs - an accepted tradeoff.
//!
//! The two external effects (does the unplugged directory exist, hash
//! it) are injected capabilities; everything else is pure. Per-package
//! probing runs as independent cooperative futures and only the final
//! sorted serialization defines output order, so completion order never
//! shows.

use crate::error::{Error, Result};
use crate::graph::strip_checksum_tag;
use crate::materialize::Materialization;
use crate::package::Package;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Existence probe for external paths.
pub trait SystemProbe {
  fn path_exists(&self, path: &Path) -> impl Future<Output = bool>;
}

/// The "hash a directory" capability (eg. `nix hash path`).
pub trait PathHasher {
  fn hash_path(&self, path: &Path) -> impl Future<Output = Result<String>>;
}

/// One prior-manifest entry, read-only input for hash reuse.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PriorEntry {
  pub output_hash: Option<String>,
  pub output_hash_by_platform: BTreeMap<String, String>,
}

/// package-id (`name@reference`) -> prior hashes.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct PriorManifest {
  entries: HashMap<String, PriorEntry>,
}

impl PriorManifest {
  pub fn get(&self, package_id: &str) -> Option<&PriorEntry> {
    self.entries.get(package_id)
  }
}

/// The hash decision for one package. At most one of the two fields is
/// populated; `output_hash == Some("")` is the "unknown, compute lazily
/// downstream" placeholder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputHashes {
  pub output_hash: Option<String>,
  pub output_hash_by_platform: BTreeMap<String, String>,
}

impl OutputHashes {
  fn none() -> Self {
    Self::default()
  }

  fn placeholder() -> Self {
    Self {
      output_hash: Some(String::new()),
      output_hash_by_platform: BTreeMap::new(),
    }
  }
}

pub struct HashPolicyEngine<'a, C> {
  prior: Option<&'a PriorManifest>,
  /// Current platform key, eg. `x86_64-linux`.
  system: String,
  /// Root under which unplugged packages extract, per-package
  /// subdirectory named by the package slug.
  unplugged_root: PathBuf,
  capabilities: &'a C,
}

impl<'a, C> HashPolicyEngine<'a, C>
where
  C: SystemProbe + PathHasher,
{
  pub fn new(
    prior: Option<&'a PriorManifest>,
    system: impl Into<String>,
    unplugged_root: impl Into<PathBuf>,
    capabilities: &'a C,
  ) -> Self {
    Self {
      prior,
      system: system.into(),
      unplugged_root: unplugged_root.into(),
      capabilities,
    }
  }

  /// Assign hashes for every package concurrently. Results are keyed by
  /// manifest package-id, so join order is irrelevant.
  pub async fn assign_all(
    &self,
    work: Vec<(String, &Package, Materialization, Option<&str>)>,
  ) -> HashMap<String, OutputHashes> {
    let tasks = work.into_iter().map(|(id, package, materialization, checksum)| async move {
      let hashes = self.assign(&id, package, &materialization, checksum).await;
      (id, hashes)
    });
    futures::future::join_all(tasks).await.into_iter().collect()
  }

  /// Apply the policy to a single package.
  pub async fn assign(
    &self,
    package_id: &str,
    package: &Package,
    materialization: &Materialization,
    checksum: Option<&str>,
  ) -> OutputHashes {
    match materialization {
      // Built locally from its source tree; the build system hashes it
      // as a volatile input, never us.
      Materialization::Source { .. } => OutputHashes::none(),

      Materialization::Zip => OutputHashes {
        output_hash: checksum.map(|checksum| strip_checksum_tag(checksum).to_string()),
        output_hash_by_platform: BTreeMap::new(),
      },

      Materialization::Unplugged => self.assign_unplugged(package_id, package).await,
    }
  }

  async fn assign_unplugged(&self, package_id: &str, package: &Package) -> OutputHashes {
    let prior = self.prior.and_then(|manifest| manifest.get(package_id));
    let prior_by_platform = prior
      .map(|entry| entry.output_hash_by_platform.clone())
      .unwrap_or_default();

    // Already hashed on this platform in a previous run: keep the whole
    // map unchanged, skip the expensive recompute.
    if prior_by_platform.contains_key(&self.system) {
      debug!(package = package_id, system = %self.system, "reusing prior output hash");
      return OutputHashes {
        output_hash: None,
        output_hash_by_platform: prior_by_platform,
      };
    }

    let unplug_path = self.unplugged_root.join(package.slug());
    if self.capabilities.path_exists(&unplug_path).await {
      match self.capabilities.hash_path(&unplug_path).await {
        Ok(hash) => {
          let mut by_platform = prior_by_platform;
          by_platform.insert(self.system.clone(), hash);
          return OutputHashes {
            output_hash: None,
            output_hash_by_platform: by_platform,
          };
        }
        Err(err) => {
          // Degrades this one field only; the manifest stays consistent.
          warn!(package = package_id, error = %err, "hash capability failed, emitting placeholder");
          return OutputHashes::placeholder();
        }
      }
    }

    // Directory absent and nothing prior for this platform. Hashes
    // recorded on other platforms survive untouched rather than being
    // discarded.
    let prior_output_hash = prior.and_then(|entry| entry.output_hash.clone());
    if !prior_by_platform.is_empty() && prior_output_hash.is_none() {
      return OutputHashes {
        output_hash: None,
        output_hash_by_platform: prior_by_platform,
      };
    }

    OutputHashes::placeholder()
  }
}

/// Helper for capability implementations: a hash failure in a
/// standard shape.
pub fn hash_unavailable(path: &Path, reason: impl Into<String>) -> Error {
  Error::HashUnavailable {
    path: path.display().to_string(),
    reason: reason.into(),
  }
}
