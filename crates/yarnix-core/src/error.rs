use thiserror::Error;

/// Errors surfaced by the graph rebuild and manifest synthesis.
///
/// Identity and structural errors are fatal - a mis-parsed locator would
/// corrupt every downstream hash. Completeness problems (an edge whose
/// target is missing from the dump) are not represented here: they are
/// recovered by omission at the call site.
#[derive(Debug, Error)]
pub enum Error {
  /// A locator or descriptor string did not match `[@scope/]name@value`.
  #[error("malformed identity string: {0:?}")]
  MalformedIdentity(String),

  /// The registry dump itself is structurally invalid.
  #[error("malformed registry entry {locator:?}: {reason}")]
  MalformedRegistry { locator: String, reason: String },

  /// No entry in the resolution map matched the supplied top-level
  /// directory. The loader registry is meaningless without a root.
  #[error("could not determine top-level package for {0:?}")]
  TopLevelNotFound(String),

  /// The injected hashing capability failed. Recoverable: the policy
  /// engine degrades the affected package to the placeholder hash.
  #[error("hash computation unavailable for {path}: {reason}")]
  HashUnavailable { path: String, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;
