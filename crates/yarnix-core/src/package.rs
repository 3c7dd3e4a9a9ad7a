use crate::ident::{Descriptor, IdentHash, Locator};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// The type of link to use for a package
pub enum LinkType {
  /// The package manager owns the location (typically things within the cache)
  /// e.g. `PnP` linker may unplug packages
  Hard,

  /// The package manager doesn't own the location (symlinks, workspaces, etc),
  /// so the linkers aren't allowed to do anything with them except use them as
  /// they are.
  Soft,
}

impl TryFrom<&str> for LinkType {
  type Error = ();

  fn try_from(s: &str) -> Result<Self, Self::Error> {
    match s {
      "hard" | "HARD" => Ok(Self::Hard),
      "soft" | "SOFT" => Ok(Self::Soft),
      _ => Err(()),
    }
  }
}

impl LinkType {
  /// Upper-case spelling used by lockfile-adjacent outputs.
  pub fn as_manifest_str(self) -> &'static str {
    match self {
      Self::Hard => "HARD",
      Self::Soft => "SOFT",
    }
  }

  /// Lower-case spelling used by the lockfile itself.
  pub fn as_lockfile_str(self) -> &'static str {
    match self {
      Self::Hard => "hard",
      Self::Soft => "soft",
    }
  }
}

/// The "language" of the package (eg. `node`), for use with multi-linkers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageName(String);

impl LanguageName {
  pub fn new(name: String) -> Self {
    Self(name)
  }
}

impl AsRef<str> for LanguageName {
  fn as_ref(&self) -> &str {
    &self.0
  }
}

/// A fully reconstructed package: a [`Locator`] plus everything the
/// classifier, hash engine, and serializers need to know about it.
///
/// Dependency maps are keyed by the *requesting* ident's hash, matching
/// yarn's `Package` shape - two packages may depend on the same target
/// under different names (`npm:` aliases).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
  pub locator: Locator,

  /// Version of the package, if the dump carried one
  pub version: Option<String>,

  pub language_name: LanguageName,

  pub link_type: LinkType,

  /// A set of constraints indicating whether the package supports the host
  /// environments, eg. `os=linux&cpu=x64`
  pub conditions: Option<String>,

  /// A map of the package's dependencies. There's no distinction between prod
  /// dependencies and dev dependencies, because those have already been merged
  /// during the resolution process - except for edges the dump explicitly
  /// marked dev, which land in `dev_dependencies`.
  pub dependencies: HashMap<IdentHash, Descriptor>,

  /// Edges the dump marked as dev-only, kept apart so the manifest can
  /// render them in their own block.
  pub dev_dependencies: HashMap<IdentHash, Descriptor>,

  /// Declared peer requests. May stay unresolved - the loader registry
  /// renders those with a null target.
  pub peer_dependencies: HashMap<IdentHash, Descriptor>,

  /// All bin entries for the package (command name -> relative script
  /// path). Ordered, since they are serialized.
  pub bin: BTreeMap<String, String>,

  /// `dependenciesMeta.unplugged` from the dump - a user-forced unplug.
  pub unplugged: bool,
}

impl Package {
  pub fn new(locator: Locator, language_name: String, link_type: LinkType) -> Self {
    Self {
      locator,
      version: None,
      language_name: LanguageName::new(language_name),
      link_type,
      conditions: None,
      dependencies: HashMap::new(),
      dev_dependencies: HashMap::new(),
      peer_dependencies: HashMap::new(),
      bin: BTreeMap::new(),
      unplugged: false,
    }
  }

  #[must_use]
  pub fn with_version(mut self, version: Option<String>) -> Self {
    self.version = version;
    self
  }

  #[must_use]
  pub fn with_conditions(mut self, conditions: Option<String>) -> Self {
    self.conditions = conditions;
    self
  }

  /// Collision-resistant slug: name, version, and a locator-hash prefix.
  /// Used for output names and unplugged directory names.
  pub fn slug(&self) -> String {
    let ident = self.locator.ident();
    let mut parts: Vec<String> = Vec::new();
    if let Some(scope) = ident.scope() {
      parts.push(scope.trim_start_matches('@').to_string());
    }
    parts.push(ident.name().to_string());
    if let Some(version) = &self.version {
      parts.push(version.clone());
    }
    parts.push(self.locator.hash().prefix().to_string());
    parts
      .join("-")
      .chars()
      .map(|c| if c.is_alphanumeric() || c == '-' || c == '.' { c } else { '-' })
      .collect()
  }
}
