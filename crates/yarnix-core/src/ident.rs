// Types modelled on
// https://github.com/yarnpkg/berry/blob/master/packages/yarnpkg-core/sources/types.ts#L19
// with the comparator hashes computed eagerly, since every store in the
// graph is keyed by them.

use sha2::{Digest, Sha512};

/// Comparator hash over an [`Ident`]'s semantic fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentHash(String);

/// Comparator hash over a [`Descriptor`]'s semantic fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DescriptorHash(String);

/// Comparator hash over a [`Locator`]'s semantic fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocatorHash(String);

impl IdentHash {
  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl DescriptorHash {
  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl LocatorHash {
  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// Short prefix used to build collision-resistant slugs and output
  /// names.
  pub fn prefix(&self) -> &str {
    &self.0[..10]
  }
}

/// SHA-512 over the given parts, NUL-separated so that field boundaries
/// can never be confused. Hashing covers semantic fields only, never
/// incidental formatting.
fn make_hash(parts: &[&str]) -> String {
  let mut hasher = Sha512::new();
  for (i, part) in parts.iter().enumerate() {
    if i > 0 {
      hasher.update([0u8]);
    }
    hasher.update(part.as_bytes());
  }
  hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct IdentName(String);

impl IdentName {
  pub fn new(name: String) -> Self {
    Self(name)
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct IdentScope(String);

impl IdentScope {
  pub fn new(scope: String) -> Self {
    Self(scope)
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

/// Scope + name of the package, with hash for comparison
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ident {
  /// The scope of the package, e.g. for `@scope/package`, this is `@scope`
  scope: Option<IdentScope>,
  /// The name of the package, e.g. for `@scope/package`, this is `package`
  name: IdentName,
}

impl Ident {
  pub fn new(scope: Option<String>, name: String) -> Self {
    Self {
      scope: scope.map(IdentScope::new),
      name: IdentName::new(name),
    }
  }

  pub fn scope(&self) -> Option<&str> {
    self.scope.as_ref().map(IdentScope::as_str)
  }

  pub fn name(&self) -> &str {
    self.name.as_str()
  }

  /// `identHash = hash(scope, name)`
  pub fn hash(&self) -> IdentHash {
    IdentHash(make_hash(&[self.scope().unwrap_or(""), self.name()]))
  }

  /// Renders `@scope/name`, or bare `name` for unscoped packages.
  pub fn stringify(&self) -> String {
    match self.scope() {
      Some(scope) => format!("{scope}/{}", self.name()),
      None => self.name().to_string(),
    }
  }
}

/// The range of the Descriptor, e.g. `npm:^1.2.3`, `workspace:.`,
/// `patch:lodash@npm%3A4.17.21#./fix.patch`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct IdentRange(String);

impl IdentRange {
  pub fn new(range: String) -> Self {
    Self(range)
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

/// Descriptors are just like idents, except that
/// they also contain a range and an additional comparator hash.
///
/// A descriptor is a dependency *request*: it may match several
/// candidate packages, where a [`Locator`] names exactly one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Descriptor {
  ident: Ident,
  range: IdentRange,
}

impl Descriptor {
  pub fn new(ident: Ident, range: String) -> Self {
    Self {
      ident,
      range: IdentRange::new(range),
    }
  }

  pub fn ident(&self) -> &Ident {
    &self.ident
  }

  pub fn range(&self) -> &str {
    self.range.as_str()
  }

  /// `descriptorHash = hash(identHash, range)`
  pub fn hash(&self) -> DescriptorHash {
    DescriptorHash(make_hash(&[self.ident.hash().as_str(), self.range()]))
  }

  /// Renders `name@range`.
  pub fn stringify(&self) -> String {
    format!("{}@{}", self.ident.stringify(), self.range())
  }
}

// Locators are just like idents (including their `identHash`), except that
// they also contain a reference and an additional comparator hash. They are
// in this regard very similar to descriptors except that each descriptor may
// reference multiple valid candidate packages whereas each locators can only
// reference a single package.
//
// This interesting property means that each locator can be safely turned into
// a descriptor - but not the other way
// around (except in very specific cases).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Locator {
  ident: Ident,
  /// A package reference uniquely identifies a package (eg. `npm:1.2.3`).
  reference: String,
}

impl Locator {
  /// Create a new Locator from an Ident and a reference
  pub fn new(ident: Ident, reference: String) -> Self {
    Self { ident, reference }
  }

  /// Returns the Ident of the Locator (e.g. `@scope/package`)
  pub fn ident(&self) -> &Ident {
    &self.ident
  }

  /// Returns the reference of the Locator (e.g. `npm:1.2.3`)
  pub fn reference(&self) -> &str {
    &self.reference
  }

  /// `locatorHash = hash(identHash, reference)`
  pub fn hash(&self) -> LocatorHash {
    LocatorHash(make_hash(&[self.ident.hash().as_str(), self.reference()]))
  }

  /// Renders `name@reference`. This is also the manifest entry key.
  pub fn stringify(&self) -> String {
    format!("{}@{}", self.ident.stringify(), self.reference())
  }

  /// Every locator is a valid descriptor of itself - the reference acts
  /// as an exact-pin range.
  pub fn as_descriptor(&self) -> Descriptor {
    Descriptor::new(self.ident.clone(), self.reference.clone())
  }
}
