//! Devirtualization: recovering canonical identities from peer-context
//! ("virtual") instances.
//!
//! A virtual reference wraps the canonical one as
//! `virtual:<context-hash>#<canonical-reference>`. Multiple virtual
//! instances of one canonical package share a single filesystem
//! location but carry distinct dependency edges, so both sides of the
//! mapping matter: stripping the wrapper, and knowing which peer idents
//! caused the split.
//!
//! These transforms only ever *consume* virtual identities produced by
//! the upstream resolver; nothing in this crate invents one.

use crate::ident::{Descriptor, Locator};
use crate::package::Package;
use std::collections::BTreeSet;

const VIRTUAL_PROTOCOL: &str = "virtual:";

/// Does this reference carry a peer-context wrapper?
pub fn is_virtual_reference(reference: &str) -> bool {
  reference.starts_with(VIRTUAL_PROTOCOL)
}

pub fn is_virtual_locator(locator: &Locator) -> bool {
  is_virtual_reference(locator.reference())
}

/// Strip the wrapper from a reference. Total and idempotent: a
/// non-virtual reference (including one already stripped) passes
/// through unchanged, as does a malformed wrapper with no body.
fn devirtualize_reference(reference: &str) -> &str {
  match reference.strip_prefix(VIRTUAL_PROTOCOL) {
    Some(wrapped) => match wrapped.split_once('#') {
      Some((_context_hash, canonical)) => canonical,
      None => reference,
    },
    None => reference,
  }
}

/// Recover the canonical locator from a virtual one.
pub fn devirtualize_locator(locator: &Locator) -> Locator {
  let canonical = devirtualize_reference(locator.reference());
  if canonical == locator.reference() {
    return locator.clone();
  }
  Locator::new(locator.ident().clone(), canonical.to_string())
}

/// Recover the canonical descriptor from a virtual one - ranges use the
/// same wrapper format as references.
pub fn devirtualize_descriptor(descriptor: &Descriptor) -> Descriptor {
  let canonical = devirtualize_reference(descriptor.range());
  if canonical == descriptor.range() {
    return descriptor.clone();
  }
  Descriptor::new(descriptor.ident().clone(), canonical.to_string())
}

/// The ordered set of peer ident strings a package declares. This is
/// what distinguishes the virtual instances of its dependents.
pub fn peer_idents(package: &Package) -> BTreeSet<String> {
  package
    .peer_dependencies
    .values()
    .map(|descriptor| descriptor.ident().stringify())
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ident::Ident;
  use crate::package::LinkType;
  use pretty_assertions::assert_eq;

  fn locator(name: &str, reference: &str) -> Locator {
    Locator::new(Ident::new(None, name.to_string()), reference.to_string())
  }

  #[test]
  fn devirtualize_strips_the_wrapper() {
    let virtual_locator = locator("react-dom", "virtual:abcdef1234#npm:18.2.0");
    let canonical = devirtualize_locator(&virtual_locator);
    assert_eq!(canonical.reference(), "npm:18.2.0");
    assert_eq!(canonical.ident().name(), "react-dom");
  }

  #[test]
  fn devirtualize_is_idempotent() {
    let virtual_locator = locator("react-dom", "virtual:abcdef1234#npm:18.2.0");
    let once = devirtualize_locator(&virtual_locator);
    let twice = devirtualize_locator(&once);
    assert_eq!(once, twice);
  }

  #[test]
  fn devirtualize_is_identity_for_canonical_locators() {
    let canonical = locator("ms", "npm:0.6.2");
    assert_eq!(devirtualize_locator(&canonical), canonical);
  }

  #[test]
  fn malformed_wrapper_without_body_passes_through() {
    let odd = locator("x", "virtual:abcdef1234");
    assert_eq!(devirtualize_locator(&odd), odd);
  }

  #[test]
  fn devirtualize_descriptor_strips_ranges() {
    let descriptor = Descriptor::new(
      Ident::new(None, "react-dom".to_string()),
      "virtual:abcdef1234#npm:^18.0.0".to_string(),
    );
    assert_eq!(devirtualize_descriptor(&descriptor).range(), "npm:^18.0.0");
  }

  #[test]
  fn peer_idents_are_sorted_and_deduplicated() {
    let mut pkg = Package::new(locator("plugin", "npm:1.0.0"), "node".to_string(), LinkType::Hard);
    for name in ["zod", "react"] {
      let descriptor = Descriptor::new(Ident::new(None, name.to_string()), "npm:*".to_string());
      pkg
        .peer_dependencies
        .insert(descriptor.ident().hash(), descriptor);
    }
    let peers: Vec<String> = peer_idents(&pkg).into_iter().collect();
    assert_eq!(peers, vec!["react".to_string(), "zod".to_string()]);
  }
}
