//! Parsers for identity strings (`[@scope/]name@value`) and for the
//! range grammar (`protocol:source#selector::params`).
//!
//! These are the foundation of every store key, so failures here are
//! fatal ([`Error::MalformedIdentity`]) rather than recovered.

use nom::IResult;
use nom::{
  Parser,
  branch::alt,
  bytes::complete::take_while1,
  character::complete::char,
  combinator::{recognize, rest},
};

use crate::error::{Error, Result};
use crate::ident::{Descriptor, Ident, Locator};

/// Parse a package name, which can be scoped (@babel/code-frame) or simple (debug)
fn parse_package_name(input: &str) -> IResult<&str, &str> {
  alt((
    // Scoped package: @scope/name
    recognize((
      char('@'),
      take_while1(|c: char| c.is_alphanumeric() || c == '-' || c == '_' || c == '.'),
      char('/'),
      take_while1(|c: char| c.is_alphanumeric() || c == '-' || c == '_' || c == '.'),
    )),
    // Simple package name
    take_while1(|c: char| c.is_alphanumeric() || c == '-' || c == '_' || c == '.'),
  ))
  .parse(input)
}

/// Parse a full identity string into its name and value halves.
/// The value half is the range (descriptor) or reference (locator).
fn parse_identity(input: &str) -> IResult<&str, (&str, &str)> {
  let (rest_input, (name, _, value)) =
    (parse_package_name, char('@'), rest).parse(input)?;
  Ok((rest_input, (name, value)))
}

fn split_ident(name_part: &str) -> Ident {
  name_part.strip_prefix('@').map_or_else(
    || Ident::new(None, name_part.to_string()),
    |stripped| {
      // Scoped package: @babel/code-frame
      let parts: Vec<&str> = stripped.splitn(2, '/').collect();
      if parts.len() == 2 {
        Ident::new(Some(format!("@{}", parts[0])), parts[1].to_string())
      } else {
        // Malformed scoped package, treat as simple name
        Ident::new(None, name_part.to_string())
      }
    },
  )
}

/// Parse `[@scope/]name` into an [`Ident`].
pub fn parse_ident(input: &str) -> Result<Ident> {
  let (remaining, name) =
    parse_package_name(input).map_err(|_| Error::MalformedIdentity(input.to_string()))?;
  if !remaining.is_empty() {
    return Err(Error::MalformedIdentity(input.to_string()));
  }
  Ok(split_ident(name))
}

/// Parse `[@scope/]name@range` into a [`Descriptor`].
pub fn parse_descriptor(input: &str) -> Result<Descriptor> {
  let (name, value) = parse_identity_checked(input)?;
  Ok(Descriptor::new(split_ident(name), value.to_string()))
}

/// Parse `[@scope/]name@reference` into a [`Locator`].
pub fn parse_locator(input: &str) -> Result<Locator> {
  let (name, value) = parse_identity_checked(input)?;
  Ok(Locator::new(split_ident(name), value.to_string()))
}

fn parse_identity_checked(input: &str) -> Result<(&str, &str)> {
  let (remaining, (name, value)) =
    parse_identity(input).map_err(|_| Error::MalformedIdentity(input.to_string()))?;
  if !remaining.is_empty() || value.is_empty() {
    return Err(Error::MalformedIdentity(input.to_string()));
  }
  Ok((name, value))
}

/// A decomposed range, per
/// <https://github.com/yarnpkg/berry/blob/master/packages/yarnpkg-core/sources/structUtils.ts>
/// `parseRange`. `npm:1.0.0` has no source; `patch:lodash@npm%3A4.17.21#./fix.patch::version=4.17.21`
/// has all four parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Range {
  /// Protocol including the trailing colon (eg. `npm:`), if any.
  pub protocol: Option<String>,
  /// The wrapped source, present only in `#`-splitting protocols such
  /// as `patch:`.
  pub source: Option<String>,
  /// The selector - version, tag, path, or patch file list.
  pub selector: String,
  /// Trailing `::`-separated parameter list.
  pub params: Option<String>,
}

/// Decompose a range string. Total: a bare string is a selector with no
/// protocol.
pub fn parse_range(range: &str) -> Range {
  let (body, params) = match range.split_once("::") {
    Some((body, params)) => (body, Some(params.to_string())),
    None => (range, None),
  };

  let (protocol, remainder) = match body.split_once(':') {
    // A protocol may not contain `#` - a colon after a hash belongs to
    // the selector (eg. a git URL).
    Some((proto, rest_part)) if !proto.contains('#') => {
      (Some(format!("{proto}:")), rest_part)
    }
    _ => (None, body),
  };

  let (source, selector) = match remainder.split_once('#') {
    Some((source, selector)) => (Some(source.to_string()), selector.to_string()),
    None => (None, remainder.to_string()),
  };

  Range {
    protocol,
    source,
    selector,
    params,
  }
}

/// Inverse of [`parse_range`].
pub fn make_range(range: &Range) -> String {
  let mut out = String::new();
  if let Some(protocol) = &range.protocol {
    out.push_str(protocol);
  }
  if let Some(source) = &range.source {
    out.push_str(source);
    out.push('#');
  }
  out.push_str(&range.selector);
  if let Some(params) = &range.params {
    out.push_str("::");
    out.push_str(params);
  }
  out
}

/// Strip the parameter list from a `patch:` range so two patch
/// descriptors differing only in parameters compare equal. Identity
/// transform for every other range, and idempotent.
pub fn clean_range(range: &str) -> String {
  let parsed = parse_range(range);
  if parsed.protocol.as_deref() != Some("patch:") {
    return range.to_string();
  }
  make_range(&Range {
    params: None,
    ..parsed
  })
}

/// [`clean_range`] applied to the reference half of a locator string.
pub fn clean_locator_string(locator_string: &str) -> Result<String> {
  let locator = parse_locator(locator_string)?;
  let cleaned = clean_range(locator.reference());
  Ok(Locator::new(locator.ident().clone(), cleaned).stringify())
}

/// The descriptor a `patch:` range wraps, eg.
/// `patch:lodash@npm%3A4.17.21#./fix.patch` wraps `lodash@npm:4.17.21`.
/// `None` for non-patch ranges.
pub fn patch_source_descriptor(range: &str) -> Option<Result<Descriptor>> {
  let parsed = parse_range(range);
  if parsed.protocol.as_deref() != Some("patch:") {
    return None;
  }
  let source = parsed.source?;
  Some(parse_descriptor(&percent_decode(&source)))
}

/// Minimal %XX decoder - patch sources URL-encode the inner descriptor's
/// separators.
fn percent_decode(input: &str) -> String {
  let bytes = input.as_bytes();
  let mut out = Vec::with_capacity(bytes.len());
  let mut i = 0;
  while i < bytes.len() {
    if bytes[i] == b'%' && i + 2 < bytes.len() {
      if let Ok(value) = u8::from_str_radix(&input[i + 1..i + 3], 16) {
        out.push(value);
        i += 3;
        continue;
      }
    }
    out.push(bytes[i]);
    i += 1;
  }
  String::from_utf8_lossy(&out).into_owned()
}
