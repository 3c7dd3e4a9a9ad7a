//! # yarnix-core
//!
//! Rebuilds the in-memory package graph of an already-resolved Yarn
//! project from a serialized registry dump, and derives the artifacts a
//! content-addressed build system needs to materialize it: a lockfile
//! snapshot, a PnP resolution registry for the module loader, and a
//! `yarn-manifest.nix` build manifest with per-package output hashes.
//!
//! Nothing in here resolves versions or touches the network - the dump
//! is an external resolution that we replay, never second-guess.
#![deny(clippy::all)]
pub mod error;
pub mod graph;
pub mod ident;
pub mod loader;
pub mod lockfile;
pub mod manifest;
pub mod materialize;
pub mod outputs;
pub mod package;
pub mod pipeline;
pub mod parse;
pub mod registry;
pub mod veil;

pub use error::Error;
