//! gobfuscate-core
//!
//! Core library for obfuscating Go programs at the source level.
//!
//! A run copies a program and its GOPATH dependencies into an isolated
//! workspace, rewrites package import paths, string literals and identifiers
//! there, and drives the Go toolchain over a GOOS/GOARCH matrix. The original
//! sources are never modified.
//!
//! All substantive logic lives here so it is testable and reusable from
//! multiple frontends; the CLI is a thin wrapper.

pub mod config;
pub mod error;
pub mod hasher;
pub mod matrix;
pub mod pipeline;
pub mod pkgpath;
pub mod strings;
pub mod symbols;
pub mod syntax;
pub mod workspace;

pub use error::{ObfuscateError, ObfuscateResult, UnresolvedReference};

/// Returns the library version as encoded at compile time.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
