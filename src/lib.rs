//! # mini-assets
//!
//! Minify and gzip a tree of static web assets in place, by running external
//! tools (an HTML compressor, a CSS compressor, `uglifyjs`, `gzip`) over every
//! matching file and writing the results next to the sources.
//!
//! # Architecture: Six Walks Over One Tree
//!
//! ```text
//! static/app.css  ──minify──▶  static/app.min.css
//!        │                           │
//!        └────gzip──▶ app.css.gz     └──gzip──▶ app.min.css.gz
//! ```
//!
//! A build is six independent walks of the same root (see [`pipeline`]): three
//! minify stages, then three gzip stages. Each walk is the same tree processor
//! ([`walk`]) configured with a different tool, include/exclude patterns, and
//! output handler. Nothing is written outside the asset tree and no source file
//! is modified, so a build can be re-run at any time.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`pipeline`] | The six stages, their patterns and handlers; runs them in order and times the build |
//! | [`walk`] | Depth-first tree processor: filter names, run the tool, hand output to a handler |
//! | [`transform`] | External command with a typed `{file}` slot; runs it and classifies the result |
//! | [`handler`] | Output sinks: `name.min.ext`, `name.ext.gz`, template-fixed HTML |
//! | [`glob`] | Shell-style name patterns for include/exclude sets |
//! | [`config`] | `mini.toml` loading, merging over stock defaults, and validation |
//! | [`output`] | Console formatting of build events, with optional color |
//!
//! # Design Decisions
//!
//! ## Tool Failures Are Not Build Failures
//!
//! A minifier that rejects one file (exit status non-zero) is reported with its
//! stderr and the walk moves on. Only faults that make the rest of the tree
//! unreachable or the tool unusable (a directory that can't be listed, an
//! executable that isn't installed) stop the build.
//!
//! ## Names, Not Paths
//!
//! Patterns match the entry name at each directory level. `vendor` excludes
//! every directory called `vendor` at any depth, and `*.css` includes
//! `a/b/c/site.css` without needing `**`.

pub mod config;
pub mod glob;
pub mod handler;
pub mod output;
pub mod pipeline;
pub mod transform;
pub mod walk;

#[cfg(test)]
pub(crate) mod test_helpers;
