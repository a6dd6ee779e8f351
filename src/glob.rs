//! Shell-style name matching for include and exclude sets.
//!
//! Patterns are matched against a single entry *name* (`app.css`), never a
//! path, so a pattern only ever applies to the directory level it is being
//! evaluated at. Supported syntax is the usual shell subset:
//!
//! | Pattern | Matches |
//! |---------|---------|
//! | `*` | any run of characters |
//! | `?` | exactly one character |
//! | `[abc]`, `[a-z]` | one character from the class |
//! | `[!abc]` | one character outside the class |
//!
//! Matching is case-sensitive and anchored: `*.css` matches `site.css` but
//! not `site.css.map` or `SITE.CSS`. A backslash is an ordinary character,
//! not an escape.

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GlobError {
    #[error("invalid glob pattern '{pattern}': {source}")]
    Invalid {
        pattern: String,
        #[source]
        source: globset::Error,
    },
    #[error("failed to compile glob set: {0}")]
    Build(#[from] globset::Error),
}

/// An ordered set of compiled glob patterns.
///
/// The original pattern text is kept alongside the compiled set so stage
/// plans can be printed back exactly as configured.
#[derive(Debug, Clone)]
pub struct Patterns {
    sources: Vec<String>,
    set: GlobSet,
}

impl Patterns {
    /// Compile a list of patterns. Fails on the first malformed pattern.
    pub fn new<I, S>(patterns: I) -> Result<Self, GlobError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let sources: Vec<String> = patterns.into_iter().map(Into::into).collect();
        let mut builder = GlobSetBuilder::new();
        for pattern in &sources {
            let glob = GlobBuilder::new(pattern)
                .literal_separator(true)
                .backslash_escape(false)
                .build()
                .map_err(|source| GlobError::Invalid {
                    pattern: pattern.clone(),
                    source,
                })?;
            builder.add(glob);
        }
        Ok(Self {
            sources,
            set: builder.build()?,
        })
    }

    /// A set with no patterns. Matches nothing.
    pub fn empty() -> Self {
        Self {
            sources: Vec::new(),
            set: GlobSet::empty(),
        }
    }

    /// The patterns as originally written, in order.
    pub fn as_strings(&self) -> &[String] {
        &self.sources
    }

    /// Whether `name` matches at least one pattern.
    pub fn is_match(&self, name: &str) -> bool {
        self.set.is_match(name)
    }

    /// Every name in `names` matching at least one pattern.
    pub fn filter<'a, I>(&self, names: I) -> BTreeSet<&'a str>
    where
        I: IntoIterator<Item = &'a str>,
    {
        names.into_iter().filter(|n| self.is_match(n)).collect()
    }
}
