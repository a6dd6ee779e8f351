//! Output handlers: persist a transform's stdout next to its source file.
//!
//! | Handler | `app.css` becomes |
//! |---------|-------------------|
//! | [`MinifiedText`] | `app.min.css` |
//! | [`MinifiedHtml`] | `index.min.html` (optionally template-fixed) |
//! | [`Gzipped`] | `app.css.gz` |
//!
//! Every handler overwrites an existing target.

use regex::Regex;
use std::borrow::Cow;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no file name in {0}")]
    NoFileName(PathBuf),
}

/// A sink for one successful transform result.
pub trait OutputHandler {
    /// Write `output` (the tool's stdout for `source`) and return the path
    /// that was written.
    fn handle(&self, source: &Path, output: &[u8]) -> Result<PathBuf, HandlerError>;
}

/// `name.ext` → `name.min.ext`. Files without an extension get a bare
/// `.min` suffix (`LICENSE` → `LICENSE.min`).
pub fn minified_path(source: &Path) -> Result<PathBuf, HandlerError> {
    let stem = source
        .file_stem()
        .ok_or_else(|| HandlerError::NoFileName(source.to_path_buf()))?;
    let mut name = OsString::from(stem);
    name.push(".min");
    if let Some(ext) = source.extension() {
        name.push(".");
        name.push(ext);
    }
    Ok(source.with_file_name(name))
}

/// `p` → `p.gz`.
pub fn gzipped_path(source: &Path) -> PathBuf {
    let mut raw = source.as_os_str().to_os_string();
    raw.push(".gz");
    PathBuf::from(raw)
}

fn write(path: PathBuf, bytes: &[u8]) -> Result<PathBuf, HandlerError> {
    tracing::debug!(path = %path.display(), bytes = bytes.len(), "writing output");
    fs::write(&path, bytes).map_err(|source| HandlerError::Write {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

/// Writes minified text verbatim to `name.min.ext`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MinifiedText;

impl OutputHandler for MinifiedText {
    fn handle(&self, source: &Path, output: &[u8]) -> Result<PathBuf, HandlerError> {
        write(minified_path(source)?, output)
    }
}

/// Writes compressed bytes to `name.ext.gz`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Gzipped;

impl OutputHandler for Gzipped {
    fn handle(&self, source: &Path, output: &[u8]) -> Result<PathBuf, HandlerError> {
        write(gzipped_path(source), output)
    }
}

/// Writes minified HTML to `name.min.html`.
///
/// HTML minifiers tend to squeeze whitespace out of template tags, turning
/// `{% if a == b %}` into `{% if a==b %}`, which some template engines then
/// refuse to parse. With `fix_templates` set, each output line is passed
/// through [`fix_template_line`] before writing.
#[derive(Debug, Default, Clone, Copy)]
pub struct MinifiedHtml {
    pub fix_templates: bool,
}

impl OutputHandler for MinifiedHtml {
    fn handle(&self, source: &Path, output: &[u8]) -> Result<PathBuf, HandlerError> {
        let target = minified_path(source)?;
        if !self.fix_templates {
            return write(target, output);
        }
        tracing::debug!(file = %source.display(), "fixing template operators");
        let text = String::from_utf8_lossy(output);
        let fixed: Vec<Cow<'_, str>> = text.split('\n').map(fix_template_line).collect();
        write(target, fixed.join("\n").as_bytes())
    }
}

static TEMPLATE_OPERATOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\{%\s[^%}]*[^\s=><])([=><]{2})([^}%]*%\})").expect("static regex must compile")
});

/// Put a space back between a template tag operand and a following
/// two-character comparison operator: `{% if a==b %}` → `{% if a ==b %}`.
///
/// Text outside `{% ... %}` tags is untouched.
pub fn fix_template_line(line: &str) -> Cow<'_, str> {
    TEMPLATE_OPERATOR.replace_all(line, "$1 $2$3")
}
