//! Which files never leave the machine.
//!
//! Patterns are shell-style globs on a single path component. A trailing
//! `/` makes the pattern match directories only, pruning everything
//! below them.

use std::path::{Component, Path};

use regex::Regex;

use crate::error::SyncError;

/// Locks, pids, sockets, temp files and logs are runtime artefacts, not state.
pub const DEFAULT_EXCLUDES: &[&str] = &["*.lock", "*.pid", "*.sock", "*.tmp", "*.log", "logs/"];

#[derive(Debug, Clone)]
pub struct ExcludeRules {
    file_globs: Vec<String>,
    dir_globs: Vec<String>,
    files: Option<Regex>,
    dirs: Option<Regex>,
}

impl ExcludeRules {
    /// Built-in exclusions plus `extra`.
    pub fn with_defaults(extra: &[String]) -> Result<Self, SyncError> {
        let patterns = DEFAULT_EXCLUDES
            .iter()
            .map(|p| p.to_string())
            .chain(extra.iter().cloned());
        Self::new(patterns)
    }

    pub fn new(patterns: impl IntoIterator<Item = String>) -> Result<Self, SyncError> {
        let mut file_globs = Vec::new();
        let mut dir_globs = Vec::new();

        for pattern in patterns {
            let pattern = pattern.trim().to_string();
            if pattern.is_empty() {
                continue;
            }
            if let Some(dir) = pattern.strip_suffix('/') {
                dir_globs.push(dir.to_string());
            } else {
                file_globs.push(pattern);
            }
        }

        for glob in file_globs.iter().chain(&dir_globs) {
            if glob.contains('/') {
                return Err(SyncError::InvalidPattern {
                    pattern: glob.clone(),
                    reason: "patterns match a single path component".to_string(),
                });
            }
        }

        Ok(Self {
            files: compile(&file_globs)?,
            dirs: compile(&dir_globs)?,
            file_globs,
            dir_globs,
        })
    }

    /// Whether `relative` (relative to the sync root) should be skipped.
    pub fn is_excluded(&self, relative: &Path, is_dir: bool) -> bool {
        let names: Vec<_> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(name) => name.to_str(),
                _ => None,
            })
            .collect();

        let Some((last, parents)) = names.split_last() else {
            return false;
        };

        if parents.iter().any(|name| self.matches_dir(name)) {
            return true;
        }
        if is_dir {
            self.matches_dir(last)
        } else {
            self.files.as_ref().is_some_and(|re| re.is_match(last))
        }
    }

    fn matches_dir(&self, name: &str) -> bool {
        self.dirs.as_ref().is_some_and(|re| re.is_match(name))
    }

    /// One Python-compatible regex over relative paths, for `gsutil rsync -x`.
    pub fn path_regex(&self) -> String {
        let mut alternatives = Vec::new();
        if !self.file_globs.is_empty() {
            alternatives.push(format!("(^|.*/)({})$", alternation(&self.file_globs)));
        }
        if !self.dir_globs.is_empty() {
            alternatives.push(format!("(^|.*/)({})/.*", alternation(&self.dir_globs)));
        }
        alternatives.join("|")
    }

    /// Globs for tools matching against paths (`aws s3 sync`, `rclone`).
    pub fn path_globs(&self) -> Vec<String> {
        let mut globs: Vec<String> = self.file_globs.clone();
        for dir in &self.dir_globs {
            globs.push(format!("{dir}/**"));
            globs.push(format!("**/{dir}/**"));
        }
        globs
    }
}

fn compile(globs: &[String]) -> Result<Option<Regex>, SyncError> {
    if globs.is_empty() {
        return Ok(None);
    }
    let source = format!("^(?:{})$", alternation(globs));
    Regex::new(&source)
        .map(Some)
        .map_err(|e| SyncError::InvalidPattern {
            pattern: globs.join(","),
            reason: e.to_string(),
        })
}

fn alternation(globs: &[String]) -> String {
    globs
        .iter()
        .map(|g| glob_to_regex(g))
        .collect::<Vec<_>>()
        .join("|")
}

/// Translate `*` and `?` within one path component; escape the rest.
fn glob_to_regex(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() * 2);
    for ch in glob.chars() {
        match ch {
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out
}
