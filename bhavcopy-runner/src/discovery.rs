//! Input discovery for standalone curation.
//!
//! Walks a raw root recursively and keeps files whose name matches a shell-style
//! glob (`*` and `?`), e.g. `sec_bhavdata_full_*.csv`.

use std::path::{Path, PathBuf};

use regex::Regex;
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("input root {0} is not a directory")]
    NotADirectory(PathBuf),

    #[error("invalid pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Compile a filename glob into an anchored regex.
pub fn glob_to_regex(pattern: &str) -> Result<Regex, DiscoveryError> {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push('^');
    for c in pattern.chars() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).map_err(|source| DiscoveryError::Pattern {
        pattern: pattern.to_string(),
        source,
    })
}

/// Files under `root` whose file name matches `pattern`, sorted by path.
pub fn discover_inputs(root: &Path, pattern: &str) -> Result<Vec<PathBuf>, DiscoveryError> {
    if !root.is_dir() {
        return Err(DiscoveryError::NotADirectory(root.to_path_buf()));
    }
    let matcher = glob_to_regex(pattern)?;

    let mut inputs = Vec::new();
    for entry in WalkDir::new(root).follow_links(true) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        if matcher.is_match(&entry.file_name().to_string_lossy()) {
            inputs.push(entry.into_path());
        }
    }
    inputs.sort();
    debug!(root = %root.display(), pattern, found = inputs.len(), "discovered inputs");
    Ok(inputs)
}
