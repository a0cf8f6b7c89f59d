//! File discovery: walks a root directory and yields the sorted set of
//! files eligible for indexing.

use std::path::{Path, PathBuf};

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use ignore::WalkBuilder;

use crate::error::{CoreError, Result};

/// Controls which files [`discover_files`] returns.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub root: PathBuf,
    pub extensions: Vec<String>,
    pub exclude_patterns: Vec<String>,
}

/// Statistics about a discovered set of files, used by the `--stats` CLI path.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryStats {
    pub total_files: usize,
    pub file_extensions: Vec<String>,
    pub total_size_bytes: u64,
}

/// Build a gitwildmatch pattern set for `patterns`, anchored at `root`, the
/// same semantics `load_repo_gitignore` uses for the repository's own
/// `.gitignore` so `**/bin/**`-style exclude patterns behave identically.
fn build_exclude_set(root: &Path, patterns: &[String]) -> Result<Option<Gitignore>> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GitignoreBuilder::new(root);
    for pattern in patterns {
        builder
            .add_line(None, pattern)
            .map_err(|e| CoreError::config(format!("invalid exclude pattern {pattern}: {e}")))?;
    }
    let spec = builder
        .build()
        .map_err(|e| CoreError::config(format!("failed to build exclude pattern set: {e}")))?;
    Ok(Some(spec))
}

/// Load the repository-wide gitignore spec for `root` by walking parents for
/// a `.git` directory, or `None` if `root` is not inside a repository.
fn load_repo_gitignore(root: &Path) -> Option<Gitignore> {
    let mut dir = root.canonicalize().ok()?;
    loop {
        if dir.join(".git").exists() {
            let gitignore_path = dir.join(".gitignore");
            if gitignore_path.exists() {
                let (spec, _err) = Gitignore::new(&gitignore_path);
                return Some(spec);
            }
            return None;
        }
        if !dir.pop() {
            return None;
        }
    }
}

/// Discover all eligible files under `config.root`, sorted lexicographically.
/// Returns absolute paths: `config.root` is canonicalized before the walk
/// starts, regardless of whether the caller passed a relative path.
pub fn discover_files(config: &DiscoveryConfig) -> Result<Vec<PathBuf>> {
    if !config.root.exists() {
        return Err(CoreError::config(format!(
            "codebase root does not exist: {}",
            config.root.display()
        )));
    }
    let root = config.root.canonicalize().map_err(|e| {
        CoreError::config(format!("failed to canonicalize codebase root {}: {e}", config.root.display()))
    })?;

    let exclude_spec = build_exclude_set(&root, &config.exclude_patterns)?;
    let repo_ignore = load_repo_gitignore(&root);

    let mut files = Vec::new();
    let walker = WalkBuilder::new(&root)
        .hidden(true)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .build();

    for entry in walker.flatten() {
        let path = entry.path();
        if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
            continue;
        }
        if !has_allowed_extension(path, &config.extensions) {
            continue;
        }
        let rel = path.strip_prefix(&root).unwrap_or(path);
        if let Some(spec) = &exclude_spec {
            if spec.matched(rel, false).is_ignore() {
                continue;
            }
        }
        if let Some(spec) = &repo_ignore {
            if spec.matched(rel, false).is_ignore() {
                continue;
            }
        }
        files.push(path.to_path_buf());
    }

    files.sort();
    Ok(files)
}

fn has_allowed_extension(path: &Path, extensions: &[String]) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    let dotted = format!(".{ext}");
    extensions.iter().any(|allowed| allowed == &dotted)
}

/// Aggregate size/extension stats over a discovered file set.
pub fn stats(files: &[PathBuf]) -> DiscoveryStats {
    let mut extensions = std::collections::BTreeSet::new();
    let mut total_size_bytes = 0u64;
    for file in files {
        if let Some(ext) = file.extension().and_then(|e| e.to_str()) {
            extensions.insert(format!(".{ext}"));
        }
        if let Ok(meta) = std::fs::metadata(file) {
            total_size_bytes += meta.len();
        }
    }
    DiscoveryStats {
        total_files: files.len(),
        file_extensions: extensions.into_iter().collect(),
        total_size_bytes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn discovers_only_allowed_extensions() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("A.cs"), "class A {}").unwrap();
        fs::write(dir.path().join("B.txt"), "ignore me").unwrap();

        let cfg = DiscoveryConfig {
            root: dir.path().to_path_buf(),
            extensions: vec![".cs".into()],
            exclude_patterns: vec![],
        };
        let files = discover_files(&cfg).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("A.cs"));
    }

    #[test]
    fn respects_exclude_patterns() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("obj")).unwrap();
        fs::write(dir.path().join("obj/Gen.cs"), "class Gen {}").unwrap();
        fs::write(dir.path().join("Main.cs"), "class Main {}").unwrap();

        let cfg = DiscoveryConfig {
            root: dir.path().to_path_buf(),
            extensions: vec![".cs".into()],
            exclude_patterns: vec!["**/obj/**".into()],
        };
        let files = discover_files(&cfg).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("Main.cs"));
    }

    #[test]
    fn missing_root_is_config_error() {
        let cfg = DiscoveryConfig {
            root: PathBuf::from("/does/not/exist/at/all"),
            extensions: vec![".cs".into()],
            exclude_patterns: vec![],
        };
        assert!(matches!(discover_files(&cfg), Err(CoreError::Config(_))));
    }
}
