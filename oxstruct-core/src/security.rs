//! Path security gate.
//!
//! Every filesystem path handed to the pipeline resolves through a
//! [`PathGate`] before any other use. The gate holds a base directory plus
//! zero or more additional allowed directories (given directly or read from a
//! newline-delimited allow-file) and rejects anything that normalises to a
//! location outside of them.

use std::path::{Component, Path, PathBuf};

use tracing::warn;

use crate::error::{OxError, Result};

/// Enforcement mode, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecurityMode {
    /// Out-of-root paths are allowed with a warning.
    Permissive,
    /// Out-of-root paths are allowed and logged.
    #[default]
    Warn,
    /// Out-of-root paths fail the run.
    Strict,
}

impl std::str::FromStr for SecurityMode {
    type Err = OxError;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "permissive" => Ok(SecurityMode::Permissive),
            "warn" => Ok(SecurityMode::Warn),
            "strict" => Ok(SecurityMode::Strict),
            other => Err(OxError::Usage(format!(
                "unknown security mode '{other}' (expected permissive, warn, or strict)"
            ))),
        }
    }
}

/// Resolve `.` and `..` lexically without touching the filesystem.
///
/// Returns `None` when a `..` component escapes past the path root, which is
/// always a traversal attempt for the paths we feed in.
fn normalize_lexically(path: &Path) -> Option<PathBuf> {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                if !normalized.pop() {
                    return None;
                }
            }
            Component::CurDir => {}
            Component::Prefix(prefix) => normalized.push(prefix.as_os_str()),
            Component::RootDir => normalized.push(component.as_os_str()),
            Component::Normal(part) => normalized.push(part),
        }
    }
    Some(normalized)
}

#[derive(Debug, Clone)]
pub struct PathGate {
    base_dir: PathBuf,
    allowed_dirs: Vec<PathBuf>,
    mode: SecurityMode,
}

impl PathGate {
    pub fn new(base_dir: impl Into<PathBuf>, mode: SecurityMode) -> Self {
        let base_dir = canonical_or_given(base_dir.into());
        Self {
            base_dir,
            allowed_dirs: Vec::new(),
            mode,
        }
    }

    /// Add an allowed directory.
    pub fn allow_dir(&mut self, dir: impl Into<PathBuf>) {
        self.allowed_dirs.push(canonical_or_given(dir.into()));
    }

    /// Read additional allowed directories from a newline-delimited file.
    /// Blank lines and `#`-comments are skipped.
    pub fn allow_dirs_from_file(&mut self, list_path: &Path) -> Result<()> {
        let content = std::fs::read_to_string(list_path).map_err(|_| OxError::NotFound {
            path: list_path.to_path_buf(),
        })?;
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            self.allow_dir(line);
        }
        Ok(())
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn mode(&self) -> SecurityMode {
        self.mode
    }

    /// Resolve a path to its normalised absolute form, enforcing the
    /// allow-list according to the gate's mode. The target must exist.
    pub fn resolve(&self, path: &Path) -> Result<PathBuf> {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        };

        let normalized = normalize_lexically(&absolute).ok_or_else(|| OxError::Traversal {
            path: path.to_path_buf(),
        })?;

        if !normalized.exists() {
            return Err(OxError::NotFound { path: normalized });
        }

        // Symlinks resolve here so a link inside the root cannot point out.
        let resolved = std::fs::canonicalize(&normalized).unwrap_or(normalized);

        if self.contains(&resolved) {
            return Ok(resolved);
        }

        match self.mode {
            SecurityMode::Permissive => {
                warn!(path = %resolved.display(), "allowing path outside configured roots (permissive mode)");
                Ok(resolved)
            }
            SecurityMode::Warn => {
                warn!(path = %resolved.display(), base = %self.base_dir.display(), "path outside configured roots");
                Ok(resolved)
            }
            SecurityMode::Strict => Err(OxError::PathDenied {
                path: resolved,
                base: self.base_dir.clone(),
                allowed: self.allowed_dirs.clone(),
            }),
        }
    }

    /// Same containment test as [`resolve`], without failing.
    pub fn is_allowed(&self, path: &Path) -> bool {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        };
        match normalize_lexically(&absolute) {
            Some(normalized) => {
                let resolved = std::fs::canonicalize(&normalized).unwrap_or(normalized);
                self.contains(&resolved)
            }
            None => false,
        }
    }

    fn contains(&self, resolved: &Path) -> bool {
        resolved.starts_with(&self.base_dir)
            || self.allowed_dirs.iter().any(|dir| resolved.starts_with(dir))
    }
}

fn canonical_or_given(path: PathBuf) -> PathBuf {
    std::fs::canonicalize(&path).unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn gate(root: &TempDir, mode: SecurityMode) -> PathGate {
        PathGate::new(root.path(), mode)
    }

    #[test]
    fn resolves_relative_inside_base() {
        let root = TempDir::new().unwrap();
        std::fs::write(root.path().join("data.csv"), "a,b").unwrap();
        let gate = gate(&root, SecurityMode::Strict);
        let resolved = gate.resolve(Path::new("data.csv")).unwrap();
        assert!(resolved.ends_with("data.csv"));
        assert!(resolved.is_absolute());
    }

    #[test]
    fn missing_target_is_not_found() {
        let root = TempDir::new().unwrap();
        let gate = gate(&root, SecurityMode::Strict);
        let err = gate.resolve(Path::new("ghost.txt")).unwrap_err();
        assert!(matches!(err, OxError::NotFound { .. }));
    }

    #[test]
    fn escape_past_root_is_traversal() {
        let root = TempDir::new().unwrap();
        let gate = gate(&root, SecurityMode::Strict);
        let err = gate.resolve(Path::new("/../../../etc/passwd")).unwrap_err();
        assert!(matches!(err, OxError::Traversal { .. }));
    }

    #[test]
    fn outside_base_denied_in_strict_mode() {
        let root = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();
        std::fs::write(other.path().join("secret.txt"), "x").unwrap();
        let gate = gate(&root, SecurityMode::Strict);
        let err = gate.resolve(&other.path().join("secret.txt")).unwrap_err();
        match err {
            OxError::PathDenied { base, .. } => {
                assert_eq!(base, std::fs::canonicalize(root.path()).unwrap());
            }
            other => panic!("expected PathDenied, got {other:?}"),
        }
    }

    #[test]
    fn outside_base_allowed_in_permissive_mode() {
        let root = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();
        std::fs::write(other.path().join("notes.txt"), "x").unwrap();
        let gate = gate(&root, SecurityMode::Permissive);
        assert!(gate.resolve(&other.path().join("notes.txt")).is_ok());
    }

    #[test]
    fn allow_dir_extends_the_roots() {
        let root = TempDir::new().unwrap();
        let extra = TempDir::new().unwrap();
        std::fs::write(extra.path().join("ok.txt"), "x").unwrap();
        let mut gate = gate(&root, SecurityMode::Strict);
        gate.allow_dir(extra.path());
        assert!(gate.resolve(&extra.path().join("ok.txt")).is_ok());
        assert!(gate.is_allowed(&extra.path().join("ok.txt")));
    }

    #[test]
    fn allow_file_skips_blanks_and_comments() {
        let root = TempDir::new().unwrap();
        let extra = TempDir::new().unwrap();
        std::fs::write(extra.path().join("ok.txt"), "x").unwrap();
        let list = root.path().join("allowed.txt");
        std::fs::write(
            &list,
            format!("# comment\n\n{}\n", extra.path().display()),
        )
        .unwrap();

        let mut gate = gate(&root, SecurityMode::Strict);
        gate.allow_dirs_from_file(&list).unwrap();
        assert!(gate.resolve(&extra.path().join("ok.txt")).is_ok());
    }

    #[test]
    fn dot_dot_within_base_is_fine() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir(root.path().join("sub")).unwrap();
        std::fs::write(root.path().join("top.txt"), "x").unwrap();
        let gate = gate(&root, SecurityMode::Strict);
        let resolved = gate.resolve(Path::new("sub/../top.txt")).unwrap();
        assert!(resolved.ends_with("top.txt"));
    }
}
