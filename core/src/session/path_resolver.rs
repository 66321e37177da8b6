//! PathResolver capability interface (spec.md §1, §9): resolves repo root,
//! feature directory, spec id, and tasks path from the working directory.
//! Parsing of `tasks.md` and per-feature path discovery are out of scope
//! for this crate; the core only depends on the resolved paths.

use std::path::{Path, PathBuf};

/// Error surfaced by a path resolver implementation.
#[derive(Debug, thiserror::Error)]
#[error("path resolution failed: {0}")]
pub struct PathResolverError(pub String);

impl PathResolverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Discovers the repository layout a run operates against (spec.md §2's
/// `PathResolver` stub).
pub trait PathResolver: Send + Sync {
    fn repo_root(&self) -> Result<PathBuf, PathResolverError>;
    fn spec_id(&self) -> Result<String, PathResolverError>;
    fn feature_dir(&self) -> Result<PathBuf, PathResolverError>;
    fn tasks_path(&self) -> Result<PathBuf, PathResolverError> {
        Ok(self.feature_dir()?.join("tasks.md"))
    }
}

/// A resolver backed by values already known to the caller — the common
/// case once the out-of-scope CLI has done its own discovery and just needs
/// to hand the core a fixed layout.
pub struct StaticPathResolver {
    repo_root: PathBuf,
    spec_id: String,
    feature_dir: PathBuf,
}

impl StaticPathResolver {
    pub fn new(
        repo_root: impl Into<PathBuf>,
        spec_id: impl Into<String>,
        feature_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            repo_root: repo_root.into(),
            spec_id: spec_id.into(),
            feature_dir: feature_dir.into(),
        }
    }

    /// Convenience constructor assuming the conventional `specs/<spec_id>/`
    /// layout (spec.md §6).
    pub fn conventional(repo_root: impl AsRef<Path>, spec_id: impl Into<String>) -> Self {
        let repo_root = repo_root.as_ref().to_path_buf();
        let spec_id = spec_id.into();
        let feature_dir = repo_root.join("specs").join(&spec_id);
        Self {
            repo_root,
            spec_id,
            feature_dir,
        }
    }
}

impl PathResolver for StaticPathResolver {
    fn repo_root(&self) -> Result<PathBuf, PathResolverError> {
        Ok(self.repo_root.clone())
    }

    fn spec_id(&self) -> Result<String, PathResolverError> {
        Ok(self.spec_id.clone())
    }

    fn feature_dir(&self) -> Result<PathBuf, PathResolverError> {
        Ok(self.feature_dir.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conventional_layout_derives_tasks_path() {
        let resolver = StaticPathResolver::conventional("/repo", "042-feature");
        assert_eq!(resolver.repo_root().unwrap(), PathBuf::from("/repo"));
        assert_eq!(resolver.spec_id().unwrap(), "042-feature");
        assert_eq!(
            resolver.feature_dir().unwrap(),
            PathBuf::from("/repo/specs/042-feature")
        );
        assert_eq!(
            resolver.tasks_path().unwrap(),
            PathBuf::from("/repo/specs/042-feature/tasks.md")
        );
    }
}
