//! Caller context, file sandbox and authorization
//!
//! Authorization itself is opaque to the agent: an [`Authorizer`] answers
//! whether a caller may use the registry-wide management operations. File
//! access is enforced by the caller's [`Sandbox`].

use crate::error::{Error, Result};
use crate::utils::normalize_path;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Identity of whoever invokes an operation
#[derive(Clone, Debug)]
pub struct Caller {
    /// Application bundle name; tasks are owned by the bundle that created them
    pub bundle: String,
    /// Numeric user id
    pub uid: u64,
    /// Directories this caller may read from and write to
    pub sandbox: Sandbox,
}

impl Caller {
    /// Create a caller confined to `sandbox`
    pub fn new(bundle: impl Into<String>, uid: u64, sandbox: Sandbox) -> Self {
        Self {
            bundle: bundle.into(),
            uid,
            sandbox,
        }
    }
}

/// Set of directory roots a caller may touch
#[derive(Clone, Debug, Default)]
pub struct Sandbox {
    /// `None` grants access everywhere
    roots: Option<Vec<PathBuf>>,
}

impl Sandbox {
    /// Sandbox limited to the given roots
    pub fn new<I, P>(roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let roots = roots
            .into_iter()
            .map(|root| {
                let root = root.as_ref();
                std::fs::canonicalize(root).unwrap_or_else(|_| normalize_path(root))
            })
            .collect();
        Self { roots: Some(roots) }
    }

    /// Sandbox without restrictions
    pub fn unrestricted() -> Self {
        Self { roots: None }
    }

    /// Resolve an existing file the caller wants to read
    ///
    /// Fails with `FileAccessDenied` when the file is missing, is not a
    /// regular file, or resolves outside every root.
    pub fn check_readable(&self, path: &Path) -> Result<PathBuf> {
        let resolved = std::fs::canonicalize(path).map_err(|e| Error::FileAccessDenied {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        if !resolved.is_file() {
            return Err(Error::FileAccessDenied {
                path: path.to_path_buf(),
                reason: "not a regular file".to_string(),
            });
        }
        self.ensure_inside(path, &resolved)?;
        Ok(resolved)
    }

    /// Resolve a destination the caller wants to write
    ///
    /// The file itself may not exist yet; symlinks in an existing parent are
    /// resolved before the containment check.
    pub fn check_writable(&self, path: &Path) -> Result<PathBuf> {
        let normalized = normalize_path(path);
        let resolved = match (normalized.parent(), normalized.file_name()) {
            (Some(parent), Some(name)) => match std::fs::canonicalize(parent) {
                Ok(parent) => parent.join(name),
                Err(_) => normalized.clone(),
            },
            _ => {
                return Err(Error::FileAccessDenied {
                    path: path.to_path_buf(),
                    reason: "path has no file name".to_string(),
                });
            }
        };
        self.ensure_inside(path, &resolved)?;
        Ok(resolved)
    }

    fn ensure_inside(&self, original: &Path, resolved: &Path) -> Result<()> {
        let Some(roots) = &self.roots else {
            return Ok(());
        };
        if roots.iter().any(|root| resolved.starts_with(root)) {
            Ok(())
        } else {
            Err(Error::FileAccessDenied {
                path: original.to_path_buf(),
                reason: "outside the caller's sandbox".to_string(),
            })
        }
    }
}

/// Outcome of an authorization check
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Grant {
    /// Caller may proceed
    Allowed,
    /// Caller lacks the app-level permission (201)
    NoPermission,
    /// Caller is not a system application (202)
    NotSystemApp,
}

impl Grant {
    /// Convert a denial into the matching error
    pub fn into_result(self, operation: &str) -> Result<()> {
        match self {
            Grant::Allowed => Ok(()),
            Grant::NoPermission => Err(Error::PermissionDenied(operation.to_string())),
            Grant::NotSystemApp => Err(Error::NotSystemApp(operation.to_string())),
        }
    }
}

/// Pluggable authorization check for registry management operations
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Decide whether `caller` may run `operation`
    async fn authorize(&self, caller: &Caller, operation: &str) -> Grant;

    /// Whether `caller` may see tasks of other bundles
    async fn is_system(&self, caller: &Caller) -> bool {
        let _ = caller;
        false
    }
}

/// Authorizer that grants everything
#[derive(Clone, Copy, Debug, Default)]
pub struct AllowAll;

#[async_trait]
impl Authorizer for AllowAll {
    async fn authorize(&self, _caller: &Caller, _operation: &str) -> Grant {
        Grant::Allowed
    }
}

/// Authorizer answering from a fixed table of bundles
#[derive(Clone, Debug, Default)]
pub struct StaticAuthorizer {
    /// Bundles holding the management permission
    pub permitted: Vec<String>,
    /// Bundles that are system applications
    pub system: Vec<String>,
}

#[async_trait]
impl Authorizer for StaticAuthorizer {
    async fn authorize(&self, caller: &Caller, operation: &str) -> Grant {
        let grant = if !self.permitted.contains(&caller.bundle) {
            Grant::NoPermission
        } else if !self.system.contains(&caller.bundle) {
            Grant::NotSystemApp
        } else {
            Grant::Allowed
        };
        if grant != Grant::Allowed {
            tracing::warn!(bundle = %caller.bundle, operation, ?grant, "Authorization denied");
        }
        grant
    }

    async fn is_system(&self, caller: &Caller) -> bool {
        self.system.contains(&caller.bundle)
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use tempfile::tempdir;

    #[test]
    fn readable_file_inside_sandbox_is_accepted() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, b"hello").unwrap();

        let sandbox = Sandbox::new([dir.path()]);
        let resolved = sandbox.check_readable(&file).unwrap();
        assert!(resolved.ends_with("a.txt"));
    }

    #[test]
    fn readable_file_outside_sandbox_is_denied() {
        let inside = tempdir().unwrap();
        let outside = tempdir().unwrap();
        let file = outside.path().join("secret.txt");
        std::fs::write(&file, b"x").unwrap();

        let err = Sandbox::new([inside.path()])
            .check_readable(&file)
            .unwrap_err();
        assert_eq!(err.code(), 13400001);
    }

    #[test]
    fn missing_file_is_denied() {
        let dir = tempdir().unwrap();
        let err = Sandbox::unrestricted()
            .check_readable(&dir.path().join("nope"))
            .unwrap_err();
        assert_eq!(err.code(), 13400001);
    }

    #[test]
    fn writable_path_cannot_escape_with_dot_dot() {
        let dir = tempdir().unwrap();
        let sandbox = Sandbox::new([dir.path()]);

        assert!(sandbox.check_writable(&dir.path().join("out.bin")).is_ok());
        let escape = dir.path().join("..").join("escape.bin");
        assert_eq!(sandbox.check_writable(&escape).unwrap_err().code(), 13400001);
    }

    #[tokio::test]
    async fn static_authorizer_distinguishes_denials() {
        let auth = StaticAuthorizer {
            permitted: vec!["com.app".into(), "com.sys".into()],
            system: vec!["com.sys".into()],
        };
        let caller = |bundle: &str| Caller::new(bundle, 0, Sandbox::unrestricted());

        assert_eq!(auth.authorize(&caller("com.other"), "search").await, Grant::NoPermission);
        assert_eq!(auth.authorize(&caller("com.app"), "search").await, Grant::NotSystemApp);
        assert_eq!(auth.authorize(&caller("com.sys"), "search").await, Grant::Allowed);
        assert_eq!(
            Grant::NotSystemApp.into_result("search").unwrap_err().code(),
            202
        );
    }
}
