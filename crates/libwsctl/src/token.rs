//! Shared bearer token for programmatic API callers.
//!
//! The token lives in a single owner-only file. Nothing is cached in memory:
//! every check re-reads the file, so a regeneration (by this process or by
//! an operator) invalidates the previous token immediately.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rand::rngs::OsRng;
use subtle::ConstantTimeEq;
use tracing::info;

use crate::error::TaskResult;
use crate::store::{ensure_private_dir, write_private, write_private_new};

/// Random bytes per token (encodes to 64 URL-safe characters).
const TOKEN_BYTES: usize = 48;

#[derive(Debug, Clone)]
pub struct TokenAuthority {
    path: PathBuf,
}

impl TokenAuthority {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Return the current token, creating one if none is stored yet.
    pub fn get_or_create(&self) -> TaskResult<String> {
        if let Some(token) = self.read_current()? {
            return Ok(token);
        }

        self.ensure_parent()?;
        let token = generate_token();
        match write_private_new(&self.path, token.as_bytes()) {
            Ok(()) => {
                info!(path = %self.path.display(), "api token created");
                Ok(token)
            }
            // Another request created it first; use theirs.
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => match self.read_current()? {
                Some(existing) => Ok(existing),
                None => self.regenerate(),
            },
            Err(err) => Err(err.into()),
        }
    }

    /// Replace the stored token. The old value stops verifying immediately.
    pub fn regenerate(&self) -> TaskResult<String> {
        self.ensure_parent()?;
        let token = generate_token();
        write_private(&self.path, token.as_bytes())?;
        info!(path = %self.path.display(), "api token regenerated");
        Ok(token)
    }

    /// Constant-time comparison of `candidate` against the stored token.
    pub fn verify(&self, candidate: &str) -> bool {
        match self.read_current() {
            Ok(Some(current)) => candidate.as_bytes().ct_eq(current.as_bytes()).into(),
            _ => false,
        }
    }

    fn read_current(&self) -> io::Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => {
                let token = raw.trim();
                if token.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(token.to_string()))
                }
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn ensure_parent(&self) -> io::Result<()> {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() && !parent.exists() => {
                ensure_private_dir(parent)
            }
            _ => Ok(()),
        }
    }
}

fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_create_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let auth = TokenAuthority::new(dir.path().join("api-token"));

        let first = auth.get_or_create().unwrap();
        let second = auth.get_or_create().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
        assert!(
            first
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        );
    }

    #[test]
    fn verify_matches_only_current_token() {
        let dir = tempfile::tempdir().unwrap();
        let auth = TokenAuthority::new(dir.path().join("api-token"));
        let token = auth.get_or_create().unwrap();

        assert!(auth.verify(&token));
        assert!(!auth.verify(""));
        assert!(!auth.verify("not-the-token"));
        assert!(!auth.verify(&token[..token.len() - 1]));
        assert!(!auth.verify(&format!("{token}x")));
    }

    #[test]
    fn verify_without_token_file_is_false() {
        let dir = tempfile::tempdir().unwrap();
        let auth = TokenAuthority::new(dir.path().join("api-token"));
        assert!(!auth.verify(""));
        assert!(!auth.verify("anything"));
    }

    #[test]
    fn regenerate_invalidates_old_token() {
        let dir = tempfile::tempdir().unwrap();
        let auth = TokenAuthority::new(dir.path().join("api-token"));
        let old = auth.get_or_create().unwrap();

        let new = auth.regenerate().unwrap();
        assert_ne!(old, new);
        assert!(!auth.verify(&old));
        assert!(auth.verify(&new));
        assert_eq!(auth.get_or_create().unwrap(), new);
    }

    #[test]
    fn out_of_band_change_is_observed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("api-token");
        let auth = TokenAuthority::new(&path);
        let token = auth.get_or_create().unwrap();

        fs::write(&path, "rotated-by-operator\n").unwrap();
        assert!(!auth.verify(&token));
        assert!(auth.verify("rotated-by-operator"));
    }

    #[test]
    fn creates_missing_parent() {
        let dir = tempfile::tempdir().unwrap();
        let auth = TokenAuthority::new(dir.path().join("nested/state/api-token"));
        let token = auth.get_or_create().unwrap();
        assert!(auth.verify(&token));
    }

    #[cfg(unix)]
    #[test]
    fn token_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let auth = TokenAuthority::new(dir.path().join("api-token"));
        auth.get_or_create().unwrap();
        let mode = fs::metadata(auth.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        auth.regenerate().unwrap();
        let mode = fs::metadata(auth.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
