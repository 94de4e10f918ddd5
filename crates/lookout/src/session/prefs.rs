//! Best-effort persistence of the operator's open sessions.
//!
//! Nothing here returns an error to the caller: an unreadable or unwritable
//! state directory just means the engine starts from defaults next time.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::DEFAULT_SESSION;

const PREFS_FILE: &str = "sessions.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPrefs {
    pub active: String,
    pub joined: Vec<String>,
}

impl Default for SessionPrefs {
    fn default() -> Self {
        Self {
            active: DEFAULT_SESSION.to_string(),
            joined: vec![DEFAULT_SESSION.to_string()],
        }
    }
}

impl SessionPrefs {
    pub fn path_in(state_dir: &Path) -> PathBuf {
        state_dir.join(PREFS_FILE)
    }

    /// Load from `state_dir`, falling back to defaults on any failure.
    pub fn load(state_dir: &Path) -> Self {
        let path = Self::path_in(state_dir);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no saved sessions");
                return Self::default();
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read saved sessions");
                return Self::default();
            }
        };
        match serde_json::from_str(&contents) {
            Ok(prefs) => prefs,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring corrupt saved sessions");
                Self::default()
            }
        }
    }

    /// Write atomically (temp file + rename). Failures are logged.
    pub fn save(&self, state_dir: &Path) {
        let path = Self::path_in(state_dir);
        if let Err(e) = write_atomic(&path, self) {
            warn!(path = %path.display(), error = %e, "failed to save sessions");
        }
    }
}

fn write_atomic(path: &Path, prefs: &SessionPrefs) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let payload = serde_json::to_vec_pretty(prefs)?;
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, payload)?;
    fs::rename(&tmp_path, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let prefs = SessionPrefs {
            active: "alpha".into(),
            joined: vec!["default".into(), "alpha".into()],
        };
        prefs.save(dir.path());
        assert!(!dir.path().join("sessions.tmp").exists());
        assert_eq!(SessionPrefs::load(dir.path()), prefs);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(SessionPrefs::load(dir.path()), SessionPrefs::default());
    }

    #[test]
    fn test_corrupt_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(SessionPrefs::path_in(dir.path()), "{not json").unwrap();
        assert_eq!(SessionPrefs::load(dir.path()), SessionPrefs::default());
    }

    #[test]
    fn test_unwritable_dir_does_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, "x").unwrap();
        // state dir path runs through a regular file
        SessionPrefs::default().save(&blocker.join("nested"));
        assert_eq!(
            SessionPrefs::load(&blocker.join("nested")),
            SessionPrefs::default()
        );
    }

    #[test]
    fn test_write_atomic_surfaces_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, "x").unwrap();
        let path = SessionPrefs::path_in(&blocker.join("nested"));
        let err = write_atomic(&path, &SessionPrefs::default()).unwrap_err();
        assert_ne!(err.kind(), std::io::ErrorKind::NotFound);
        assert!(!path.with_extension("tmp").exists());

        let path = SessionPrefs::path_in(dir.path());
        write_atomic(&path, &SessionPrefs::default()).unwrap();
        assert!(path.exists());
    }
}
