//! Default key location for the invoking user.

use keymod_core::{KeymodConfig, KeymodResult};
use std::path::{Path, PathBuf};

/// Directory components below the home directory that hold the key.
pub const KEY_DIR: [&str; 3] = [".ecryptfs", "pki", "openssl"];
pub const KEY_FILE_NAME: &str = "key.pem";

/// Paths computed once at module `init` and offered as suggested node values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultPaths {
    pub key_dir: PathBuf,
    pub key_file: PathBuf,
}

impl DefaultPaths {
    /// `<home>/.ecryptfs/pki/openssl/key.pem`.
    pub fn for_home(home: &Path) -> Self {
        let key_dir = KEY_DIR.iter().fold(home.to_path_buf(), |dir, part| dir.join(part));
        let key_file = key_dir.join(KEY_FILE_NAME);
        Self { key_dir, key_file }
    }

    /// Honour `[openssl] key_path` when set, otherwise derive from the home directory.
    pub fn from_config(config: &KeymodConfig) -> KeymodResult<Self> {
        if let Some(path) = &config.openssl.key_path {
            let key_file = PathBuf::from(path);
            let key_dir = key_file
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default();
            return Ok(Self { key_dir, key_file });
        }
        Ok(Self::for_home(&config.home_dir()?))
    }

    pub fn key_file_string(&self) -> String {
        self.key_file.to_string_lossy().into_owned()
    }
}
