// ── File-backed refresh token store ──
//
// One JSON document holding the single refresh token. Writes go to a
// sibling temp file that is then renamed over the original, so a reader
// never sees a half-written file. The file is re-read on every load so a
// token stored by `hcmqtt authorize` is picked up by a running bridge.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use hcmqtt_api::{CredentialStore, Error};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ConfigError;

const FILE_NAME: &str = "credentials.json";

#[derive(Serialize, Deserialize)]
struct StoredCredentials {
    refresh_token: String,
}

#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    /// Use `dir/credentials.json`, creating `dir` if it does not exist.
    pub fn open(dir: &Path) -> Result<Self, ConfigError> {
        fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        Ok(Self {
            path: dir.join(FILE_NAME),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_atomically(&self, contents: &[u8]) -> io::Result<()> {
        let tmp = self.path.with_extension("json.tmp");
        {
            let mut file = private_file(&tmp)?;
            file.write_all(contents)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)
    }
}

#[cfg(unix)]
fn private_file(path: &Path) -> io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn private_file(path: &Path) -> io::Result<fs::File> {
    fs::File::create(path)
}

impl CredentialStore for FileCredentialStore {
    fn load_refresh_token(&self) -> Result<Option<SecretString>, Error> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::Credentials(format!(
                    "failed to read {}: {e}",
                    self.path.display()
                )));
            }
        };
        let stored: StoredCredentials = serde_json::from_slice(&raw).map_err(|e| {
            Error::Credentials(format!("corrupt credential file {}: {e}", self.path.display()))
        })?;
        Ok(Some(SecretString::from(stored.refresh_token)))
    }

    fn store_refresh_token(&self, token: &SecretString) -> Result<(), Error> {
        let contents = serde_json::to_vec_pretty(&StoredCredentials {
            refresh_token: token.expose_secret().to_owned(),
        })?;
        self.write_atomically(&contents).map_err(|e| {
            Error::Credentials(format!("failed to write {}: {e}", self.path.display()))
        })?;
        debug!(path = %self.path.display(), "refresh token stored");
        Ok(())
    }
}
