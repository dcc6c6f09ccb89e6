use serde::{Deserialize, Serialize};
use std::{fs, io, path::PathBuf};

use crate::error::{CoreResult, DataChatError};

#[derive(Debug, Serialize, Deserialize)]
struct Stored {
    redis_key: String,
}

/// On-disk home of the dataset key between CLI runs.
#[derive(Debug, Clone)]
pub struct KeyFile {
    path: PathBuf,
}

impl KeyFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// The stored key, or `None` if the file is absent or holds an empty key.
    pub fn load(&self) -> CoreResult<Option<String>> {
        let bytes = match fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let stored: Stored =
            serde_json::from_slice(&bytes).map_err(|e| DataChatError::Other(e.into()))?;
        Ok(Some(stored.redis_key).filter(|k| !k.trim().is_empty()))
    }

    pub fn save(&self, key: &str) -> CoreResult<()> {
        if let Some(dir) = self.path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir)?;
        }
        let body = serde_json::to_vec(&Stored {
            redis_key: key.to_string(),
        })
        .map_err(|e| DataChatError::Other(e.into()))?;
        fs::write(&self.path, body)?;
        tracing::debug!(path = %self.path.display(), "dataset key saved");
        Ok(())
    }

    pub fn clear(&self) -> CoreResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn save_load_clear() {
        let dir = tempdir().unwrap();
        let kf = KeyFile::new(dir.path().join("nested/key.json"));
        assert_eq!(kf.load().unwrap(), None);

        kf.save("key-42").unwrap();
        assert_eq!(kf.load().unwrap().as_deref(), Some("key-42"));

        kf.clear().unwrap();
        assert_eq!(kf.load().unwrap(), None);
        kf.clear().unwrap();
    }

    #[test]
    fn empty_key_reads_as_none() {
        let dir = tempdir().unwrap();
        let kf = KeyFile::new(dir.path().join("key.json"));
        kf.save("").unwrap();
        assert_eq!(kf.load().unwrap(), None);
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("key.json");
        fs::write(&path, "{not json").unwrap();
        let err = KeyFile::new(&path).load().unwrap_err();
        assert!(matches!(err, DataChatError::Other(_)));
    }
}
