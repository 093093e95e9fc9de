use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use async_trait::async_trait;

use super::Configurator;
use crate::{Error, Result};

/// A document stored as a plain file.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_owned(),
        }
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl Configurator for FileStore {
    async fn read(&self) -> Result<Vec<u8>> {
        match tokio::fs::read(&self.path).await {
            Ok(data) => Ok(data),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(Error::store(self.location(), err)),
        }
    }

    async fn write(&self, data: &[u8]) -> Result<()> {
        // Rename keeps readers from ever observing a half-written document.
        let staging = self.staging_path();
        tokio::fs::write(&staging, data)
            .await
            .map_err(|err| Error::store(self.location(), err))?;
        tokio::fs::rename(&staging, &self.path)
            .await
            .map_err(|err| Error::store(self.location(), err))?;
        tracing::debug!(location = %self.location(), bytes = data.len(), "wrote document");
        Ok(())
    }

    fn location(&self) -> String {
        format!("file://{}", self.path.display())
    }
}
