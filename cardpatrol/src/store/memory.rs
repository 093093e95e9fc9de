use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::Configurator;
use crate::Result;

/// In-process document. Clones share the same contents, so one handle can be
/// given to the patrol and another kept to inspect what it wrote.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    name: String,
    data: Arc<Mutex<Vec<u8>>>,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            data: Arc::new(Mutex::new(data.into())),
        }
    }

    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Configurator for MemoryStore {
    async fn read(&self) -> Result<Vec<u8>> {
        Ok(self.contents())
    }

    async fn write(&self, data: &[u8]) -> Result<()> {
        *self.data.lock().unwrap_or_else(|e| e.into_inner()) = data.to_vec();
        Ok(())
    }

    fn location(&self) -> String {
        format!("memory://{}", self.name)
    }
}
