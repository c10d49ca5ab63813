// JSON file legend store - persists group/channel visibility between sessions
use crate::application::legend_store::LegendStore;
use crate::domain::legend::LegendState;
use anyhow::Context;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct JsonFileLegendStore {
    path: PathBuf,
}

impl JsonFileLegendStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl LegendStore for JsonFileLegendStore {
    async fn load(&self) -> anyhow::Result<Option<LegendState>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("reading legend state from {}", self.path.display()))
            }
        };
        let legend = serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing legend state in {}", self.path.display()))?;
        Ok(Some(legend))
    }

    async fn save(&self, legend: &LegendState) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let json = serde_json::to_vec_pretty(legend)?;
        // The target is only ever replaced by a complete file.
        let staging = self.path.with_extension("json.tmp");
        tokio::fs::write(&staging, json)
            .await
            .with_context(|| format!("writing {}", staging.display()))?;
        tokio::fs::rename(&staging, &self.path)
            .await
            .with_context(|| format!("replacing {}", self.path.display()))?;
        tracing::debug!("Saved legend state to {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::series::SeriesRegistry;

    #[tokio::test]
    async fn test_missing_file_loads_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileLegendStore::new(dir.path().join("legend.json"));

        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileLegendStore::new(dir.path().join("nested").join("legend.json"));
        let registry = SeriesRegistry::default_vitals();
        let mut legend = LegendState::defaults(&registry);
        legend.set_group_visible(&registry, "oximeter", false).unwrap();

        store.save(&legend).await.unwrap();
        let loaded = store.load().await.unwrap();

        assert_eq!(loaded, Some(legend));
    }

    #[tokio::test]
    async fn test_saved_shape_has_groups_and_channels() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileLegendStore::new(dir.path().join("legend.json"));
        let mut legend = LegendState::default();
        legend.set_channel_visible("SDNN", false);

        store.save(&legend).await.unwrap();
        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(store.path()).unwrap()).unwrap();

        assert_eq!(raw["channels"]["SDNN"], serde_json::Value::Bool(false));
        assert!(raw["groups"].is_object());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legend.json");
        std::fs::write(&path, b"{not json").unwrap();

        let result = JsonFileLegendStore::new(path).load().await;

        assert!(result.is_err());
    }
}
