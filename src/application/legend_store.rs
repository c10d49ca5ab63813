// Repository trait for persisted legend visibility
use crate::domain::legend::LegendState;
use async_trait::async_trait;

#[async_trait]
pub trait LegendStore: Send + Sync {
    /// Saved legend state, or `None` when nothing has been saved yet
    async fn load(&self) -> anyhow::Result<Option<LegendState>>;

    async fn save(&self, legend: &LegendState) -> anyhow::Result<()>;
}
