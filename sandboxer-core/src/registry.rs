//! Read-through view of the sandboxes that exist right now

use crate::error::{Result, SandboxError};
use crate::runtime::{RuntimeAdapter, SandboxRecord, SandboxStatus};

/// Stateless view over runtime-reported, labelled containers
///
/// Nothing is cached: every query goes back to the runtime.
pub struct Registry<'a, R: ?Sized> {
    runtime: &'a R,
}

impl<'a, R: RuntimeAdapter + ?Sized> Registry<'a, R> {
    pub fn new(runtime: &'a R) -> Self {
        Self { runtime }
    }

    pub async fn get(&self, name: &str) -> Result<Option<SandboxRecord>> {
        self.runtime.inspect(name).await
    }

    pub async fn status(&self, name: &str) -> Result<SandboxStatus> {
        Ok(self
            .get(name)
            .await?
            .map_or(SandboxStatus::Absent, |r| r.status()))
    }

    /// The sandbox `name`, or `NotFound`
    pub async fn require(&self, name: &str) -> Result<SandboxRecord> {
        self.get(name).await?.ok_or_else(|| SandboxError::NotFound {
            name: name.to_string(),
        })
    }

    /// The sandbox `name` if it is running, for an operation that needs it
    /// running
    pub async fn require_running(
        &self,
        name: &str,
        operation: &'static str,
    ) -> Result<SandboxRecord> {
        let record = self.require(name).await?;
        if !record.is_running() {
            return Err(SandboxError::NotRunning {
                name: name.to_string(),
                operation,
            });
        }
        Ok(record)
    }

    /// All managed sandboxes sorted by name
    pub async fn list(&self, running_only: bool) -> Result<Vec<SandboxRecord>> {
        let mut records = self.runtime.list_managed().await?;
        if running_only {
            records.retain(SandboxRecord::is_running);
        }
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }
}
