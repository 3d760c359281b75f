use crate::engine::{self, EngineHandle, EngineStatus};
use crate::store::KioskStore;
use anyhow::Result;
use facegate_core::{
    image_io, EnrolledIdentity, Identification, ModelLoader, Outcome, Threshold, Verification,
};
use serde::Serialize;

/// Database, resolved threshold and a running engine.
pub struct Kiosk {
    pub store: KioskStore,
    pub handle: EngineHandle,
    pub threshold: Threshold,
    pub status: EngineStatus,
}

/// Result of a claimed-identity check, as printed and logged.
#[derive(Debug, Serialize)]
pub struct CheckReport {
    pub work_id: String,
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome<Verification>>,
}

impl CheckReport {
    fn rejected(work_id: &str, reason: &'static str) -> Self {
        Self {
            work_id: work_id.to_string(),
            accepted: false,
            reason: Some(reason),
            outcome: None,
        }
    }
}

impl Kiosk {
    /// Start the engine over `loader` and probe it once. An unavailable
    /// engine is reported but not fatal: every request is then refused.
    pub async fn start<L>(
        store: KioskStore,
        threshold: Threshold,
        loader: L,
        queue_depth: usize,
    ) -> Result<Self>
    where
        L: ModelLoader + 'static,
    {
        let handle = engine::spawn_engine(loader, queue_depth)?;

        let status = handle.status().await?;
        if !status.ready {
            tracing::error!(
                error = status.error.as_deref().unwrap_or("unknown"),
                "engine unavailable; every request will be refused"
            );
        }

        Ok(Self {
            store,
            handle,
            threshold,
            status,
        })
    }

    /// Claimed-identity check: verify `probe` against the work id's reference
    /// image and log the result either way.
    pub async fn check(&self, work_id: &str, probe: &str) -> Result<CheckReport> {
        let report = match self.store.identity(work_id).await? {
            None => {
                tracing::warn!(work_id, "unknown work id");
                CheckReport::rejected(work_id, "unknown work id")
            }
            Some(identity) if !identity.image_path.is_file() => {
                tracing::warn!(
                    work_id,
                    path = %identity.image_path.display(),
                    "reference image missing"
                );
                CheckReport::rejected(work_id, "reference image missing")
            }
            Some(identity) => {
                let outcome = self
                    .handle
                    .verify(identity.image_path, image_io::resolve_path(probe), self.threshold)
                    .await?;
                CheckReport {
                    work_id: work_id.to_string(),
                    accepted: outcome.accepted(),
                    reason: None,
                    outcome: Some(outcome),
                }
            }
        };

        self.store.log_access(work_id, report.accepted).await?;
        Ok(report)
    }

    /// 1:N search for one probe. A match is logged as a passed access.
    pub async fn identify(
        &self,
        gallery: &[EnrolledIdentity],
        probe: &str,
    ) -> Result<Outcome<Identification>> {
        let outcome = self
            .handle
            .identify(image_io::resolve_path(probe), gallery.to_vec(), self.threshold)
            .await?;
        if let Some(m) = outcome.matched() {
            self.store.log_access(&m.key, true).await?;
        }
        Ok(outcome)
    }
}
