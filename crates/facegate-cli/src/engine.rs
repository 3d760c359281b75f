use facegate_core::{
    EnrolledIdentity, FaceEngine, FacePosition, Identification, ModelLoader, Outcome, Threshold,
    Verification,
};
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Readiness report from the engine thread.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub ready: bool,
    pub load_attempts: usize,
    /// Why the last load failed, if it did.
    pub error: Option<String>,
    pub recent_matches: Vec<String>,
}

/// Messages sent from callers to the engine thread.
enum EngineRequest {
    Status {
        reply: oneshot::Sender<EngineStatus>,
    },
    Verify {
        reference: PathBuf,
        probe: PathBuf,
        threshold: Threshold,
        reply: oneshot::Sender<Outcome<Verification>>,
    },
    Identify {
        probe: PathBuf,
        gallery: Vec<EnrolledIdentity>,
        threshold: Threshold,
        reply: oneshot::Sender<Outcome<Identification>>,
    },
    Track {
        frame: PathBuf,
        reply: oneshot::Sender<Outcome<FacePosition>>,
    },
}

/// Clone-safe handle to the engine thread.
///
/// Every request is queued and served in order by the single thread that
/// owns the [`FaceEngine`], so frame-rate tracking and operator-triggered
/// verification never run concurrently.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Attempt model loading (if not loaded yet) and report readiness.
    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        self.request(|reply| EngineRequest::Status { reply }).await
    }

    pub async fn verify(
        &self,
        reference: PathBuf,
        probe: PathBuf,
        threshold: Threshold,
    ) -> Result<Outcome<Verification>, EngineError> {
        self.request(|reply| EngineRequest::Verify {
            reference,
            probe,
            threshold,
            reply,
        })
        .await
    }

    pub async fn identify(
        &self,
        probe: PathBuf,
        gallery: Vec<EnrolledIdentity>,
        threshold: Threshold,
    ) -> Result<Outcome<Identification>, EngineError> {
        self.request(|reply| EngineRequest::Identify {
            probe,
            gallery,
            threshold,
            reply,
        })
        .await
    }

    pub async fn track(&self, frame: PathBuf) -> Result<Outcome<FacePosition>, EngineError> {
        self.request(|reply| EngineRequest::Track { frame, reply }).await
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Models are not loaded here: the engine loads them on the first request
/// and keeps retrying on later requests until a load succeeds.
pub fn spawn_engine<L>(loader: L, queue_depth: usize) -> Result<EngineHandle, EngineError>
where
    L: ModelLoader + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(queue_depth.max(1));
    let mut engine = FaceEngine::new(loader);

    std::thread::Builder::new()
        .name("facegate-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Status { reply } => {
                        let _ = reply.send(status(&mut engine));
                    }
                    EngineRequest::Verify {
                        reference,
                        probe,
                        threshold,
                        reply,
                    } => {
                        let _ = reply.send(engine.verify_paths(&reference, &probe, threshold));
                    }
                    EngineRequest::Identify {
                        probe,
                        gallery,
                        threshold,
                        reply,
                    } => {
                        let _ = reply.send(engine.identify(&probe, &gallery, threshold));
                    }
                    EngineRequest::Track { frame, reply } => {
                        let _ = reply.send(engine.track_path(&frame));
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

fn status<L: ModelLoader>(engine: &mut FaceEngine<L>) -> EngineStatus {
    let error = engine.ensure_ready().err().map(|e| e.to_string());
    EngineStatus {
        ready: engine.is_ready(),
        load_attempts: engine.load_attempts(),
        error,
        recent_matches: engine.recent_matches().into_iter().map(String::from).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{scratch_dir, write_face, Scripted, Unavailable};

    #[tokio::test]
    async fn test_status_reports_unavailable_engine() {
        let handle = spawn_engine(Unavailable, 4).unwrap();
        let status = handle.status().await.unwrap();
        assert!(!status.ready);
        assert_eq!(status.load_attempts, 1);
        assert!(status.error.unwrap().contains("not found"));

        let again = handle.status().await.unwrap();
        assert_eq!(again.load_attempts, 2);
    }

    #[tokio::test]
    async fn test_requests_fail_closed_when_unavailable() {
        let handle = spawn_engine(Unavailable, 1).unwrap();
        let verify = handle
            .verify("/a.png".into(), "/b.png".into(), Threshold::default())
            .await
            .unwrap();
        assert!(verify.is_not_ready());
        assert!(!verify.accepted());

        let identify = handle
            .identify("/a.png".into(), Vec::new(), Threshold::default())
            .await
            .unwrap();
        assert!(identify.matched().is_none());
        assert!(identify.is_not_ready());

        let track = handle.track("/frame.png".into()).await.unwrap();
        assert!(track.is_not_ready());
    }

    #[tokio::test]
    async fn test_ready_engine_serves_every_request() {
        let dir = scratch_dir("worker");
        let alice = write_face(&dir, "alice", 1);
        let bob = write_face(&dir, "bob", 2);
        let empty = write_face(&dir, "empty", 0);
        let handle = spawn_engine(Scripted, 2).unwrap();

        let status = handle.status().await.unwrap();
        assert!(status.ready);
        assert_eq!(status.load_attempts, 1);
        assert!(status.error.is_none());

        let same = handle
            .verify(alice.clone(), alice.clone(), Threshold::default())
            .await
            .unwrap();
        assert!(same.accepted());
        let other = handle
            .verify(alice.clone(), bob.clone(), Threshold::default())
            .await
            .unwrap();
        assert!(!other.accepted());
        assert!(other.ready().is_some());

        let gallery = vec![
            EnrolledIdentity {
                key: "W001".into(),
                display_name: "Bob".into(),
                image_path: bob.clone(),
            },
            EnrolledIdentity {
                key: "W002".into(),
                display_name: "Alice".into(),
                image_path: alice.clone(),
            },
        ];
        let found = handle
            .identify(alice.clone(), gallery, Threshold::default())
            .await
            .unwrap();
        assert_eq!(found.matched().unwrap().key, "W002");

        let status = handle.status().await.unwrap();
        assert_eq!(status.recent_matches, vec!["W002".to_string()]);
        assert_eq!(status.load_attempts, 1);

        let present = handle.track(alice).await.unwrap().into_ready().unwrap();
        assert!(present.present);
        assert_eq!((present.image_width, present.image_height), (120, 120));
        let absent = handle.track(empty).await.unwrap().into_ready().unwrap();
        assert!(!absent.present);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_cloned_handles_share_one_engine() {
        let handle = spawn_engine(Unavailable, 1).unwrap();
        let other = handle.clone();
        handle.status().await.unwrap();
        let status = other.status().await.unwrap();
        assert_eq!(status.load_attempts, 2);
    }
}
