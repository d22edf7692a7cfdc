//! Receipt processing pipeline.
//!
//! Sequences acquisition, normalization, OCR and text assembly for one
//! `process_receipt` request and reports the outcome to the requesting
//! session: exactly one `finish` on success or exactly one `error` on failure.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use tracing::{debug, info, warn};

use crate::acquire::{Acquirer, ImageSource};
use crate::assemble::assemble_text;
use crate::error::ReceiptError;
use crate::normalize::Normalizer;
use crate::ocr::SharedEngine;
use crate::protocol::{ProcessRequest, ServerEvent};
use crate::session::SessionRegistry;

const MSG_DOWNLOADING: &str = "Downloading receipt image...";
const MSG_READING: &str = "Reading receipt text (OCR)...";

/// Pipeline stage of a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Acquiring,
    Normalizing,
    Recognizing,
    Assembling,
    Done,
    Errored,
}

struct StageTracker<'a> {
    sid: &'a str,
    current: Stage,
}

impl<'a> StageTracker<'a> {
    fn new(sid: &'a str) -> Self {
        Self {
            sid,
            current: Stage::Idle,
        }
    }

    fn enter(&mut self, next: Stage) {
        debug!(sid = %self.sid, "stage {:?} -> {:?}", self.current, next);
        self.current = next;
    }
}

/// Shared pipeline context, built once at startup.
pub struct Orchestrator {
    acquirer: Acquirer,
    normalizer: Normalizer,
    engine: SharedEngine,
    sessions: SessionRegistry,
}

impl Orchestrator {
    pub fn new(
        acquirer: Acquirer,
        normalizer: Normalizer,
        engine: SharedEngine,
        sessions: SessionRegistry,
    ) -> Self {
        Self {
            acquirer,
            normalizer,
            engine,
            sessions,
        }
    }

    /// Process one request and notify the session. Never fails or panics outward.
    pub async fn handle(&self, sid: &str, request: ProcessRequest) {
        let mut stages = StageTracker::new(sid);

        let outcome = AssertUnwindSafe(self.run(sid, request, &mut stages))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(anyhow::anyhow!("receipt pipeline panicked: {}", detail).into())
            });

        match outcome {
            Ok(raw_text) => {
                stages.enter(Stage::Done);
                info!(sid = %sid, "receipt processed ({} chars)", raw_text.len());
                self.emit(sid, ServerEvent::finish(raw_text)).await;
            }
            Err(err) => {
                warn!(sid = %sid, stage = ?stages.current, kind = ?err.kind(), "receipt processing failed: {}", err);
                stages.enter(Stage::Errored);
                self.report(sid, &err).await;
            }
        }
    }

    /// Send a single `error` event for a request that could not be processed.
    pub async fn report(&self, sid: &str, err: &ReceiptError) {
        self.emit(sid, ServerEvent::error(err)).await;
    }

    async fn run(
        &self,
        sid: &str,
        request: ProcessRequest,
        stages: &mut StageTracker<'_>,
    ) -> Result<String, ReceiptError> {
        stages.enter(Stage::Acquiring);
        let source = ImageSource::from_request(&request)?;
        if let ImageSource::Remote(url) = &source {
            debug!(sid = %sid, "resolved image url {}", self.acquirer.resolve(url));
            self.emit(sid, ServerEvent::status(MSG_DOWNLOADING)).await;
        }
        let bytes = self.acquirer.acquire(&source).await?;

        stages.enter(Stage::Normalizing);
        let image = self.normalizer.normalize(bytes).await?;
        debug!(sid = %sid, "normalized {}x{} image at {:?}", image.width, image.height, image.path());

        self.emit(sid, ServerEvent::status(MSG_READING)).await;

        stages.enter(Stage::Recognizing);
        let lines = self.engine.recognize(image.path()).await?;
        if lines.is_empty() {
            return Err(ReceiptError::NoTextDetected);
        }

        stages.enter(Stage::Assembling);
        let raw_text = assemble_text(&lines);
        if raw_text.is_empty() {
            return Err(ReceiptError::NoTextDetected);
        }

        Ok(raw_text)
    }

    /// Emit an event and yield so the writer task can flush it.
    async fn emit(&self, sid: &str, event: ServerEvent) {
        if !self.sessions.send_to(sid, event).await {
            debug!(sid = %sid, "session closed before event could be delivered");
        }
        tokio::task::yield_now().await;
    }
}
