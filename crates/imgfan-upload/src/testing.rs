//! Scripted in-process adapter for engine tests.
//!
//! Backends are external collaborators; tests drive the engine with
//! adapters that follow a fixed script instead.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use imgfan_core::domain::{RawUploadResult, ServiceId};
use imgfan_core::errors::UploadError;
use imgfan_core::events::ProgressPhase;
use imgfan_core::ports::{ProgressSink, UploadAdapter, UploadRequest};

/// One scripted attempt outcome.
#[derive(Debug, Clone)]
pub enum AdapterScript {
    /// Settle successfully with this URL.
    Succeed { url: String, delay: Option<Duration> },
    /// Settle with this error.
    Fail { error: UploadError },
    /// Panic mid-attempt.
    Panic,
}

impl AdapterScript {
    pub fn succeed(url: impl Into<String>) -> Self {
        Self::Succeed {
            url: url.into(),
            delay: None,
        }
    }

    pub fn succeed_after(url: impl Into<String>, delay: Duration) -> Self {
        Self::Succeed {
            url: url.into(),
            delay: Some(delay),
        }
    }

    pub const fn fail(error: UploadError) -> Self {
        Self::Fail { error }
    }

    pub const fn panic() -> Self {
        Self::Panic
    }
}

/// Adapter that replays a script, one step per attempt.
///
/// The last step repeats once the script is exhausted, so a single-step
/// adapter behaves uniformly across attempts.
pub struct ScriptedAdapter {
    id: ServiceId,
    steps: Mutex<VecDeque<AdapterScript>>,
}

impl ScriptedAdapter {
    /// Adapter that repeats one outcome forever.
    pub fn new(id: impl Into<ServiceId>, step: AdapterScript) -> Self {
        Self::sequence(id, vec![step])
    }

    /// Adapter that walks the given steps, repeating the last one.
    pub fn sequence(id: impl Into<ServiceId>, steps: Vec<AdapterScript>) -> Self {
        Self {
            id: id.into(),
            steps: Mutex::new(steps.into_iter().collect()),
        }
    }

    fn next_step(&self) -> AdapterScript {
        let mut steps = match self.steps.lock() {
            Ok(steps) => steps,
            Err(poisoned) => poisoned.into_inner(),
        };
        if steps.len() > 1 {
            steps.pop_front().unwrap_or(AdapterScript::Panic)
        } else {
            steps
                .front()
                .cloned()
                .unwrap_or(AdapterScript::Panic)
        }
    }
}

#[async_trait]
impl UploadAdapter for ScriptedAdapter {
    fn service_id(&self) -> ServiceId {
        self.id.clone()
    }

    async fn upload(
        &self,
        _request: &UploadRequest,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<RawUploadResult, UploadError> {
        progress.report(0, ProgressPhase::Preparing, None, None);
        match self.next_step() {
            AdapterScript::Succeed { url, delay } => {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                progress.report(100, ProgressPhase::Complete, None, None);
                Ok(RawUploadResult::with_url(url))
            }
            AdapterScript::Fail { error } => Err(error),
            AdapterScript::Panic => panic!("scripted adapter panic"),
        }
    }
}
