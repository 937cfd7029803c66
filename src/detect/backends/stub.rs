use anyhow::{anyhow, Result};
use std::collections::VecDeque;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::frame::Frame;

/// One scripted detector response.
#[derive(Clone, Debug)]
pub enum StubResponse {
    Detections(Vec<Detection>),
    Fail(String),
}

/// Scripted backend for tests and feeds without a model.
///
/// Replays queued responses one per frame; once the script is exhausted every
/// frame yields no detections.
#[derive(Default)]
pub struct StubBackend {
    script: VecDeque<StubResponse>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scripted(script: impl IntoIterator<Item = StubResponse>) -> Self {
        Self {
            script: script.into_iter().collect(),
        }
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        match self.script.pop_front() {
            Some(StubResponse::Detections(detections)) => Ok(detections),
            Some(StubResponse::Fail(reason)) => Err(anyhow!("stub detector failure: {}", reason)),
            None => Ok(Vec::new()),
        }
    }
}
