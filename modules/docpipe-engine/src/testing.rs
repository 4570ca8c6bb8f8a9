// Test doubles for the engine seam. MockEngine returns canned outcomes and
// records every invocation, so dispatch logic can be exercised without a
// real converter.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::engine::{Conversion, DocumentEngine, EngineError, EngineRequest};

enum MockOutcome {
    Succeed(Conversion),
    Fail(String),
}

pub struct MockEngine {
    outcome: MockOutcome,
    invocations: AtomicUsize,
    seen_extensions: Mutex<Vec<String>>,
}

impl MockEngine {
    /// Succeeds with a fixed single-page PDF conversion.
    pub fn succeeding() -> Self {
        Self::with_conversion(Conversion {
            text: "Mock processed content".to_string(),
            markdown: "Mock processed content".to_string(),
            structured_data: None,
            pages: 1,
            format: "pdf".to_string(),
        })
    }

    pub fn with_conversion(conversion: Conversion) -> Self {
        Self {
            outcome: MockOutcome::Succeed(conversion),
            invocations: AtomicUsize::new(0),
            seen_extensions: Mutex::new(Vec::new()),
        }
    }

    /// Fails every conversion with a parse error carrying `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            outcome: MockOutcome::Fail(message.into()),
            invocations: AtomicUsize::new(0),
            seen_extensions: Mutex::new(Vec::new()),
        }
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    pub fn seen_extensions(&self) -> Vec<String> {
        self.seen_extensions.lock().unwrap().clone()
    }
}

impl DocumentEngine for MockEngine {
    fn convert(&self, request: &EngineRequest) -> Result<Conversion, EngineError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        self.seen_extensions
            .lock()
            .unwrap()
            .push(request.extension.clone());
        match &self.outcome {
            MockOutcome::Succeed(conversion) => Ok(conversion.clone()),
            MockOutcome::Fail(message) => Err(EngineError::Parse(message.clone())),
        }
    }
}
