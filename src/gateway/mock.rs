use crate::gateway::TextTranslator;
use crate::utils::{Result, TranslatorError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Deterministic translator for tests: returns `[target] text` and counts
/// calls. `hanging()` never resolves, which lets tests hold a job in-flight
/// while they cancel or delete it; `failing_on(text)` errors for that exact
/// source text and translates everything else.
pub struct MockTranslator {
    calls: AtomicUsize,
    hang: bool,
    fail_on: Option<String>,
}

impl MockTranslator {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            hang: false,
            fail_on: None,
        }
    }

    pub fn hanging() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            hang: true,
            fail_on: None,
        }
    }

    pub fn failing_on(text: &str) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            hang: false,
            fail_on: Some(text.to_string()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockTranslator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextTranslator for MockTranslator {
    async fn translate(
        &self,
        text: &str,
        _source_lang: &str,
        target_lang: &str,
        _instructions: &str,
    ) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hang {
            futures::future::pending::<()>().await;
        }
        if self.fail_on.as_deref() == Some(text) {
            return Err(TranslatorError::Api(format!("no translation for {}", text)));
        }
        Ok(format!("[{}] {}", target_lang, text))
    }
}
