//! Structured extraction of one staged page window.
//!
//! ## Retry Strategy
//!
//! Only an overloaded service (HTTP 503) is worth waiting out: it clears on
//! its own within minutes. The wait doubles from `base` each attempt
//! (20 s → 40 s → 80 s → 160 s with defaults) and there is no wait after the
//! final attempt. Connection failures are handed back to the page loop,
//! which re-stages the window. Everything else means the request itself is
//! wrong and repeating it would fail the same way.

use crate::backend::{GenerateRequest, InferenceBackend, RemoteFile};
use crate::config::{DigitizeConfig, RetryPolicy};
use crate::error::BackendError;
use crate::pipeline::window::TargetOffset;
use crate::schema::Page;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Wait, then try again.
    Retry { after: Duration },
    /// Give up on this page.
    Abort,
    /// Transient failure, but the attempt budget is spent.
    Exhausted,
    /// Connection failure; the page loop decides.
    Escalate,
}

/// Next step after attempt `attempt` (0-based) failed with `err`.
pub fn transition(policy: &RetryPolicy, attempt: u32, err: &BackendError) -> Transition {
    if err.is_connection() {
        Transition::Escalate
    } else if !err.is_transient() {
        Transition::Abort
    } else if attempt + 1 >= policy.max_attempts {
        Transition::Exhausted
    } else {
        Transition::Retry {
            after: policy.delay(attempt),
        }
    }
}

/// Ask the model for the page at `target` in `file` and decode the answer.
///
/// Returns `Ok(None)` when nothing usable came back (empty or undecodable
/// text, a non-retryable API error, or retries spent). Only connection
/// failures are returned as `Err`.
pub async fn extract_page(
    backend: &Arc<dyn InferenceBackend>,
    file: &RemoteFile,
    target: TargetOffset,
    config: &DigitizeConfig,
) -> Result<Option<Page>, BackendError> {
    let request = GenerateRequest {
        model: config.model.clone(),
        prompt: config.prompt_for(target),
        file: file.clone(),
        target,
        response_schema: config.shape.response_schema(),
        max_output_tokens: config.max_output_tokens,
    };
    let policy = &config.extraction_retry;

    let mut attempt = 0;
    loop {
        let err = match backend.generate(&request).await {
            Ok(response) => {
                debug!(
                    "{}: {} output tokens, finish {:?}",
                    file.display_name, response.output_tokens, response.finish_reason
                );
                if response.hit_token_limit() {
                    warn!(
                        "{}: response hit the {} token limit and may be truncated",
                        file.display_name, config.max_output_tokens
                    );
                }
                let Some(text) = response.text else {
                    warn!("{}: model returned no text", file.display_name);
                    return Ok(None);
                };
                return match config.shape.decode(&text) {
                    Ok(page) => Ok(Some(page)),
                    Err(e) => {
                        warn!("{}: could not decode response: {}", file.display_name, e);
                        Ok(None)
                    }
                };
            }
            Err(e) => e,
        };

        match transition(policy, attempt, &err) {
            Transition::Retry { after } => {
                warn!(
                    "{}: attempt {}/{} failed ({}), retrying in {:?}",
                    file.display_name,
                    attempt + 1,
                    policy.max_attempts,
                    err,
                    after
                );
                sleep(after).await;
                attempt += 1;
            }
            Transition::Exhausted => {
                warn!(
                    "{}: giving up after {} attempts: {}",
                    file.display_name, policy.max_attempts, err
                );
                return Ok(None);
            }
            Transition::Abort => {
                warn!("{}: extraction failed: {}", file.display_name, err);
                return Ok(None);
            }
            Transition::Escalate => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::GenerateResponse;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const PAGE_JSON: &str = r#"{"pgnum": 4, "yr": 1948, "entries": [{
        "state_heading": "KANSAS", "company": "Cities Service Gas Co.",
        "fuel": "NATURAL GAS", "new_construction": "TRUE",
        "construction_complete": "TRUE", "length": 8.0,
        "origin_state": "KS", "terminus_state": "MO",
        "inter_or_intra": "INTERSTATE"}]}"#;

    const SINGLE: TargetOffset = TargetOffset { position: 1, window_len: 1 };

    struct Scripted {
        replies: Mutex<VecDeque<Result<GenerateResponse, BackendError>>>,
        calls: AtomicUsize,
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<GenerateResponse, BackendError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: AtomicUsize::new(0),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl InferenceBackend for Scripted {
        async fn list_files(&self) -> Result<Vec<RemoteFile>, BackendError> {
            Ok(vec![])
        }
        async fn upload_file(&self, _: &Path, _: &str, _: &str) -> Result<RemoteFile, BackendError> {
            unreachable!("extraction never uploads")
        }
        async fn delete_file(&self, _: &RemoteFile) -> Result<(), BackendError> {
            Ok(())
        }
        async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(request.prompt.clone());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(GenerateResponse::default()))
        }
    }

    fn dyn_backend(s: &Arc<Scripted>) -> Arc<dyn InferenceBackend> {
        s.clone()
    }

    fn file() -> RemoteFile {
        RemoteFile {
            name: "files/x".into(),
            display_name: "4-4__directory_1948".into(),
            uri: "https://files.test/x".into(),
            mime_type: "application/pdf".into(),
        }
    }

    fn ok(text: &str) -> Result<GenerateResponse, BackendError> {
        Ok(GenerateResponse {
            text: Some(text.to_string()),
            finish_reason: Some("STOP".into()),
            output_tokens: 120,
        })
    }

    fn overloaded() -> Result<GenerateResponse, BackendError> {
        Err(BackendError::from_status(503, "The model is overloaded."))
    }

    #[test]
    fn transition_table() {
        let p = RetryPolicy::exponential(5, Duration::from_secs(20));
        let busy = BackendError::from_status(503, "busy");
        assert_eq!(
            transition(&p, 0, &busy),
            Transition::Retry { after: Duration::from_secs(20) }
        );
        assert_eq!(
            transition(&p, 3, &busy),
            Transition::Retry { after: Duration::from_secs(160) }
        );
        assert_eq!(transition(&p, 4, &busy), Transition::Exhausted);
        assert_eq!(
            transition(&p, 0, &BackendError::from_status(400, "bad schema")),
            Transition::Abort
        );
        assert_eq!(
            transition(&p, 0, &BackendError::Connection("reset".into())),
            Transition::Escalate
        );
    }

    #[tokio::test(start_paused = true)]
    async fn overload_backs_off_then_succeeds() {
        let script = Scripted::new(vec![overloaded(), overloaded(), overloaded(), ok(PAGE_JSON)]);
        let config = DigitizeConfig::default();

        let started = tokio::time::Instant::now();
        let page = extract_page(&dyn_backend(&script), &file(), SINGLE, &config).await.unwrap();

        assert_eq!(page.unwrap().yr, 1948);
        assert_eq!(script.calls(), 4);
        assert!(started.elapsed() >= Duration::from_secs(20 * (1 + 2 + 4)));
    }

    #[tokio::test(start_paused = true)]
    async fn spent_budget_returns_none_without_final_wait() {
        let script = Scripted::new((0..5).map(|_| overloaded()).collect());
        let config = DigitizeConfig::default();

        let started = tokio::time::Instant::now();
        let page = extract_page(&dyn_backend(&script), &file(), SINGLE, &config).await.unwrap();

        assert!(page.is_none());
        assert_eq!(script.calls(), 5);
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(20 * (1 + 2 + 4 + 8)));
        assert!(waited < Duration::from_secs(20 * (1 + 2 + 4 + 8 + 16)));
    }

    #[tokio::test]
    async fn non_transient_error_is_single_call() {
        let script = Scripted::new(vec![Err(BackendError::from_status(400, "bad"))]);
        let page = extract_page(&dyn_backend(&script), &file(), SINGLE, &DigitizeConfig::default())
            .await
            .unwrap();
        assert!(page.is_none());
        assert_eq!(script.calls(), 1);
    }

    #[tokio::test]
    async fn connection_failure_is_returned() {
        let backend = dyn_backend(&Scripted::new(vec![Err(BackendError::Connection("refused".into()))]));
        let err = extract_page(&backend, &file(), SINGLE, &DigitizeConfig::default())
            .await
            .unwrap_err();
        assert!(err.is_connection());
    }

    #[tokio::test]
    async fn undecodable_or_empty_text_is_none() {
        let backend = dyn_backend(&Scripted::new(vec![ok("not json"), Ok(GenerateResponse::default())]));
        let config = DigitizeConfig::default();
        assert!(extract_page(&backend, &file(), SINGLE, &config).await.unwrap().is_none());
        assert!(extract_page(&backend, &file(), SINGLE, &config).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn truncated_response_is_still_decoded() {
        let backend = dyn_backend(&Scripted::new(vec![Ok(GenerateResponse {
            text: Some(PAGE_JSON.into()),
            finish_reason: Some("MAX_TOKENS".into()),
            output_tokens: 40_000,
        })]));
        let page = extract_page(&backend, &file(), SINGLE, &DigitizeConfig::default())
            .await
            .unwrap();
        assert!(page.is_some());
    }

    #[tokio::test]
    async fn request_names_target_position() {
        let script = Scripted::new(vec![ok(PAGE_JSON), ok(PAGE_JSON)]);
        let backend = dyn_backend(&script);
        let config = DigitizeConfig::default();

        extract_page(&backend, &file(), TargetOffset::within(4, 2, 4), &config)
            .await
            .unwrap();
        extract_page(&backend, &file(), TargetOffset::within(4, 3, 5), &config)
            .await
            .unwrap();

        let prompts = script.prompts.lock().unwrap();
        assert!(prompts[0].contains("from page 3 of the 3 attached pages only"));
        assert!(prompts[1].contains("from page 2 of the 3 attached pages only"));
        assert!(!prompts[0].contains("FIRST page"));
    }
}
