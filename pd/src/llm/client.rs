//! CompletionClient trait definition

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{CompletionRequest, CompletionResponse, LlmError, StreamChunk};

/// Stateless completion port - each call carries the full conversation.
///
/// Implementations translate provider-specific wire formats and error
/// categories (rate limit, provider unavailable) into the shared types.
/// `stream` must reassemble indexed tool-call deltas so the returned
/// response is identical to what a non-streamed call would produce.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Send a single completion request and wait for the full response
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Streaming completion; chunks go to `chunk_tx` as they arrive.
    ///
    /// Returns the final reassembled response.
    async fn stream(
        &self,
        request: CompletionRequest,
        chunk_tx: mpsc::Sender<StreamChunk>,
    ) -> Result<CompletionResponse, LlmError>;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted LLM client for unit tests
    pub struct MockClient {
        responses: Mutex<Vec<CompletionResponse>>,
        call_count: AtomicUsize,
    }

    impl MockClient {
        pub fn new(responses: Vec<CompletionResponse>) -> Self {
            Self {
                responses: Mutex::new(responses),
                call_count: AtomicUsize::new(0),
            }
        }

        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CompletionClient for MockClient {
        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            let idx = self.call_count.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .get(idx)
                .cloned()
                .ok_or_else(|| LlmError::InvalidResponse("No more mock responses".to_string()))
        }

        async fn stream(
            &self,
            request: CompletionRequest,
            chunk_tx: mpsc::Sender<StreamChunk>,
        ) -> Result<CompletionResponse, LlmError> {
            let response = self.complete(request).await?;
            if let Some(content) = &response.content {
                // Split into two chunks so consumers exercise delta handling
                let mid = content.len() / 2;
                let (a, b) = content.split_at(mid);
                if !a.is_empty() {
                    let _ = chunk_tx.send(StreamChunk::TextDelta(a.to_string())).await;
                }
                if !b.is_empty() {
                    let _ = chunk_tx.send(StreamChunk::TextDelta(b.to_string())).await;
                }
            }
            let _ = chunk_tx
                .send(StreamChunk::MessageDone {
                    stop_reason: response.stop_reason,
                    usage: response.usage.clone(),
                })
                .await;
            Ok(response)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn test_mock_client_returns_scripted_responses() {
            let client = MockClient::new(vec![
                CompletionResponse::text("first"),
                CompletionResponse::text("second"),
            ]);

            let req = CompletionRequest::simple("hi", 0.0, 100);
            assert_eq!(client.complete(req.clone()).await.unwrap().content.as_deref(), Some("first"));
            assert_eq!(client.complete(req.clone()).await.unwrap().content.as_deref(), Some("second"));
            assert!(client.complete(req).await.is_err());
            assert_eq!(client.call_count(), 3);
        }
    }
}
