use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::error::{ExtractError, Result};
use crate::llm::{ChatRequest, ModelClient, ModelOutput, ModelReply};

/// Scripted client for tests and offline runs. Replies are served in order; the last one repeats.
#[derive(Clone, Default)]
pub struct MockClient {
    replies: Arc<Mutex<VecDeque<std::result::Result<String, String>>>>,
    requests: Arc<Mutex<Vec<ChatRequest>>>,
    calls: Arc<AtomicUsize>,
    delay: Option<Duration>,
    total_tokens: u64,
}

impl MockClient {
    pub fn new(reply: impl Into<String>) -> Self {
        Self::with_sequence(vec![Ok(reply.into())])
    }

    /// Every call fails with a backend error carrying `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_sequence(vec![Err(message.into())])
    }

    pub fn with_sequence(replies: Vec<std::result::Result<String, String>>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(replies.into())),
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_tokens(mut self, total_tokens: u64) -> Self {
        self.total_tokens = total_tokens;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn last_request(&self) -> Option<ChatRequest> {
        self.requests.lock().await.last().cloned()
    }
}

#[async_trait]
impl ModelClient for MockClient {
    async fn invoke(&self, request: ChatRequest) -> Result<ModelOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let tools_requested = !request.tools.is_empty();
        self.requests.lock().await.push(request);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = {
            let mut replies = self.replies.lock().await;
            if replies.len() > 1 { replies.pop_front() } else { replies.front().cloned() }
        };

        let content = match next {
            Some(Ok(content)) => content,
            Some(Err(message)) => return Err(ExtractError::Backend(anyhow::anyhow!(message))),
            None => return Err(ExtractError::Backend(anyhow::anyhow!("mock has no scripted reply"))),
        };

        let reply = if tools_requested {
            ModelReply::WithTools { content: Some(content), tool_calls: Vec::new() }
        } else {
            ModelReply::Content(content)
        };
        Ok(ModelOutput { reply, total_tokens: self.total_tokens })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::Message;

    #[tokio::test]
    async fn test_mock_serves_replies_in_order() {
        let mock = MockClient::with_sequence(vec![Err("rate limited".into()), Ok("{}".into())]);

        let first = mock.invoke(ChatRequest::default()).await;
        assert!(matches!(first, Err(ExtractError::Backend(_))));

        let second = mock.invoke(ChatRequest::new(vec![Message::user("x")])).await.unwrap();
        assert_eq!(second.reply.content(), "{}");
        // Last reply repeats.
        let third = mock.invoke(ChatRequest::default()).await.unwrap();
        assert_eq!(third.reply.content(), "{}");

        assert_eq!(mock.call_count(), 3);
        assert!(mock.last_request().await.unwrap().messages.is_empty());
    }
}
