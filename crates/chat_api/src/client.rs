use std::future::Future;
use std::sync::{atomic::AtomicBool, atomic::Ordering, Arc};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, USER_AGENT};
use reqwest::{Client, Response, StatusCode};

use crate::config::ChatApiConfig;
use crate::error::{parse_error_message, ChatApiError};
use crate::events::StreamEvent;
use crate::frame::FrameParser;
use crate::payload::{PartialContentRequest, TitleRequest, TitleResponse, TurnRequest};
use crate::retry::{is_retryable_http_error, retry_delay, MAX_RETRIES};
use crate::url::{normalize_stream_url, partial_url, title_url};

/// Optional cancellation signal shared across request and stream loops.
pub type CancellationSignal = Arc<AtomicBool>;

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// HTTP client for the conversation backend.
///
/// Streamed turns are delivered through [`ChatApiClient::stream_turn`], which
/// feeds raw response bytes through a [`FrameParser`] and invokes the caller's
/// handler once per normalized [`StreamEvent`], in arrival order.
#[derive(Debug)]
pub struct ChatApiClient {
    http: Client,
    config: ChatApiConfig,
}

impl ChatApiClient {
    pub fn new(config: ChatApiConfig) -> Result<Self, ChatApiError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(ChatApiError::from)?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ChatApiConfig {
        &self.config
    }

    pub fn stream_endpoint(&self) -> String {
        normalize_stream_url(&self.config.base_url)
    }

    fn build_headers(&self) -> Result<HeaderMap, ChatApiError> {
        let mut headers = HeaderMap::new();

        let token = self.config.session_token.trim();
        if !token.is_empty() {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {token}"))
                    .map_err(|_| ChatApiError::InvalidBaseUrl("invalid session token".into()))?,
            );
        }

        if let Some(user_agent) = self.config.user_agent.as_deref() {
            headers.insert(
                USER_AGENT,
                HeaderValue::from_str(user_agent).map_err(|_| {
                    ChatApiError::InvalidBaseUrl("invalid user agent value".into())
                })?,
            );
        }

        for (key, value) in &self.config.extra_headers {
            headers.insert(
                HeaderName::from_bytes(key.as_bytes()).map_err(|_| {
                    ChatApiError::InvalidBaseUrl(format!("invalid header key: {key}"))
                })?,
                HeaderValue::from_str(value).map_err(|_| {
                    ChatApiError::InvalidBaseUrl(format!("invalid header value for {key}"))
                })?,
            );
        }

        Ok(headers)
    }

    async fn post_with_retry<T: serde::Serialize>(
        &self,
        endpoint: &str,
        payload: &T,
        cancellation: Option<&CancellationSignal>,
    ) -> Result<Response, ChatApiError> {
        let mut last_status: Option<StatusCode> = None;
        let mut last_error = None;

        for attempt in 0..=MAX_RETRIES {
            if is_cancelled(cancellation) {
                return Err(ChatApiError::Cancelled);
            }

            let request = self
                .http
                .post(endpoint)
                .headers(self.build_headers()?)
                .json(payload)
                .send();
            let response = await_or_cancel(request, cancellation)
                .await?
                .map_err(ChatApiError::from);

            match response {
                Ok(response) => {
                    if response.status().is_success() {
                        return Ok(response);
                    }

                    let status = response.status();
                    last_status = Some(status);
                    let body = await_or_cancel(response.text(), cancellation)
                        .await?
                        .unwrap_or_else(|_| {
                            status
                                .canonical_reason()
                                .unwrap_or("request failed")
                                .to_string()
                        });
                    let message = parse_error_message(status, &body);
                    last_error = Some(message.clone());

                    if attempt < MAX_RETRIES && is_retryable_http_error(status.as_u16(), &body) {
                        await_or_cancel(tokio::time::sleep(retry_delay(attempt)), cancellation)
                            .await?;
                        continue;
                    }

                    return Err(ChatApiError::Status(status, message));
                }
                Err(error) => {
                    last_error = Some(error.to_string());
                    if attempt < MAX_RETRIES {
                        await_or_cancel(tokio::time::sleep(retry_delay(attempt)), cancellation)
                            .await?;
                        continue;
                    }
                }
            }
        }

        Err(ChatApiError::RetryExhausted {
            status: last_status,
            last_error,
        })
    }

    /// Open one streamed turn and invoke `on_event` per normalized event.
    ///
    /// Returns once the server closes the stream (the `[DONE]` sentinel is
    /// consumed by the parser, not surfaced). Cancellation is observed at
    /// every await point and between parsed chunks.
    pub async fn stream_turn<F>(
        &self,
        request: &TurnRequest,
        cancellation: Option<&CancellationSignal>,
        mut on_event: F,
    ) -> Result<(), ChatApiError>
    where
        F: FnMut(StreamEvent),
    {
        let response = self
            .post_with_retry(&self.stream_endpoint(), request, cancellation)
            .await?;
        let mut bytes = response.bytes_stream();
        let mut parser = FrameParser::default();

        loop {
            let Some(chunk) = await_or_cancel(bytes.next(), cancellation).await? else {
                break;
            };
            if is_cancelled(cancellation) {
                return Err(ChatApiError::Cancelled);
            }
            let chunk = chunk.map_err(ChatApiError::from)?;
            for event in parser.feed(&chunk) {
                on_event(event);
            }
        }

        if is_cancelled(cancellation) {
            return Err(ChatApiError::Cancelled);
        }

        Ok(())
    }

    /// Ask the backend to generate a conversation title from its first
    /// user message.
    pub async fn generate_title(
        &self,
        conversation_id: &str,
        seed: &str,
        cancellation: Option<&CancellationSignal>,
    ) -> Result<String, ChatApiError> {
        let payload = TitleRequest {
            conversation_id: conversation_id.to_string(),
            seed: seed.to_string(),
        };
        let response = self
            .post_with_retry(&title_url(&self.config.base_url), &payload, cancellation)
            .await?;
        let parsed: TitleResponse = response.json().await.map_err(ChatApiError::from)?;

        let title = parsed.title.trim().to_string();
        if title.is_empty() {
            return Err(ChatApiError::MissingTitle);
        }
        Ok(title)
    }

    /// Persist partial assistant content after a user-initiated stop.
    pub async fn persist_partial(
        &self,
        conversation_id: &str,
        content: &str,
    ) -> Result<(), ChatApiError> {
        let payload = PartialContentRequest {
            conversation_id: conversation_id.to_string(),
            content: content.to_string(),
        };
        self.post_with_retry(&partial_url(&self.config.base_url), &payload, None)
            .await?;
        Ok(())
    }
}

fn is_cancelled(cancel: Option<&CancellationSignal>) -> bool {
    cancel.is_some_and(|token| token.load(Ordering::Acquire))
}

async fn await_or_cancel<F>(
    future: F,
    cancellation: Option<&CancellationSignal>,
) -> Result<F::Output, ChatApiError>
where
    F: Future,
{
    if cancellation.is_none() {
        return Ok(future.await);
    }

    let mut future = Box::pin(future);

    loop {
        if is_cancelled(cancellation) {
            return Err(ChatApiError::Cancelled);
        }

        if let Ok(output) = tokio::time::timeout(CANCEL_POLL_INTERVAL, &mut future).await {
            if is_cancelled(cancellation) {
                return Err(ChatApiError::Cancelled);
            }
            return Ok(output);
        }
    }
}
