use chat_api::{CancellationSignal, ChatApiClient, ChatApiConfig, ChatApiError, StreamEvent, TurnRequest};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request cancelled")]
    Cancelled,

    #[error("{0}")]
    Failed(String),
}

impl From<ChatApiError> for TransportError {
    fn from(error: ChatApiError) -> Self {
        match error {
            ChatApiError::Cancelled => Self::Cancelled,
            other => Self::Failed(other.to_string()),
        }
    }
}

/// Synchronous seam between the session controller and the backend.
///
/// `stream_turn` blocks the calling worker thread for the duration of the
/// stream, invoking `on_event` once per normalized event in arrival order,
/// and observes `cancellation` at every suspension point.
pub trait Transport: Send + Sync {
    fn stream_turn(
        &self,
        request: &TurnRequest,
        cancellation: &CancellationSignal,
        on_event: &mut dyn FnMut(StreamEvent),
    ) -> Result<(), TransportError>;

    fn generate_title(&self, conversation_id: &str, seed: &str) -> Result<String, TransportError>;

    fn persist_partial(&self, conversation_id: &str, content: &str) -> Result<(), TransportError>;
}

/// Production transport backed by the async [`ChatApiClient`], bridged with
/// a current-thread runtime per call so the session controller stays
/// synchronous.
pub struct HttpTransport {
    client: ChatApiClient,
}

impl HttpTransport {
    pub fn new(config: ChatApiConfig) -> Result<Self, TransportError> {
        Ok(Self {
            client: ChatApiClient::new(config)?,
        })
    }

    fn runtime() -> Result<tokio::runtime::Runtime, TransportError> {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|error| {
                TransportError::Failed(format!("failed to initialize tokio runtime: {error}"))
            })
    }
}

impl Transport for HttpTransport {
    fn stream_turn(
        &self,
        request: &TurnRequest,
        cancellation: &CancellationSignal,
        on_event: &mut dyn FnMut(StreamEvent),
    ) -> Result<(), TransportError> {
        let runtime = Self::runtime()?;
        runtime
            .block_on(
                self.client
                    .stream_turn(request, Some(cancellation), |event| on_event(event)),
            )
            .map_err(TransportError::from)
    }

    fn generate_title(&self, conversation_id: &str, seed: &str) -> Result<String, TransportError> {
        let runtime = Self::runtime()?;
        runtime
            .block_on(self.client.generate_title(conversation_id, seed, None))
            .map_err(TransportError::from)
    }

    fn persist_partial(&self, conversation_id: &str, content: &str) -> Result<(), TransportError> {
        let runtime = Self::runtime()?;
        runtime
            .block_on(self.client.persist_partial(conversation_id, content))
            .map_err(TransportError::from)
    }
}
