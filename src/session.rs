use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use audio_playback::{SpeechChunk, SpeechQueue, TrackPlayer};
use chat_api::{
    Attachment, CancellationSignal, MusicAction, StreamEvent, TurnRequest,
};
use log::{debug, warn};

use crate::capabilities::CapabilityProvider;
use crate::consent::{ConsentCoordinator, PendingToolCall, ToolVerdict};
use crate::error::SessionError;
use crate::model::{truncate_title, Conversation, Feedback, FinalizeReason, Message, Role};
use crate::transcript::Transcript;
use crate::transport::{Transport, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionNotification {
    TranscriptChanged,
    PendingToolCallChanged,
    TitleChanged,
}

type SessionObserver = Box<dyn Fn(SessionNotification) + Send + Sync>;

struct ActiveTurn {
    turn_id: u64,
    cancel: CancellationSignal,
    join_handle: Option<JoinHandle<()>>,
}

/// Orchestrator for one conversation: wires the transport stream into the
/// transcript, forwards music and voice events to the playback engines,
/// and drives the tool-call consent flow.
///
/// One `ChatSession` owns one conversation and at most one active turn;
/// `send_message` supersedes any turn still in flight. All public
/// operations are callable from any thread; streaming work happens on a
/// per-turn worker thread.
pub struct ChatSession {
    transport: Arc<dyn Transport>,
    capabilities: Arc<dyn CapabilityProvider>,
    speech: SpeechQueue,
    player: TrackPlayer,
    conversation: Mutex<Conversation>,
    transcript: Mutex<Transcript>,
    consent: ConsentCoordinator,
    next_turn_id: AtomicU64,
    current_turn_id: AtomicU64,
    active_turn: Mutex<Option<ActiveTurn>>,
    naming_in_progress: AtomicBool,
    voice_enabled: AtomicBool,
    observer: Mutex<Option<SessionObserver>>,
}

impl ChatSession {
    pub fn new(
        transport: Arc<dyn Transport>,
        capabilities: Arc<dyn CapabilityProvider>,
        speech: SpeechQueue,
        player: TrackPlayer,
    ) -> Arc<Self> {
        let conversation = Conversation::new();
        let transcript = Transcript::new(conversation.id.clone());

        Arc::new(Self {
            transport,
            capabilities,
            speech,
            player,
            conversation: Mutex::new(conversation),
            transcript: Mutex::new(transcript),
            consent: ConsentCoordinator::new(),
            next_turn_id: AtomicU64::new(1),
            current_turn_id: AtomicU64::new(0),
            active_turn: Mutex::new(None),
            naming_in_progress: AtomicBool::new(false),
            voice_enabled: AtomicBool::new(false),
            observer: Mutex::new(None),
        })
    }

    pub fn set_observer(&self, observer: impl Fn(SessionNotification) + Send + Sync + 'static) {
        *lock_unpoisoned(&self.observer) = Some(Box::new(observer));
    }

    pub fn conversation(&self) -> Conversation {
        lock_unpoisoned(&self.conversation).clone()
    }

    pub fn messages(&self) -> Vec<Message> {
        lock_unpoisoned(&self.transcript).messages().to_vec()
    }

    pub fn is_streaming(&self) -> bool {
        lock_unpoisoned(&self.transcript).streaming_index().is_some()
    }

    pub fn pending_tool_call(&self) -> Option<PendingToolCall> {
        self.consent.pending()
    }

    pub fn speech_queue(&self) -> &SpeechQueue {
        &self.speech
    }

    pub fn track_player(&self) -> &TrackPlayer {
        &self.player
    }

    /// Clearing voice mode stops speech playback and empties its queue.
    pub fn set_voice_enabled(&self, enabled: bool) {
        self.voice_enabled.store(enabled, Ordering::SeqCst);
        if !enabled {
            self.speech.clear();
        }
    }

    /// Append a user message and start a new assistant turn, superseding
    /// any turn still in flight for this conversation.
    pub fn send_message(
        self: &Arc<Self>,
        content: impl Into<String>,
        attachment: Option<Attachment>,
        voice_enabled: bool,
    ) -> Result<(), SessionError> {
        let content = content.into();
        self.cancel_active_turn();
        if self.consent.has_pending() {
            debug!("discarding pending tool call superseded by a new user message");
            self.consent.clear();
            self.notify(SessionNotification::PendingToolCallChanged);
        }
        self.voice_enabled.store(voice_enabled, Ordering::SeqCst);

        let conversation_id = {
            let mut transcript = self.lock_transcript();
            transcript.push_user_message(content.clone());
            transcript.begin_turn();
            transcript.conversation_id().to_string()
        };
        self.notify(SessionNotification::TranscriptChanged);

        let mut request = TurnRequest::new(conversation_id, content).with_voice(voice_enabled);
        if let Some(attachment) = attachment {
            request = request.with_attachment(attachment);
        }
        self.start_turn(request)
    }

    /// Re-entrant stop: cancels the active subscription, finalizes the
    /// in-flight message, and persists non-empty partial content best
    /// effort. A second call is a no-op.
    pub fn stop_streaming(&self) {
        let cancelled = {
            let active_turn = lock_unpoisoned(&self.active_turn);
            match active_turn.as_ref() {
                Some(active) => {
                    active.cancel.store(true, Ordering::SeqCst);
                    true
                }
                None => false,
            }
        };
        if !cancelled {
            return;
        }

        let Some(partial) = self.lock_transcript().finalize(FinalizeReason::Stopped) else {
            return;
        };
        self.notify(SessionNotification::TranscriptChanged);

        if partial.trim().is_empty() {
            return;
        }
        let transport = Arc::clone(&self.transport);
        let conversation_id = lock_unpoisoned(&self.conversation).id.clone();
        let spawned = thread::Builder::new()
            .name("chat-persist-partial".to_string())
            .spawn(move || {
                if let Err(error) = transport.persist_partial(&conversation_id, &partial) {
                    warn!("failed to persist partial content: {error}");
                }
            });
        if let Err(error) = spawned {
            warn!("failed to spawn partial-persistence worker: {error}");
        }
    }

    /// Apply the approver's verdict to the pending tool call and resume the
    /// paused turn with its result.
    pub fn submit_tool_result(self: &Arc<Self>, verdict: ToolVerdict) -> Result<(), SessionError> {
        let resolved = self
            .consent
            .resolve(verdict, self.capabilities.as_ref())
            .ok_or(SessionError::NoPendingToolCall)?;
        self.notify(SessionNotification::PendingToolCallChanged);

        let conversation_id = {
            let mut transcript = self.lock_transcript();
            if let Some(marker) = resolved.marker.as_deref() {
                transcript.append_action_marker(marker);
            }
            transcript.resume_turn();
            transcript.conversation_id().to_string()
        };
        self.notify(SessionNotification::TranscriptChanged);

        let request = TurnRequest::resumption(conversation_id, resolved.payload)
            .with_voice(self.voice_enabled.load(Ordering::SeqCst));
        self.start_turn(request)
    }

    /// Assign a title once per conversation, guarded against concurrent
    /// requests. Falls back to truncating the first user message when the
    /// server request fails.
    pub fn regenerate_title_if_needed(self: &Arc<Self>) {
        if self.naming_in_progress.swap(true, Ordering::SeqCst) {
            return;
        }

        let already_titled = lock_unpoisoned(&self.conversation).title.is_some();
        let seed = self.first_user_message_content();
        let (conversation_id, seed) = match (already_titled, seed) {
            (false, Some(seed)) => (lock_unpoisoned(&self.conversation).id.clone(), seed),
            _ => {
                self.naming_in_progress.store(false, Ordering::SeqCst);
                return;
            }
        };

        let session = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name("chat-title".to_string())
            .spawn(move || {
                let title = match session.transport.generate_title(&conversation_id, &seed) {
                    Ok(title) => title,
                    Err(error) => {
                        warn!("title generation failed ({error}); using client-side truncation");
                        truncate_title(&seed)
                    }
                };

                {
                    let mut conversation = lock_unpoisoned(&session.conversation);
                    if conversation.title.is_none() && !title.is_empty() {
                        conversation.title = Some(title);
                    }
                }
                session.naming_in_progress.store(false, Ordering::SeqCst);
                session.notify(SessionNotification::TitleChanged);
            });
        if let Err(error) = spawned {
            warn!("failed to spawn title worker: {error}");
            self.naming_in_progress.store(false, Ordering::SeqCst);
        }
    }

    pub fn edit_message(&self, index: usize, content: impl Into<String>) -> Result<(), SessionError> {
        self.lock_transcript().edit_message(index, content)?;
        self.notify(SessionNotification::TranscriptChanged);
        Ok(())
    }

    pub fn set_feedback(&self, index: usize, feedback: Option<Feedback>) -> Result<(), SessionError> {
        self.lock_transcript().set_feedback(index, feedback)?;
        self.notify(SessionNotification::TranscriptChanged);
        Ok(())
    }

    fn start_turn(self: &Arc<Self>, request: TurnRequest) -> Result<(), SessionError> {
        let mut active_turn = lock_unpoisoned(&self.active_turn);

        let turn_id = self.next_turn_id.fetch_add(1, Ordering::SeqCst);
        self.current_turn_id.store(turn_id, Ordering::SeqCst);
        let cancel: CancellationSignal = Arc::new(AtomicBool::new(false));

        let session = Arc::clone(self);
        let worker_cancel = Arc::clone(&cancel);
        let join_handle = thread::Builder::new()
            .name(format!("chat-turn-{turn_id}"))
            .spawn(move || session.run_turn(request, turn_id, worker_cancel))
            .map_err(SessionError::WorkerSpawn)?;

        *active_turn = Some(ActiveTurn {
            turn_id,
            cancel,
            join_handle: Some(join_handle),
        });
        Ok(())
    }

    fn run_turn(self: Arc<Self>, request: TurnRequest, turn_id: u64, cancel: CancellationSignal) {
        let voice_enabled = request.voice_enabled;
        let mut on_event =
            |event: StreamEvent| self.route_event(turn_id, &cancel, voice_enabled, event);
        let outcome = self.transport.stream_turn(&request, &cancel, &mut on_event);

        match outcome {
            Ok(()) => {
                if self.is_current_turn(turn_id) {
                    self.lock_transcript().finalize(FinalizeReason::Done);
                    self.notify(SessionNotification::TranscriptChanged);
                    self.clear_active_turn_if_matching(turn_id);
                    self.regenerate_title_if_needed();
                }
            }
            Err(TransportError::Cancelled) => {
                // Either a user stop or a tool-call pause; both already
                // finalized the in-flight message.
                self.clear_active_turn_if_matching(turn_id);
            }
            Err(TransportError::Failed(message)) => {
                warn!("turn {turn_id} transport failure: {message}");
                if self.is_current_turn(turn_id) {
                    let mut transcript = self.lock_transcript();
                    transcript.append_error_marker(&message);
                    transcript.finalize(FinalizeReason::Error);
                    drop(transcript);
                    self.notify(SessionNotification::TranscriptChanged);
                    self.clear_active_turn_if_matching(turn_id);
                }
            }
        }
    }

    fn route_event(
        &self,
        turn_id: u64,
        cancel: &CancellationSignal,
        voice_enabled: bool,
        event: StreamEvent,
    ) {
        if !self.is_current_turn(turn_id) {
            debug!("discarding event from superseded turn {turn_id}");
            return;
        }

        match event {
            StreamEvent::ClientToolCall {
                name,
                args,
                tool_call_id,
            } => self.handle_client_tool_call(
                PendingToolCall {
                    name,
                    args,
                    tool_call_id,
                },
                cancel,
            ),
            StreamEvent::MusicPlay { track } => {
                self.player.play(to_player_track(track), true);
            }
            StreamEvent::MusicQueueAdd { track } => {
                self.player.add_to_queue(to_player_track(track));
            }
            StreamEvent::MusicControl { action } => self.apply_music_action(action),
            StreamEvent::VoiceAudio { audio, sentence } => {
                if voice_enabled {
                    self.speech.enqueue(SpeechChunk { audio, sentence });
                }
            }
            other => {
                let should_notify = self.lock_transcript().apply_event(&other);
                if should_notify {
                    self.notify(SessionNotification::TranscriptChanged);
                }
            }
        }
    }

    fn handle_client_tool_call(&self, call: PendingToolCall, cancel: &CancellationSignal) {
        if !self.consent.try_register(call) {
            // Protocol violation already logged by the coordinator.
            return;
        }

        // The server stops producing frames for this branch; drop the
        // subscription and freeze the transcript until a verdict arrives.
        cancel.store(true, Ordering::SeqCst);
        self.lock_transcript().finalize(FinalizeReason::Interrupted);
        self.notify(SessionNotification::TranscriptChanged);
        self.notify(SessionNotification::PendingToolCallChanged);
    }

    fn apply_music_action(&self, action: MusicAction) {
        use audio_playback::PlayerState;

        match action {
            MusicAction::Pause => {
                if self.player.state() == PlayerState::Playing {
                    self.player.toggle();
                }
            }
            MusicAction::Resume => {
                if self.player.state() == PlayerState::Paused {
                    self.player.toggle();
                }
            }
            MusicAction::Next => self.player.play_next(true),
            MusicAction::Previous => self.player.play_previous(),
            MusicAction::Stop => self.player.stop(false),
        }
    }

    fn cancel_active_turn(&self) {
        let active_turn = lock_unpoisoned(&self.active_turn);
        if let Some(active) = active_turn.as_ref() {
            active.cancel.store(true, Ordering::SeqCst);
            // Turn ids start at 1; zero invalidates the superseded worker's
            // routing before the next turn id is published.
            self.current_turn_id.store(0, Ordering::SeqCst);
        }
    }

    fn clear_active_turn_if_matching(&self, turn_id: u64) {
        let mut active_turn = lock_unpoisoned(&self.active_turn);
        let matches = active_turn.as_ref().map(|active| active.turn_id) == Some(turn_id);
        if !matches {
            return;
        }

        let mut completed = match active_turn.take() {
            Some(completed) => completed,
            None => return,
        };

        if let Some(join_handle) = completed.join_handle.take() {
            let is_current_thread = join_handle.thread().id() == thread::current().id();
            if !is_current_thread && join_handle.is_finished() {
                let _ = join_handle.join();
            }
        }
    }

    fn is_current_turn(&self, turn_id: u64) -> bool {
        self.current_turn_id.load(Ordering::SeqCst) == turn_id
    }

    fn first_user_message_content(&self) -> Option<String> {
        let transcript = self.lock_transcript();
        transcript
            .messages()
            .iter()
            .find(|message| message.role == Role::User)
            .map(|message| message.content.clone())
    }

    fn notify(&self, notification: SessionNotification) {
        if let Some(observer) = lock_unpoisoned(&self.observer).as_ref() {
            observer(notification);
        }
    }

    fn lock_transcript(&self) -> MutexGuard<'_, Transcript> {
        lock_unpoisoned(&self.transcript)
    }
}

fn to_player_track(track: chat_api::Track) -> audio_playback::Track {
    audio_playback::Track {
        url: track.url,
        title: track.title,
        thumbnail: track.thumbnail,
        duration_seconds: track.duration_seconds,
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
