use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::backend::{BackendExit, BackendInstance, CompletionFn, PlaybackBackend, PlaybackSource};

/// Coalescing window for restart-based seeks, so drag-style scrubbing does
/// not cause a restart storm.
pub const SEEK_DEBOUNCE: Duration = Duration::from_millis(300);

/// One entry of the track player queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    pub url: String,
    pub title: String,
    pub thumbnail: Option<String>,
    pub duration_seconds: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RepeatMode {
    #[default]
    Off,
    One,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayerState {
    #[default]
    Idle,
    Loading,
    Playing,
    Paused,
    Stopped,
}

/// Snapshot of player state for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackStatus {
    pub state: PlayerState,
    pub track: Option<Track>,
    pub position: Duration,
    pub duration: Option<Duration>,
    pub generation: u64,
}

type StateObserver = Box<dyn Fn(PlayerState) + Send + Sync>;

/// Queue-based track player with generation-guarded backend callbacks.
///
/// Every `play` supersedes the previous backend instance: the generation
/// counter increases, the old instance is stopped, and any exit callback
/// tagged with an older generation is discarded without side effects. A
/// manual stop or toggle-pause sets a flag that suppresses auto-advance, so
/// a user-initiated stop is never confused with natural end-of-track.
#[derive(Clone)]
pub struct TrackPlayer {
    shared: Arc<PlayerShared>,
}

struct PlayerShared {
    backend: Arc<dyn PlaybackBackend>,
    inner: Mutex<PlayerInner>,
    observer: Mutex<Option<StateObserver>>,
    seek_debounce: Duration,
}

#[derive(Default)]
struct PlayerInner {
    queue: Vec<Track>,
    index: Option<usize>,
    current: Option<Track>,
    repeat: RepeatMode,
    state: PlayerState,
    generation: u64,
    instance: Option<Box<dyn BackendInstance>>,
    stopped_manually: bool,
    base_offset: Duration,
    started_at: Option<Instant>,
    seek_serial: u64,
}

impl TrackPlayer {
    pub fn new(backend: Arc<dyn PlaybackBackend>) -> Self {
        Self::with_seek_debounce(backend, SEEK_DEBOUNCE)
    }

    pub fn with_seek_debounce(backend: Arc<dyn PlaybackBackend>, seek_debounce: Duration) -> Self {
        Self {
            shared: Arc::new(PlayerShared {
                backend,
                inner: Mutex::new(PlayerInner::default()),
                observer: Mutex::new(None),
                seek_debounce,
            }),
        }
    }

    /// Register the state-change observer. A later call replaces it.
    pub fn set_state_observer(&self, observer: impl Fn(PlayerState) + Send + Sync + 'static) {
        *lock_unpoisoned(&self.shared.observer) = Some(Box::new(observer));
    }

    pub fn set_repeat_mode(&self, mode: RepeatMode) {
        self.lock_inner().repeat = mode;
    }

    pub fn repeat_mode(&self) -> RepeatMode {
        self.lock_inner().repeat
    }

    pub fn state(&self) -> PlayerState {
        self.lock_inner().state
    }

    pub fn queue_snapshot(&self) -> Vec<Track> {
        self.lock_inner().queue.clone()
    }

    pub fn status(&self) -> PlaybackStatus {
        let inner = self.lock_inner();
        let position = inner.base_offset
            + inner
                .started_at
                .map(|started| started.elapsed())
                .unwrap_or_default();
        PlaybackStatus {
            state: inner.state,
            track: inner.current.clone(),
            position,
            duration: inner
                .current
                .as_ref()
                .and_then(|track| track.duration_seconds)
                .map(Duration::from_secs),
            generation: inner.generation,
        }
    }

    /// Start playing `track`, superseding any current playback.
    ///
    /// With `as_queue_item` the track is also appended to the queue and the
    /// index moves to it; otherwise the queue is left untouched.
    pub fn play(&self, track: Track, as_queue_item: bool) {
        let generation = {
            let mut inner = self.lock_inner();
            if as_queue_item {
                inner.queue.push(track.clone());
                inner.index = Some(inner.queue.len() - 1);
            }
            inner.current = Some(track.clone());
            prepare_restart_locked(&mut inner, Duration::ZERO)
        };

        self.notify(PlayerState::Loading);
        self.start_backend(generation, track, Duration::ZERO);
    }

    pub fn add_to_queue(&self, track: Track) {
        self.lock_inner().queue.push(track);
    }

    /// Advance honoring the repeat mode: `One` replays the current index,
    /// `All` wraps to the head at the end of the queue, `Off` stops there.
    pub fn play_next(&self, auto_play: bool) {
        let started = {
            let mut inner = self.lock_inner();
            if inner.queue.is_empty() {
                halt_locked(&mut inner, false, false);
                None
            } else {
                let len = inner.queue.len();
                let next = match (inner.repeat, inner.index) {
                    (RepeatMode::One, Some(index)) => Some(index),
                    (_, None) => Some(0),
                    (RepeatMode::All, Some(index)) => Some((index + 1) % len),
                    (RepeatMode::Off, Some(index)) => {
                        if index + 1 < len {
                            Some(index + 1)
                        } else {
                            None
                        }
                    }
                };

                match next {
                    None => {
                        halt_locked(&mut inner, false, false);
                        None
                    }
                    Some(index) => {
                        inner.index = Some(index);
                        inner.current = Some(inner.queue[index].clone());
                        if auto_play {
                            let track = inner.queue[index].clone();
                            let generation = prepare_restart_locked(&mut inner, Duration::ZERO);
                            Some((generation, track))
                        } else {
                            halt_locked(&mut inner, false, true);
                            None
                        }
                    }
                }
            }
        };

        match started {
            Some((generation, track)) => {
                self.notify(PlayerState::Loading);
                self.start_backend(generation, track, Duration::ZERO);
            }
            None => self.notify(PlayerState::Stopped),
        }
    }

    pub fn play_previous(&self) {
        let started = {
            let mut inner = self.lock_inner();
            if inner.queue.is_empty() {
                halt_locked(&mut inner, false, false);
                None
            } else {
                let len = inner.queue.len();
                let previous = match (inner.repeat, inner.index) {
                    (RepeatMode::One, Some(index)) => index,
                    (_, None) => 0,
                    (RepeatMode::All, Some(0)) => len - 1,
                    (_, Some(index)) => index.saturating_sub(1),
                };

                inner.index = Some(previous);
                inner.current = Some(inner.queue[previous].clone());
                let track = inner.queue[previous].clone();
                let generation = prepare_restart_locked(&mut inner, Duration::ZERO);
                Some((generation, track))
            }
        };

        if let Some((generation, track)) = started {
            self.notify(PlayerState::Loading);
            self.start_backend(generation, track, Duration::ZERO);
        }
    }

    /// Pause when playing, resume when paused. A pause is a manual stop for
    /// auto-advance purposes. Backends without native pause are stopped and
    /// later restarted from the recorded position.
    pub fn toggle(&self) {
        let mut restart = None;
        let notify_state = {
            let mut inner = self.lock_inner();
            match inner.state {
                PlayerState::Playing => {
                    inner.stopped_manually = true;
                    let elapsed = inner
                        .started_at
                        .take()
                        .map(|started| started.elapsed())
                        .unwrap_or_default();
                    inner.base_offset += elapsed;

                    let paused_natively = inner
                        .instance
                        .as_mut()
                        .map(|instance| instance.pause())
                        .unwrap_or(false);
                    if !paused_natively {
                        if let Some(mut instance) = inner.instance.take() {
                            instance.stop();
                        }
                    }

                    inner.state = PlayerState::Paused;
                    Some(PlayerState::Paused)
                }
                PlayerState::Paused => {
                    let resumed_natively = inner
                        .instance
                        .as_mut()
                        .map(|instance| instance.resume())
                        .unwrap_or(false);
                    if resumed_natively {
                        inner.stopped_manually = false;
                        inner.started_at = Some(Instant::now());
                        inner.state = PlayerState::Playing;
                        Some(PlayerState::Playing)
                    } else if let Some(track) = inner.current.clone() {
                        let offset = inner.base_offset;
                        let generation = prepare_restart_locked(&mut inner, offset);
                        restart = Some((generation, track, offset));
                        Some(PlayerState::Loading)
                    } else {
                        None
                    }
                }
                _ => None,
            }
        };

        if let Some(state) = notify_state {
            self.notify(state);
        }
        if let Some((generation, track, offset)) = restart {
            self.start_backend(generation, track, offset);
        }
    }

    /// Seek to `position`. Native seeks apply immediately; otherwise the
    /// request is debounced and satisfied by restarting from the offset,
    /// with rapid successive requests coalesced into the newest one.
    pub fn seek(&self, position: Duration) {
        let serial = {
            let mut inner = self.lock_inner();
            inner.seek_serial += 1;

            let sought_natively = inner
                .instance
                .as_mut()
                .map(|instance| instance.seek(position))
                .unwrap_or(false);
            if sought_natively {
                inner.base_offset = position;
                if inner.state == PlayerState::Playing {
                    inner.started_at = Some(Instant::now());
                }
                return;
            }

            inner.seek_serial
        };

        let player = self.clone();
        thread::spawn(move || {
            thread::sleep(player.shared.seek_debounce);

            let restart = {
                let mut inner = player.lock_inner();
                if inner.seek_serial != serial {
                    // Superseded by a newer seek inside the window.
                    return;
                }
                let Some(track) = inner.current.clone() else {
                    return;
                };
                match inner.state {
                    PlayerState::Playing | PlayerState::Loading => {
                        let generation = prepare_restart_locked(&mut inner, position);
                        Some((generation, track))
                    }
                    _ => {
                        // Not audible; just move the resume offset.
                        inner.base_offset = position;
                        None
                    }
                }
            };

            if let Some((generation, track)) = restart {
                player.notify(PlayerState::Loading);
                player.start_backend(generation, track, position);
            }
        });
    }

    /// Idempotent manual stop; always lands in `Stopped` with the position
    /// reset. `clear_queue` additionally empties the queue and clears the
    /// current index.
    pub fn stop(&self, clear_queue: bool) {
        {
            let mut inner = self.lock_inner();
            halt_locked(&mut inner, clear_queue, true);
        }
        self.notify(PlayerState::Stopped);
    }

    fn start_backend(&self, generation: u64, track: Track, offset: Duration) {
        let source = source_for(&track);
        let player = self.clone();
        let on_exit: CompletionFn = Box::new(move |exit| {
            player.handle_backend_exit(generation, exit);
        });

        match self.shared.backend.start(&source, offset, on_exit) {
            Ok(instance) => {
                let mut inner = self.lock_inner();
                if generation != inner.generation {
                    // Superseded while spawning; tear the newcomer down.
                    let mut stale = instance;
                    stale.stop();
                    return;
                }
                inner.instance = Some(instance);
                inner.state = PlayerState::Playing;
                inner.started_at = Some(Instant::now());
                drop(inner);
                self.notify(PlayerState::Playing);
            }
            Err(error) => {
                warn!("track playback failed to start: {error}");
                let mut inner = self.lock_inner();
                if generation == inner.generation {
                    inner.state = PlayerState::Stopped;
                    inner.started_at = None;
                    inner.base_offset = Duration::ZERO;
                    drop(inner);
                    self.notify(PlayerState::Stopped);
                }
            }
        }
    }

    fn handle_backend_exit(&self, generation: u64, exit: BackendExit) {
        {
            let mut inner = self.lock_inner();
            if generation != inner.generation {
                debug!(
                    "discarding stale playback callback (generation {generation}, current {})",
                    inner.generation
                );
                return;
            }

            inner.instance = None;
            if let BackendExit::Failed(message) = &exit {
                warn!("track backend reported failure: {message}");
            }
            if inner.stopped_manually {
                return;
            }
            inner.started_at = None;
            inner.base_offset = Duration::ZERO;
        }

        self.play_next(true);
    }

    fn notify(&self, state: PlayerState) {
        if let Some(observer) = lock_unpoisoned(&self.shared.observer).as_ref() {
            observer(state);
        }
    }

    fn lock_inner(&self) -> MutexGuard<'_, PlayerInner> {
        lock_unpoisoned(&self.shared.inner)
    }
}

/// Bump the generation, stop the superseded instance, and reset per-start
/// bookkeeping. Caller holds the inner lock and starts the backend after
/// releasing it.
fn prepare_restart_locked(inner: &mut PlayerInner, offset: Duration) -> u64 {
    inner.generation += 1;
    if let Some(mut superseded) = inner.instance.take() {
        superseded.stop();
    }
    inner.stopped_manually = false;
    inner.base_offset = offset;
    inner.started_at = None;
    inner.state = PlayerState::Loading;
    inner.generation
}

fn halt_locked(inner: &mut PlayerInner, clear_queue: bool, manual: bool) {
    if let Some(mut instance) = inner.instance.take() {
        instance.stop();
    }
    if manual {
        inner.stopped_manually = true;
    }
    inner.state = PlayerState::Stopped;
    inner.base_offset = Duration::ZERO;
    inner.started_at = None;
    if clear_queue {
        inner.queue.clear();
        inner.index = None;
        inner.current = None;
    }
}

fn source_for(track: &Track) -> PlaybackSource {
    if track.url.starts_with("http://") || track.url.starts_with("https://") {
        PlaybackSource::Url(track.url.clone())
    } else {
        PlaybackSource::File(PathBuf::from(&track.url))
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;

    use super::{PlayerState, RepeatMode, Track, TrackPlayer};
    use crate::backend::BackendExit;
    use crate::testutil::{wait_until, FakeBackend};

    fn track(name: &str) -> Track {
        Track {
            url: format!("https://music.test/{name}"),
            title: name.to_string(),
            thumbnail: None,
            duration_seconds: Some(180),
        }
    }

    fn player_with(backend: Arc<FakeBackend>) -> TrackPlayer {
        TrackPlayer::with_seek_debounce(backend, Duration::from_millis(30))
    }

    #[test]
    fn generations_increase_and_stale_callbacks_are_discarded() {
        let backend = Arc::new(FakeBackend::new());
        let player = player_with(Arc::clone(&backend));

        player.play(track("one"), true);
        assert_eq!(player.status().generation, 1);
        player.play(track("two"), true);
        assert_eq!(player.status().generation, 2);

        // The superseded instance exits late; nothing may change.
        backend.fire(0, BackendExit::Completed);
        let status = player.status();
        assert_eq!(status.state, PlayerState::Playing);
        assert_eq!(status.track.expect("track").title, "two");
        assert_eq!(backend.start_count(), 2);
    }

    #[test]
    fn natural_completion_advances_to_the_next_queued_track() {
        let backend = Arc::new(FakeBackend::new());
        let player = player_with(Arc::clone(&backend));

        player.play(track("one"), true);
        player.add_to_queue(track("two"));

        backend.fire(0, BackendExit::Completed);
        assert!(wait_until(|| backend.start_count() == 2));
        assert_eq!(player.status().track.expect("track").title, "two");
    }

    #[test]
    fn manual_stop_suppresses_auto_advance() {
        let backend = Arc::new(FakeBackend::new());
        let player = player_with(Arc::clone(&backend));

        player.play(track("one"), true);
        player.add_to_queue(track("two"));
        player.stop(false);
        assert!(backend.record(0).stopped.load(Ordering::SeqCst));

        backend.fire(0, BackendExit::Failed("killed".to_string()));
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(backend.start_count(), 1);
        assert_eq!(player.status().state, PlayerState::Stopped);
    }

    #[test]
    fn stop_is_idempotent_and_can_clear_the_queue() {
        let backend = Arc::new(FakeBackend::new());
        let player = player_with(Arc::clone(&backend));

        player.play(track("one"), true);
        player.stop(false);
        player.stop(false);
        assert_eq!(player.status().state, PlayerState::Stopped);
        assert_eq!(player.queue_snapshot().len(), 1);

        player.stop(true);
        assert!(player.queue_snapshot().is_empty());
        assert_eq!(player.status().track, None);
    }

    #[test]
    fn repeat_all_wraps_to_the_queue_head() {
        let backend = Arc::new(FakeBackend::new());
        let player = player_with(Arc::clone(&backend));

        player.play(track("one"), true);
        player.play(track("two"), true);
        player.set_repeat_mode(RepeatMode::All);

        player.play_next(true);
        assert_eq!(player.status().track.expect("track").title, "one");
        assert_eq!(backend.start_count(), 3);
    }

    #[test]
    fn repeat_one_replays_the_current_index() {
        let backend = Arc::new(FakeBackend::new());
        let player = player_with(Arc::clone(&backend));

        player.play(track("one"), true);
        player.play(track("two"), true);
        player.set_repeat_mode(RepeatMode::One);

        player.play_next(true);
        assert_eq!(player.status().track.expect("track").title, "two");
    }

    #[test]
    fn repeat_off_stops_at_the_end_of_the_queue() {
        let backend = Arc::new(FakeBackend::new());
        let player = player_with(Arc::clone(&backend));

        player.play(track("only"), true);
        player.play_next(true);

        assert_eq!(player.status().state, PlayerState::Stopped);
        assert_eq!(backend.start_count(), 1);
    }

    #[test]
    fn rapid_seeks_coalesce_into_one_restart() {
        let backend = Arc::new(FakeBackend::new());
        let player = player_with(Arc::clone(&backend));

        player.play(track("one"), true);
        player.seek(Duration::from_secs(5));
        player.seek(Duration::from_secs(10));

        assert!(wait_until(|| backend.start_count() == 2));
        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(backend.start_count(), 2);
        assert_eq!(backend.record(1).offset, Duration::from_secs(10));
    }

    #[test]
    fn native_seek_skips_the_restart_path() {
        let backend = Arc::new(FakeBackend {
            support_seek: true,
            ..FakeBackend::new()
        });
        let player = player_with(Arc::clone(&backend));

        player.play(track("one"), true);
        player.seek(Duration::from_secs(42));

        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(backend.start_count(), 1);
        assert_eq!(
            backend.record(0).seeks.lock().expect("seeks").as_slice(),
            &[Duration::from_secs(42)]
        );
    }

    #[test]
    fn toggle_without_native_pause_restarts_from_recorded_offset() {
        let backend = Arc::new(FakeBackend::new());
        let player = player_with(Arc::clone(&backend));

        player.play(track("one"), true);
        player.toggle();
        assert_eq!(player.status().state, PlayerState::Paused);
        assert!(backend.record(0).stopped.load(Ordering::SeqCst));

        // The killed instance's late exit must not auto-advance.
        backend.fire(0, BackendExit::Failed("killed".to_string()));
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(backend.start_count(), 1);

        player.toggle();
        assert!(wait_until(|| backend.start_count() == 2));
        assert_eq!(player.status().state, PlayerState::Playing);
    }

    #[test]
    fn toggle_with_native_pause_keeps_the_instance() {
        let backend = Arc::new(FakeBackend {
            support_pause: true,
            ..FakeBackend::new()
        });
        let player = player_with(Arc::clone(&backend));

        player.play(track("one"), true);
        player.toggle();
        assert!(backend.record(0).paused.load(Ordering::SeqCst));
        assert_eq!(player.status().state, PlayerState::Paused);

        player.toggle();
        assert!(!backend.record(0).paused.load(Ordering::SeqCst));
        assert_eq!(player.status().state, PlayerState::Playing);
        assert_eq!(backend.start_count(), 1);
    }
}
