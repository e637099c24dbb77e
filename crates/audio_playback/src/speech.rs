use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use log::{debug, warn};

use crate::backend::{BackendExit, BackendInstance, PlaybackBackend, PlaybackSource};
use crate::scratch::ScratchStorage;

/// Payloads below this size are treated as corrupt synthesis output.
pub const MIN_CHUNK_BYTES: usize = 512;

/// Fallback wait so a backend that never signals completion cannot stall
/// the queue indefinitely.
pub const DEFAULT_CHUNK_TIMEOUT: Duration = Duration::from_secs(30);

/// One synthesized-speech payload, consumed exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechChunk {
    pub audio: Vec<u8>,
    pub sentence: Option<String>,
}

type SentenceObserver = Box<dyn Fn(Option<&str>) + Send + Sync>;

/// Strictly FIFO speech playback queue.
///
/// `enqueue` never preempts the chunk currently playing; it (re)arms a
/// single drain worker that pops the head, writes it to scratch storage,
/// plays it to completion (bounded by the chunk timeout), deletes the
/// scratch file, and proceeds. Arming while a drain is already running is
/// a no-op.
#[derive(Clone)]
pub struct SpeechQueue {
    shared: Arc<QueueShared>,
}

struct QueueShared {
    backend: Arc<dyn PlaybackBackend>,
    scratch: Arc<dyn ScratchStorage>,
    queue: Mutex<VecDeque<SpeechChunk>>,
    draining: AtomicBool,
    active: Mutex<Option<Box<dyn BackendInstance>>>,
    current_sentence: Mutex<Option<String>>,
    observer: Mutex<Option<SentenceObserver>>,
    chunk_timeout: Duration,
    min_chunk_bytes: usize,
}

impl SpeechQueue {
    pub fn new(backend: Arc<dyn PlaybackBackend>, scratch: Arc<dyn ScratchStorage>) -> Self {
        Self::with_tuning(backend, scratch, DEFAULT_CHUNK_TIMEOUT, MIN_CHUNK_BYTES)
    }

    pub fn with_tuning(
        backend: Arc<dyn PlaybackBackend>,
        scratch: Arc<dyn ScratchStorage>,
        chunk_timeout: Duration,
        min_chunk_bytes: usize,
    ) -> Self {
        Self {
            shared: Arc::new(QueueShared {
                backend,
                scratch,
                queue: Mutex::new(VecDeque::new()),
                draining: AtomicBool::new(false),
                active: Mutex::new(None),
                current_sentence: Mutex::new(None),
                observer: Mutex::new(None),
                chunk_timeout,
                min_chunk_bytes,
            }),
        }
    }

    /// Register the sentence-change observer. Registered once; a later call
    /// replaces the previous observer.
    pub fn set_sentence_observer(&self, observer: impl Fn(Option<&str>) + Send + Sync + 'static) {
        *lock_unpoisoned(&self.shared.observer) = Some(Box::new(observer));
    }

    /// Sentence text of the chunk currently playing, if any.
    pub fn current_sentence(&self) -> Option<String> {
        lock_unpoisoned(&self.shared.current_sentence).clone()
    }

    pub fn is_draining(&self) -> bool {
        self.shared.draining.load(Ordering::SeqCst)
    }

    pub fn enqueue(&self, chunk: SpeechChunk) {
        lock_unpoisoned(&self.shared.queue).push_back(chunk);
        self.arm_drain();
    }

    /// Stop current playback, empty the queue, and reset the announced
    /// sentence. Used when voice mode is cleared.
    pub fn clear(&self) {
        let shared = &self.shared;
        {
            lock_unpoisoned(&shared.queue).clear();
            if let Some(mut instance) = lock_unpoisoned(&shared.active).take() {
                instance.stop();
            }
            *lock_unpoisoned(&shared.current_sentence) = None;
        }
        notify_sentence(shared, None);
    }

    fn arm_drain(&self) {
        if self.shared.draining.swap(true, Ordering::SeqCst) {
            return;
        }

        let shared = Arc::clone(&self.shared);
        thread::Builder::new()
            .name("speech-drain".to_string())
            .spawn(move || drain(shared))
            .expect("speech drain thread must spawn");
    }
}

fn drain(shared: Arc<QueueShared>) {
    loop {
        let chunk = lock_unpoisoned(&shared.queue).pop_front();
        match chunk {
            Some(chunk) => play_chunk(&shared, chunk),
            None => {
                set_sentence(&shared, None);
                shared.draining.store(false, Ordering::SeqCst);
                // An enqueue may have raced the reset; re-arm once if so.
                if lock_unpoisoned(&shared.queue).is_empty() {
                    return;
                }
                if shared.draining.swap(true, Ordering::SeqCst) {
                    return;
                }
            }
        }
    }
}

fn play_chunk(shared: &Arc<QueueShared>, chunk: SpeechChunk) {
    if chunk.audio.len() < shared.min_chunk_bytes {
        warn!(
            "skipping speech chunk of {} bytes (below {} byte minimum)",
            chunk.audio.len(),
            shared.min_chunk_bytes
        );
        return;
    }

    let path = match shared.scratch.write_temp(&chunk.audio) {
        Ok(path) => path,
        Err(error) => {
            warn!("failed to stage speech chunk: {error}");
            return;
        }
    };

    set_sentence(shared, chunk.sentence.clone());

    let (exit_tx, exit_rx) = mpsc::channel();
    let started = shared.backend.start(
        &PlaybackSource::File(path.clone()),
        Duration::ZERO,
        Box::new(move |exit| {
            let _ = exit_tx.send(exit);
        }),
    );

    match started {
        Ok(instance) => {
            *lock_unpoisoned(&shared.active) = Some(instance);

            match exit_rx.recv_timeout(shared.chunk_timeout) {
                Ok(BackendExit::Completed) => {}
                Ok(BackendExit::Failed(message)) => {
                    warn!("speech chunk playback failed: {message}");
                }
                Err(_) => {
                    warn!(
                        "speech backend never signalled completion within {:?}; moving on",
                        shared.chunk_timeout
                    );
                    if let Some(mut instance) = lock_unpoisoned(&shared.active).take() {
                        instance.stop();
                    }
                }
            }

            lock_unpoisoned(&shared.active).take();
        }
        Err(error) => {
            warn!("failed to start speech chunk playback: {error}");
        }
    }

    shared.scratch.delete(&path);
    debug!("speech chunk finished ({} bytes)", chunk.audio.len());
}

fn set_sentence(shared: &Arc<QueueShared>, sentence: Option<String>) {
    {
        let mut current = lock_unpoisoned(&shared.current_sentence);
        if *current == sentence {
            return;
        }
        *current = sentence.clone();
    }
    notify_sentence(shared, sentence.as_deref());
}

fn notify_sentence(shared: &QueueShared, sentence: Option<&str>) {
    if let Some(observer) = lock_unpoisoned(&shared.observer).as_ref() {
        observer(sentence);
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

    use super::{SpeechChunk, SpeechQueue};
    use crate::backend::{BackendExit, PlaybackBackend};
    use crate::scratch::{ScratchStorage, TempDirScratch};
    use crate::testutil::{wait_until, FakeBackend};

    fn chunk(byte: u8, len: usize, sentence: &str) -> SpeechChunk {
        SpeechChunk {
            audio: vec![byte; len],
            sentence: Some(sentence.to_string()),
        }
    }

    fn queue_with(
        backend: Arc<FakeBackend>,
        timeout: Duration,
        min_bytes: usize,
    ) -> (SpeechQueue, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let scratch = Arc::new(TempDirScratch::in_dir(dir.path()));
        let queue = SpeechQueue::with_tuning(backend, scratch, timeout, min_bytes);
        (queue, dir)
    }

    #[test]
    fn drains_strictly_fifo_regardless_of_enqueue_timing() {
        let backend = Arc::new(FakeBackend::auto_completing());
        let (queue, _dir) = queue_with(Arc::clone(&backend), Duration::from_secs(2), 1);

        queue.enqueue(chunk(b'A', 4, "a"));
        queue.enqueue(chunk(b'B', 4, "b"));
        queue.enqueue(chunk(b'C', 4, "c"));

        assert!(wait_until(|| backend.start_count() == 3));
        let first = backend.record(0).bytes.clone().expect("bytes");
        let second = backend.record(1).bytes.clone().expect("bytes");
        let third = backend.record(2).bytes.clone().expect("bytes");
        assert_eq!((first[0], second[0], third[0]), (b'A', b'B', b'C'));

        // Exactly once each.
        assert!(wait_until(|| !queue.is_draining()));
        assert_eq!(backend.start_count(), 3);
    }

    #[test]
    fn chunks_below_minimum_size_are_skipped_as_corrupt() {
        let backend = Arc::new(FakeBackend::auto_completing());
        let (queue, _dir) = queue_with(Arc::clone(&backend), Duration::from_secs(2), 10);

        queue.enqueue(chunk(b'X', 3, "tiny"));
        queue.enqueue(chunk(b'Y', 32, "real"));

        assert!(wait_until(|| backend.start_count() == 1));
        assert_eq!(backend.record(0).bytes.clone().expect("bytes")[0], b'Y');
    }

    #[test]
    fn timeout_fallback_keeps_the_queue_moving() {
        let backend = Arc::new(FakeBackend::new());
        let (queue, _dir) = queue_with(Arc::clone(&backend), Duration::from_millis(50), 1);

        queue.enqueue(chunk(b'A', 4, "a"));
        queue.enqueue(chunk(b'B', 4, "b"));

        assert!(wait_until(|| backend.start_count() == 2));
        assert!(backend.record(0).stopped.load(Ordering::SeqCst));
    }

    #[test]
    fn scratch_files_are_deleted_after_playback() {
        let backend = Arc::new(FakeBackend::auto_completing());
        let dir = tempfile::tempdir().expect("tempdir");
        let scratch = Arc::new(TempDirScratch::in_dir(dir.path()));
        let queue = SpeechQueue::with_tuning(
            Arc::clone(&backend) as Arc<dyn PlaybackBackend>,
            Arc::clone(&scratch) as Arc<dyn ScratchStorage>,
            Duration::from_secs(2),
            1,
        );

        queue.enqueue(chunk(b'A', 4, "a"));
        assert!(wait_until(|| !queue.is_draining() && backend.start_count() == 1));

        let leftovers = std::fs::read_dir(dir.path()).expect("read_dir").count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn clear_stops_playback_empties_queue_and_resets_sentence() {
        let backend = Arc::new(FakeBackend::new());
        let (queue, _dir) = queue_with(Arc::clone(&backend), Duration::from_secs(5), 1);

        queue.enqueue(chunk(b'A', 4, "first"));
        queue.enqueue(chunk(b'B', 4, "second"));
        assert!(wait_until(|| backend.start_count() == 1));
        assert_eq!(queue.current_sentence().as_deref(), Some("first"));

        queue.clear();
        assert!(backend.record(0).stopped.load(Ordering::SeqCst));
        assert_eq!(queue.current_sentence(), None);

        // Unblock the drain worker; nothing further may start.
        backend.fire(0, BackendExit::Failed("stopped".to_string()));
        assert!(wait_until(|| !queue.is_draining()));
        assert_eq!(backend.start_count(), 1);
    }
}
