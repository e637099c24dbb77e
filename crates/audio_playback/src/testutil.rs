//! Shared fakes for engine tests. The engines only see the backend traits,
//! so every generation/ordering property is exercised without real audio.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::backend::{BackendExit, BackendInstance, CompletionFn, PlaybackBackend, PlaybackSource};
use crate::error::PlaybackError;

pub(crate) struct StartRecord {
    pub source: PlaybackSource,
    pub offset: Duration,
    /// File contents at start time, captured before the engine deletes the
    /// scratch file.
    pub bytes: Option<Vec<u8>>,
    pub on_exit: Mutex<Option<CompletionFn>>,
    pub stopped: AtomicBool,
    pub paused: AtomicBool,
    pub seeks: Mutex<Vec<Duration>>,
}

pub(crate) struct FakeBackend {
    pub starts: Arc<Mutex<Vec<Arc<StartRecord>>>>,
    pub auto_complete: bool,
    pub support_pause: bool,
    pub support_seek: bool,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            starts: Arc::new(Mutex::new(Vec::new())),
            auto_complete: false,
            support_pause: false,
            support_seek: false,
        }
    }

    pub fn auto_completing() -> Self {
        Self {
            auto_complete: true,
            ..Self::new()
        }
    }

    pub fn start_count(&self) -> usize {
        self.starts.lock().expect("starts lock").len()
    }

    pub fn record(&self, index: usize) -> Arc<StartRecord> {
        Arc::clone(&self.starts.lock().expect("starts lock")[index])
    }

    /// Deliver the exit callback captured at start time, exactly once.
    pub fn fire(&self, index: usize, exit: BackendExit) {
        let callback = self
            .record(index)
            .on_exit
            .lock()
            .expect("on_exit lock")
            .take();
        if let Some(callback) = callback {
            callback(exit);
        }
    }
}

impl PlaybackBackend for FakeBackend {
    fn start(
        &self,
        source: &PlaybackSource,
        offset: Duration,
        on_exit: CompletionFn,
    ) -> Result<Box<dyn BackendInstance>, PlaybackError> {
        let bytes = match source {
            PlaybackSource::File(path) => std::fs::read(path).ok(),
            PlaybackSource::Url(_) => None,
        };

        let record = Arc::new(StartRecord {
            source: source.clone(),
            offset,
            bytes,
            on_exit: Mutex::new(Some(on_exit)),
            stopped: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            seeks: Mutex::new(Vec::new()),
        });
        self.starts.lock().expect("starts lock").push(Arc::clone(&record));

        if self.auto_complete {
            let callback = record.on_exit.lock().expect("on_exit lock").take();
            if let Some(callback) = callback {
                callback(BackendExit::Completed);
            }
        }

        Ok(Box::new(FakeInstance {
            record,
            support_pause: self.support_pause,
            support_seek: self.support_seek,
        }))
    }
}

struct FakeInstance {
    record: Arc<StartRecord>,
    support_pause: bool,
    support_seek: bool,
}

impl BackendInstance for FakeInstance {
    fn stop(&mut self) {
        self.record.stopped.store(true, Ordering::SeqCst);
    }

    fn pause(&mut self) -> bool {
        if self.support_pause {
            self.record.paused.store(true, Ordering::SeqCst);
        }
        self.support_pause
    }

    fn resume(&mut self) -> bool {
        if self.support_pause {
            self.record.paused.store(false, Ordering::SeqCst);
        }
        self.support_pause
    }

    fn seek(&mut self, position: Duration) -> bool {
        if self.support_seek {
            self.record.seeks.lock().expect("seeks lock").push(position);
        }
        self.support_seek
    }
}

/// Poll until `condition` holds or two seconds elapse.
pub(crate) fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while std::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}
