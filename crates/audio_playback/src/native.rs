use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::{mpsc, Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use log::warn;
use rodio::{Decoder, OutputStream, Sink, Source};

use crate::backend::{BackendExit, BackendInstance, CompletionFn, PlaybackBackend, PlaybackSource};
use crate::error::PlaybackError;

const START_REPLY_TIMEOUT: Duration = Duration::from_secs(10);

struct StartCommand {
    path: PathBuf,
    offset: Duration,
    reply: mpsc::Sender<Result<Arc<Sink>, PlaybackError>>,
    on_exit: CompletionFn,
}

/// Managed in-process playback through a rodio sink.
///
/// The `OutputStream` is not `Send`, so a dedicated audio thread owns it and
/// serves start commands over a channel. The thread blocks on the current
/// sink until it drains or is stopped, which keeps the output stream alive
/// exactly as long as its sink; the engines always stop the previous
/// instance before starting a new one, so command latency stays bounded.
pub struct NativeBackend {
    commands: Mutex<mpsc::Sender<StartCommand>>,
}

impl NativeBackend {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("native-audio".to_string())
            .spawn(move || audio_thread(rx))
            .expect("audio thread must spawn");

        Self {
            commands: Mutex::new(tx),
        }
    }
}

impl Default for NativeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackBackend for NativeBackend {
    fn start(
        &self,
        source: &PlaybackSource,
        offset: Duration,
        on_exit: CompletionFn,
    ) -> Result<Box<dyn BackendInstance>, PlaybackError> {
        let path = match source {
            PlaybackSource::File(path) => path.clone(),
            PlaybackSource::Url(url) => {
                return Err(PlaybackError::UnsupportedSource(format!(
                    "native sink cannot stream {url}"
                )));
            }
        };

        let (reply_tx, reply_rx) = mpsc::channel();
        lock_unpoisoned(&self.commands)
            .send(StartCommand {
                path,
                offset,
                reply: reply_tx,
                on_exit,
            })
            .map_err(|_| PlaybackError::Backend("audio thread is gone".to_string()))?;

        let sink = reply_rx
            .recv_timeout(START_REPLY_TIMEOUT)
            .map_err(|_| PlaybackError::Backend("audio thread did not answer".to_string()))??;

        Ok(Box::new(NativeInstance { sink }))
    }
}

fn audio_thread(commands: mpsc::Receiver<StartCommand>) {
    while let Ok(command) = commands.recv() {
        let StartCommand {
            path,
            offset,
            reply,
            on_exit,
        } = command;

        let prepared = prepare_sink(&path, offset);
        match prepared {
            Ok((stream, sink)) => {
                let sink = Arc::new(sink);
                if reply.send(Ok(Arc::clone(&sink))).is_err() {
                    // Caller gave up; tear the sink down and move on.
                    sink.stop();
                    continue;
                }
                sink.sleep_until_end();
                drop(stream);
                on_exit(BackendExit::Completed);
            }
            Err(error) => {
                let _ = reply.send(Err(error));
            }
        }
    }
}

fn prepare_sink(path: &PathBuf, offset: Duration) -> Result<(OutputStream, Sink), PlaybackError> {
    let (stream, handle) =
        OutputStream::try_default().map_err(|error| PlaybackError::Device(error.to_string()))?;
    let sink = Sink::try_new(&handle).map_err(|error| PlaybackError::Device(error.to_string()))?;

    let file = File::open(path).map_err(|error| PlaybackError::io("opening", path, error))?;
    let decoder =
        Decoder::new(BufReader::new(file)).map_err(|error| PlaybackError::Decode(error.to_string()))?;

    if offset.is_zero() {
        sink.append(decoder);
    } else {
        sink.append(decoder.skip_duration(offset));
    }

    Ok((stream, sink))
}

struct NativeInstance {
    sink: Arc<Sink>,
}

impl BackendInstance for NativeInstance {
    fn stop(&mut self) {
        self.sink.stop();
    }

    fn pause(&mut self) -> bool {
        self.sink.pause();
        true
    }

    fn resume(&mut self) -> bool {
        self.sink.play();
        true
    }

    fn seek(&mut self, position: Duration) -> bool {
        match self.sink.try_seek(position) {
            Ok(()) => true,
            Err(error) => {
                warn!("native seek unsupported for current source: {error:?}");
                false
            }
        }
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
