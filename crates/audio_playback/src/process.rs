use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use log::warn;

use crate::backend::{BackendExit, BackendInstance, CompletionFn, PlaybackBackend, PlaybackSource};
use crate::error::PlaybackError;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Backend that plays media by spawning an external player process.
///
/// The watcher thread polls the child so a `stop` (kill) from another thread
/// is observed promptly and reported through the exit callback.
#[derive(Debug, Clone)]
pub struct ProcessBackend {
    program: String,
    args: Vec<String>,
    /// Prefix for a start-offset argument, e.g. `--start=`. Absent means
    /// the player cannot seek and the engine falls back to restarts from
    /// the beginning.
    seek_arg_prefix: Option<String>,
}

impl ProcessBackend {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            seek_arg_prefix: None,
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = String>) -> Self {
        self.args.extend(args);
        self
    }

    pub fn with_seek_arg_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.seek_arg_prefix = Some(prefix.into());
        self
    }

    /// macOS system player; no seek support.
    pub fn afplay() -> Self {
        Self::new("afplay")
    }

    /// mpv in headless mode; supports start offsets and stream URLs.
    pub fn mpv() -> Self {
        Self::new("mpv")
            .with_args(["--no-video".to_string(), "--really-quiet".to_string()])
            .with_seek_arg_prefix("--start=")
    }
}

impl PlaybackBackend for ProcessBackend {
    fn start(
        &self,
        source: &PlaybackSource,
        offset: Duration,
        on_exit: CompletionFn,
    ) -> Result<Box<dyn BackendInstance>, PlaybackError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        if !offset.is_zero() {
            match &self.seek_arg_prefix {
                Some(prefix) => {
                    command.arg(format!("{prefix}{}", offset.as_secs_f64()));
                }
                None => warn!(
                    "{} cannot start at an offset; playing from the beginning",
                    self.program
                ),
            }
        }

        command.arg(source.location());

        let child = command
            .spawn()
            .map_err(|error| PlaybackError::Backend(format!("failed to spawn {}: {error}", self.program)))?;
        let child = Arc::new(Mutex::new(child));

        spawn_watcher(Arc::clone(&child), on_exit);

        Ok(Box::new(ProcessInstance { child }))
    }
}

fn spawn_watcher(child: Arc<Mutex<Child>>, on_exit: CompletionFn) {
    thread::spawn(move || {
        let status = loop {
            match lock_unpoisoned(&child).try_wait() {
                Ok(Some(status)) => break Ok(status),
                Ok(None) => thread::sleep(EXIT_POLL_INTERVAL),
                Err(error) => break Err(error),
            }
        };

        let exit = match status {
            Ok(status) if status.success() => BackendExit::Completed,
            Ok(status) => BackendExit::Failed(format!("player exited with {status}")),
            Err(error) => BackendExit::Failed(format!("failed to reap player: {error}")),
        };
        on_exit(exit);
    });
}

struct ProcessInstance {
    child: Arc<Mutex<Child>>,
}

impl BackendInstance for ProcessInstance {
    fn stop(&mut self) {
        let mut child = lock_unpoisoned(&self.child);
        // Already-exited children return an error here; that is fine.
        let _ = child.kill();
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
    use std::sync::mpsc;
    use std::time::Duration;

    use super::ProcessBackend;
    use crate::backend::{BackendExit, PlaybackBackend, PlaybackSource};

    #[test]
    fn completion_fires_when_the_process_exits() {
        // `true` exits immediately with success on any unix.
        let backend = ProcessBackend::new("true");
        let (tx, rx) = mpsc::channel();

        let _instance = backend
            .start(
                &PlaybackSource::Url("ignored".to_string()),
                Duration::ZERO,
                Box::new(move |exit| {
                    let _ = tx.send(exit);
                }),
            )
            .expect("spawn should succeed");

        let exit = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("watcher should report exit");
        assert_eq!(exit, BackendExit::Completed);
    }

    #[test]
    fn stop_kills_a_long_running_process() {
        let backend = ProcessBackend::new("sleep");
        let (tx, rx) = mpsc::channel();

        let mut instance = backend
            .start(
                &PlaybackSource::Url("30".to_string()),
                Duration::ZERO,
                Box::new(move |exit| {
                    let _ = tx.send(exit);
                }),
            )
            .expect("spawn should succeed");

        instance.stop();
        let exit = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("watcher should observe the kill");
        assert!(matches!(exit, BackendExit::Failed(_)));
    }

    #[test]
    fn spawn_failure_is_reported_synchronously() {
        let backend = ProcessBackend::new("definitely-not-a-player-binary");
        let outcome = backend.start(
            &PlaybackSource::Url("x".to_string()),
            Duration::ZERO,
            Box::new(|_| {}),
        );
        assert!(outcome.is_err());
    }
}
