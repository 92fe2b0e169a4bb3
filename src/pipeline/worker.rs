//! Pinned worker threads with an exit signal.
//!
//! A worker owns its state while it runs and hands it back on join, so the
//! controller can release devices and buffers only after the thread is gone.

use crate::error::VoicectlError;
use crate::sys;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How to schedule a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSpec {
    pub name: &'static str,
    /// Processing unit to pin to, `None` to leave it to the scheduler.
    pub core: Option<usize>,
    pub stack_kib: usize,
}

/// A worker that could not be started, with the state it would have owned.
///
/// The state never reaches a thread that failed to start, so it always
/// comes back and the caller can release what it holds.
pub struct SpawnFailure<S> {
    pub error: VoicectlError,
    pub state: S,
}

impl<S> std::fmt::Debug for SpawnFailure<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpawnFailure")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

/// Sends on drop, so the signal fires on normal return and on unwind alike.
struct ExitSignal(Sender<()>);

impl Drop for ExitSignal {
    fn drop(&mut self) {
        if self.0.try_send(()).is_err() {
            log::debug!("exit signal already sent");
        }
    }
}

/// Runs one worker in a dedicated thread.
pub struct WorkerHandle<S> {
    name: &'static str,
    handle: Option<JoinHandle<Option<S>>>,
    exited_rx: Receiver<()>,
    exited: bool,
}

impl<S: Send + 'static> WorkerHandle<S> {
    /// Spawn `run` on a new thread owning `state`.
    ///
    /// Returns once the thread is scheduled and pinned. The state moves to
    /// the thread only after that; if the thread cannot be created or pinned
    /// it is handed back in the [`SpawnFailure`].
    pub fn spawn<F>(spec: &WorkerSpec, state: S, run: F) -> Result<Self, SpawnFailure<S>>
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        let name = spec.name;
        let core = spec.core;
        let (ready_tx, ready_rx) = bounded::<std::io::Result<()>>(1);
        let (state_tx, state_rx) = bounded::<S>(1);
        let (exited_tx, exited_rx) = bounded::<()>(1);

        let spawned = thread::Builder::new()
            .name(format!("voicectl-{}", name))
            .stack_size(spec.stack_kib.saturating_mul(1024))
            .spawn(move || {
                let _exit = ExitSignal(exited_tx);
                let pinned = match core {
                    Some(core) => sys::pin_current_thread(core),
                    None => Ok(()),
                };
                let proceed = pinned.is_ok();
                if ready_tx.send(pinned).is_err() || !proceed {
                    return None;
                }
                let mut state = state_rx.recv().ok()?;

                log::debug!("{} worker started (core {:?})", name, core);
                run(&mut state);
                log::debug!("{} worker exiting", name);
                Some(state)
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                return Err(SpawnFailure {
                    error: VoicectlError::WorkerSpawnFailed {
                        worker: name,
                        message: e.to_string(),
                    },
                    state,
                });
            }
        };

        let message = match ready_rx.recv() {
            Ok(Ok(())) => match state_tx.send(state) {
                Ok(()) => {
                    return Ok(Self {
                        name,
                        handle: Some(handle),
                        exited_rx,
                        exited: false,
                    });
                }
                Err(returned) => {
                    return Err(Self::failed(
                        name,
                        handle,
                        "thread exited before taking its state".to_string(),
                        returned.into_inner(),
                    ));
                }
            },
            Ok(Err(e)) => format!(
                "cannot pin to core {}: {}",
                core.map_or_else(|| "?".to_string(), |c| c.to_string()),
                e
            ),
            Err(_) => "thread died before reporting ready".to_string(),
        };

        Err(Self::failed(name, handle, message, state))
    }

    fn failed(
        name: &'static str,
        handle: JoinHandle<Option<S>>,
        message: String,
        state: S,
    ) -> SpawnFailure<S> {
        if handle.join().is_err() {
            log::debug!("{} worker panicked before starting", name);
        }
        SpawnFailure {
            error: VoicectlError::WorkerSpawnFailed {
                worker: name,
                message,
            },
            state,
        }
    }

    /// Block until the worker signals exit, warning every `warn_every`.
    ///
    /// There is no deadline: a worker stuck in a device call keeps the caller
    /// waiting.
    pub fn wait(&mut self, warn_every: Duration) {
        if self.exited {
            return;
        }
        let started = Instant::now();
        loop {
            match self.exited_rx.recv_timeout(warn_every) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => log::warn!(
                    "Still waiting for the {} worker to exit ({:.1}s)",
                    self.name,
                    started.elapsed().as_secs_f32()
                ),
            }
        }
        self.exited = true;
    }

    /// Wait for exit and take the worker state back.
    pub fn join(mut self, warn_every: Duration) -> Result<S, VoicectlError> {
        self.wait(warn_every);
        match self.handle.take() {
            Some(handle) => match handle.join() {
                Ok(Some(state)) => Ok(state),
                Ok(None) | Err(_) => Err(VoicectlError::WorkerPanicked { worker: self.name }),
            },
            None => Err(VoicectlError::WorkerPanicked { worker: self.name }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn spec(name: &'static str, core: Option<usize>) -> WorkerSpec {
        WorkerSpec {
            name,
            core,
            stack_kib: 256,
        }
    }

    #[test]
    fn test_worker_returns_state_on_join() {
        let worker = WorkerHandle::spawn(&spec("adder", None), 1u32, |n| *n += 41).unwrap();
        assert_eq!(worker.join(Duration::from_secs(1)).unwrap(), 42);
    }

    #[test]
    fn test_worker_runs_until_flag_cleared() {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let mut worker = WorkerHandle::spawn(&spec("looper", None), 0u64, move |count| {
            while flag.load(Ordering::SeqCst) {
                *count += 1;
                thread::sleep(Duration::from_millis(1));
            }
        })
        .unwrap();

        thread::sleep(Duration::from_millis(20));
        assert!(worker.exited_rx.is_empty());

        running.store(false, Ordering::SeqCst);
        worker.wait(Duration::from_millis(10));
        assert!(worker.exited);
        assert!(worker.join(Duration::from_secs(1)).unwrap() > 0);
    }

    #[test]
    fn test_pin_failure_hands_state_back() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let result = WorkerHandle::spawn(
            &spec("pinned", Some(sys::available_cores() + 100)),
            "state".to_string(),
            move |_| flag.store(true, Ordering::SeqCst),
        );

        match result {
            Err(SpawnFailure {
                error: VoicectlError::WorkerSpawnFailed { worker, message },
                state,
            }) => {
                assert_eq!(worker, "pinned");
                assert!(message.contains("cannot pin"));
                assert_eq!(state, "state");
            }
            Err(other) => panic!("Expected WorkerSpawnFailed, got {:?}", other),
            Ok(_) => panic!("Expected spawn failure"),
        }
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_thread_creation_failure_hands_state_back() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        // A stack larger than the whole user address space.
        let huge = WorkerSpec {
            name: "huge",
            core: None,
            stack_kib: 1 << 38,
        };

        let result = WorkerHandle::spawn(&huge, vec![1u8, 2, 3], move |_| {
            flag.store(true, Ordering::SeqCst)
        });

        match result {
            Err(SpawnFailure {
                error: VoicectlError::WorkerSpawnFailed { worker, .. },
                state,
            }) => {
                assert_eq!(worker, "huge");
                assert_eq!(state, vec![1, 2, 3]);
            }
            Err(other) => panic!("Expected WorkerSpawnFailed, got {:?}", other),
            Ok(_) => panic!("Expected spawn failure"),
        }
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_panicking_worker_signals_exit() {
        let mut worker =
            WorkerHandle::spawn(&spec("panicky", None), (), |_| panic!("boom")).unwrap();

        worker.wait(Duration::from_millis(50));
        assert!(matches!(
            worker.join(Duration::from_secs(1)),
            Err(VoicectlError::WorkerPanicked { worker: "panicky" })
        ));
    }
}
