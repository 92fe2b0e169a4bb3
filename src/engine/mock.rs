//! Deterministic engine doubles for tests.
//!
//! Each mock reports through a probe: a cloneable bundle of shared handles
//! that stays with the test while the mock itself is moved into the pipeline.
//! Several mock instances built from one probe (one per session) share it.

use crate::engine::{
    AnalysisResult, CommandClassifier, DetectState, EngineError, FrontEndEngine, Recognition,
};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Shared view of every [`MockFrontEnd`] built from it.
#[derive(Debug, Clone)]
pub struct FrontEndProbe {
    feeds: Arc<AtomicUsize>,
    fetches: Arc<AtomicUsize>,
    live: Arc<AtomicUsize>,
    created: Arc<AtomicUsize>,
    last_fed: Arc<Mutex<Vec<i16>>>,
    results_tx: Sender<AnalysisResult>,
    results_rx: Receiver<AnalysisResult>,
}

impl FrontEndProbe {
    pub fn new() -> Self {
        let (results_tx, results_rx) = unbounded();
        Self {
            feeds: Arc::new(AtomicUsize::new(0)),
            fetches: Arc::new(AtomicUsize::new(0)),
            live: Arc::new(AtomicUsize::new(0)),
            created: Arc::new(AtomicUsize::new(0)),
            last_fed: Arc::new(Mutex::new(Vec::new())),
            results_tx,
            results_rx,
        }
    }

    /// Queue an analysis result for the next fetch.
    pub fn push(&self, result: AnalysisResult) {
        // The probe holds the receiver, so this cannot disconnect.
        if self.results_tx.send(result).is_err() {
            log::debug!("mock front-end result queue closed");
        }
    }

    /// Successful feed calls across all instances.
    pub fn feeds(&self) -> usize {
        self.feeds.load(Ordering::SeqCst)
    }

    /// Fetch calls that returned a result.
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Instances currently alive.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Instances ever created.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Copy of the most recently fed chunk.
    pub fn last_fed(&self) -> Vec<i16> {
        self.last_fed
            .lock()
            .map(|chunk| chunk.clone())
            .unwrap_or_default()
    }
}

impl Default for FrontEndProbe {
    fn default() -> Self {
        Self::new()
    }
}

/// Front-end double: results come from [`FrontEndProbe::push`], feeds are counted.
#[derive(Debug)]
pub struct MockFrontEnd {
    chunk_size: usize,
    echo_feeds: bool,
    fail_feed: bool,
    fail_fetch: Arc<AtomicBool>,
    probe: FrontEndProbe,
}

impl MockFrontEnd {
    pub fn new(chunk_size: usize) -> Self {
        Self::with_probe(chunk_size, &FrontEndProbe::new())
    }

    /// Build an instance reporting into an existing probe.
    pub fn with_probe(chunk_size: usize, probe: &FrontEndProbe) -> Self {
        probe.live.fetch_add(1, Ordering::SeqCst);
        probe.created.fetch_add(1, Ordering::SeqCst);
        Self {
            chunk_size,
            echo_feeds: false,
            fail_feed: false,
            fail_fetch: Arc::new(AtomicBool::new(false)),
            probe: probe.clone(),
        }
    }

    /// Turn every fed chunk into a plain analysis result.
    pub fn with_echo(mut self) -> Self {
        self.echo_feeds = true;
        self
    }

    /// Reject every feed.
    pub fn with_feed_failure(mut self) -> Self {
        self.fail_feed = true;
        self
    }

    /// Fail every fetch.
    pub fn with_fetch_failure(self) -> Self {
        self.fail_fetch.store(true, Ordering::SeqCst);
        self
    }

    pub fn probe(&self) -> FrontEndProbe {
        self.probe.clone()
    }
}

impl Drop for MockFrontEnd {
    fn drop(&mut self) {
        self.probe.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FrontEndEngine for MockFrontEnd {
    fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn feed(&self, samples: &[i16]) -> Result<(), EngineError> {
        if self.fail_feed {
            return Err(EngineError::Feed("mock feed failure".to_string()));
        }
        self.probe.feeds.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.probe.last_fed.lock() {
            last.clear();
            last.extend_from_slice(samples);
        }
        if self.echo_feeds {
            self.probe.push(AnalysisResult::new(samples.to_vec()));
        }
        Ok(())
    }

    fn fetch(&self, timeout: Duration) -> Result<Option<AnalysisResult>, EngineError> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            std::thread::sleep(timeout);
            return Err(EngineError::Fetch("mock fetch failure".to_string()));
        }
        match self.probe.results_rx.recv_timeout(timeout) {
            Ok(result) => {
                self.probe.fetches.fetch_add(1, Ordering::SeqCst);
                Ok(Some(result))
            }
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(EngineError::Fetch("result queue closed".to_string()))
            }
        }
    }
}

/// Shared view of every [`MockClassifier`] built from it.
#[derive(Debug, Clone, Default)]
pub struct ClassifierProbe {
    states: Arc<Mutex<VecDeque<DetectState>>>,
    results: Arc<Mutex<VecDeque<Vec<Recognition>>>>,
    detects: Arc<AtomicUsize>,
    live: Arc<AtomicUsize>,
    vocabulary: Arc<Mutex<Vec<(u16, String)>>>,
    commits: Arc<AtomicUsize>,
}

impl ClassifierProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the outcome of a future `detect` call. An empty queue means
    /// `StillListening`.
    pub fn push_state(&self, state: DetectState) {
        if let Ok(mut states) = self.states.lock() {
            states.push_back(state);
        }
    }

    /// Queue the candidates returned by a future `results` call.
    pub fn push_results(&self, results: Vec<Recognition>) {
        if let Ok(mut queue) = self.results.lock() {
            queue.push_back(results);
        }
    }

    /// Convenience: the next detect step recognises `text`.
    pub fn push_detection(&self, text: &str) {
        self.push_state(DetectState::Detected);
        self.push_results(vec![Recognition::new(text, None, 1.0)]);
    }

    pub fn detects(&self) -> usize {
        self.detects.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Committed vocabulary of the most recent instance.
    pub fn vocabulary(&self) -> Vec<(u16, String)> {
        self.vocabulary
            .lock()
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    /// Outcomes queued but not yet consumed.
    pub fn pending_states(&self) -> usize {
        self.states.lock().map(|s| s.len()).unwrap_or(0)
    }
}

/// Classifier double: outcomes come from a [`ClassifierProbe`].
#[derive(Debug)]
pub struct MockClassifier {
    probe: ClassifierProbe,
    pending: Vec<(u16, String)>,
    fail_vocabulary: bool,
}

impl MockClassifier {
    pub fn new() -> Self {
        Self::with_probe(&ClassifierProbe::new())
    }

    pub fn with_probe(probe: &ClassifierProbe) -> Self {
        probe.live.fetch_add(1, Ordering::SeqCst);
        Self {
            probe: probe.clone(),
            pending: Vec::new(),
            fail_vocabulary: false,
        }
    }

    /// Reject every vocabulary change.
    pub fn with_vocabulary_failure(mut self) -> Self {
        self.fail_vocabulary = true;
        self
    }

    pub fn probe(&self) -> ClassifierProbe {
        self.probe.clone()
    }
}

impl Default for MockClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MockClassifier {
    fn drop(&mut self) {
        self.probe.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl CommandClassifier for MockClassifier {
    fn detect(&mut self, _samples: &[i16]) -> DetectState {
        self.probe.detects.fetch_add(1, Ordering::SeqCst);
        self.probe
            .states
            .lock()
            .ok()
            .and_then(|mut states| states.pop_front())
            .unwrap_or(DetectState::StillListening)
    }

    fn results(&mut self) -> Vec<Recognition> {
        self.probe
            .results
            .lock()
            .ok()
            .and_then(|mut queue| queue.pop_front())
            .unwrap_or_default()
    }

    fn clear_commands(&mut self) -> Result<(), EngineError> {
        if self.fail_vocabulary {
            return Err(EngineError::Vocabulary("mock vocabulary failure".to_string()));
        }
        self.pending.clear();
        Ok(())
    }

    fn add_command(&mut self, id: u16, phrase: &str) -> Result<(), EngineError> {
        if self.fail_vocabulary {
            return Err(EngineError::Vocabulary("mock vocabulary failure".to_string()));
        }
        self.pending.push((id, phrase.to_string()));
        Ok(())
    }

    fn commit_commands(&mut self) -> Result<(), EngineError> {
        if self.fail_vocabulary {
            return Err(EngineError::Vocabulary("mock vocabulary failure".to_string()));
        }
        if let Ok(mut vocabulary) = self.probe.vocabulary.lock() {
            *vocabulary = self.pending.clone();
        }
        self.probe.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
