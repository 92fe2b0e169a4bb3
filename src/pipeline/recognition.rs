//! Recognition worker: front-end results → wake/command state machine → dispatch.

use crate::actuator::WakeAcknowledger;
use crate::command::{Command, CommandDispatcher};
use crate::defaults::FETCH_TIMEOUT;
use crate::engine::{AnalysisResult, CommandClassifier, DetectState, FrontEndEngine};
use crate::pipeline::error::{CycleError, ErrorReporter};
use crate::pipeline::session::PipelineStats;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

pub(crate) const WORKER_NAME: &str = "recognition";

/// Where the two-phase detector stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DetectionState {
    /// Waiting for the wake phrase.
    #[default]
    Idle,
    /// Wake phrase heard, classifying the command.
    AwaitingCommand,
}

/// What one analysis result did to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Nothing happened.
    Quiet,
    /// Still (or newly) listening for a command.
    Listening,
    /// A command was dispatched.
    Dispatched(Command),
    /// The classifier finished without a usable phrase.
    Discarded,
    /// No command arrived in time.
    TimedOut,
}

/// The wake → command state machine.
///
/// Owns the classifier and the only copy of [`DetectionState`].
pub struct Recognizer {
    classifier: Box<dyn CommandClassifier>,
    dispatcher: Arc<dyn CommandDispatcher>,
    acknowledger: Arc<dyn WakeAcknowledger>,
    state: DetectionState,
}

impl Recognizer {
    pub fn new(
        classifier: Box<dyn CommandClassifier>,
        dispatcher: Arc<dyn CommandDispatcher>,
        acknowledger: Arc<dyn WakeAcknowledger>,
    ) -> Self {
        Self {
            classifier,
            dispatcher,
            acknowledger,
            state: DetectionState::Idle,
        }
    }

    pub fn state(&self) -> DetectionState {
        self.state
    }

    /// Advance the state machine by one analysis result.
    pub fn process(&mut self, result: &AnalysisResult) -> Step {
        if let Some(wake) = &result.wake {
            self.acknowledger.acknowledge(wake);
            self.state = DetectionState::AwaitingCommand;
        }

        if self.state == DetectionState::Idle {
            return Step::Quiet;
        }

        match self.classifier.detect(&result.samples) {
            DetectState::StillListening => Step::Listening,
            DetectState::Detected => {
                // Back to idle whatever the classifier returns, so a stale
                // result is never dispatched twice.
                self.state = DetectionState::Idle;
                self.acknowledger.listening_ended();

                let results = self.classifier.results();
                let Some(best) = results.first() else {
                    log::debug!("Classifier detected a phrase but returned no result");
                    return Step::Discarded;
                };
                let Some(command) = Command::parse(&best.text) else {
                    log::debug!("Classifier returned an empty phrase");
                    return Step::Discarded;
                };

                log::info!(
                    "Recognised '{}' (id {}, probability {:.2})",
                    command,
                    best.command_id
                        .map_or_else(|| "-".to_string(), |id| id.to_string()),
                    best.probability
                );
                self.dispatcher.dispatch(&command);
                Step::Dispatched(command)
            }
            DetectState::Timeout => {
                self.state = DetectionState::Idle;
                self.acknowledger.listening_ended();
                log::info!("No command heard, back to waiting for the wake phrase");
                Step::TimedOut
            }
        }
    }
}

/// State owned by the recognition worker for the lifetime of a session.
pub struct RecognitionWorker {
    front_end: Arc<dyn FrontEndEngine>,
    recognizer: Recognizer,
    fetch_timeout: Duration,
    running: Arc<AtomicBool>,
    stats: Arc<PipelineStats>,
    reporter: Arc<dyn ErrorReporter>,
}

impl RecognitionWorker {
    pub(crate) fn new(
        front_end: Arc<dyn FrontEndEngine>,
        recognizer: Recognizer,
        running: Arc<AtomicBool>,
        stats: Arc<PipelineStats>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self {
            front_end,
            recognizer,
            fetch_timeout: FETCH_TIMEOUT,
            running,
            stats,
            reporter,
        }
    }

    pub fn state(&self) -> DetectionState {
        self.recognizer.state()
    }

    /// Loop until the running flag clears.
    pub(crate) fn run(&mut self) {
        while self.running.load(Ordering::SeqCst) {
            if let Err(error) = self.cycle() {
                self.reporter.report(WORKER_NAME, &error);
            }
        }
    }

    /// Fetch one result and run it through the state machine.
    pub(crate) fn cycle(&mut self) -> Result<Option<Step>, CycleError> {
        let result = match self.front_end.fetch(self.fetch_timeout) {
            Ok(Some(result)) => result,
            Ok(None) => return Ok(None),
            Err(e) => {
                PipelineStats::bump(&self.stats.fetch_errors);
                return Err(CycleError::Engine(e.to_string()));
            }
        };

        PipelineStats::bump(&self.stats.results);
        if result.wake.is_some() {
            PipelineStats::bump(&self.stats.wake_events);
        }

        let step = self.recognizer.process(&result);
        match &step {
            Step::Dispatched(_) => PipelineStats::bump(&self.stats.commands_dispatched),
            Step::TimedOut => PipelineStats::bump(&self.stats.command_timeouts),
            _ => {}
        }
        Ok(Some(step))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::LogAcknowledger;
    use crate::command::CollectingDispatcher;
    use crate::engine::mock::ClassifierProbe;
    use crate::engine::{MockClassifier, MockFrontEnd, Recognition, WakeEvent};
    use crate::pipeline::error::LogReporter;
    use std::sync::atomic::AtomicUsize;

    fn recognizer() -> (Recognizer, ClassifierProbe, CollectingDispatcher) {
        let classifier = MockClassifier::new();
        let probe = classifier.probe();
        let dispatcher = CollectingDispatcher::new();
        let recognizer = Recognizer::new(
            Box::new(classifier),
            Arc::new(dispatcher.clone()),
            Arc::new(LogAcknowledger),
        );
        (recognizer, probe, dispatcher)
    }

    fn wake() -> AnalysisResult {
        AnalysisResult::new(vec![0; 4]).with_wake(0, 1)
    }

    fn plain() -> AnalysisResult {
        AnalysisResult::new(vec![0; 4])
    }

    #[test]
    fn test_starts_idle() {
        let (recognizer, _, _) = recognizer();
        assert_eq!(recognizer.state(), DetectionState::Idle);
    }

    #[test]
    fn test_wake_then_detected_dispatches_once() {
        let (mut recognizer, probe, dispatcher) = recognizer();

        assert_eq!(recognizer.process(&wake()), Step::Listening);
        assert_eq!(recognizer.state(), DetectionState::AwaitingCommand);

        probe.push_detection("light on");
        let step = recognizer.process(&plain());

        assert_eq!(step, Step::Dispatched(Command::parse("light on").unwrap()));
        assert_eq!(dispatcher.commands(), vec!["light on"]);
        assert_eq!(recognizer.state(), DetectionState::Idle);

        // Further results stay quiet.
        assert_eq!(recognizer.process(&plain()), Step::Quiet);
        assert_eq!(dispatcher.count(), 1);
    }

    #[test]
    fn test_detection_on_the_wake_chunk_itself() {
        let (mut recognizer, probe, dispatcher) = recognizer();
        probe.push_detection("light off");

        recognizer.process(&wake());

        assert_eq!(dispatcher.commands(), vec!["light off"]);
        assert_eq!(recognizer.state(), DetectionState::Idle);
    }

    #[test]
    fn test_wake_then_timeout_dispatches_nothing() {
        let (mut recognizer, probe, dispatcher) = recognizer();

        recognizer.process(&wake());
        probe.push_state(DetectState::Timeout);

        assert_eq!(recognizer.process(&plain()), Step::TimedOut);
        assert_eq!(dispatcher.count(), 0);
        assert_eq!(recognizer.state(), DetectionState::Idle);
    }

    #[test]
    fn test_idle_ignores_classifier() {
        let (mut recognizer, probe, dispatcher) = recognizer();
        probe.push_detection("light on");
        probe.push_state(DetectState::Timeout);

        assert_eq!(recognizer.process(&plain()), Step::Quiet);
        assert_eq!(recognizer.process(&plain()), Step::Quiet);

        assert_eq!(probe.detects(), 0);
        assert_eq!(probe.pending_states(), 2);
        assert_eq!(dispatcher.count(), 0);
    }

    #[test]
    fn test_detected_without_result_returns_to_idle() {
        let (mut recognizer, probe, dispatcher) = recognizer();
        recognizer.process(&wake());
        probe.push_state(DetectState::Detected);

        assert_eq!(recognizer.process(&plain()), Step::Discarded);
        assert_eq!(recognizer.state(), DetectionState::Idle);
        assert_eq!(dispatcher.count(), 0);
    }

    #[test]
    fn test_whitespace_only_phrase_is_discarded() {
        let (mut recognizer, probe, dispatcher) = recognizer();
        recognizer.process(&wake());
        probe.push_state(DetectState::Detected);
        probe.push_results(vec![Recognition::new(" \t\r\n", Some(1), 0.5)]);

        assert_eq!(recognizer.process(&plain()), Step::Discarded);
        assert_eq!(dispatcher.count(), 0);
    }

    #[test]
    fn test_dispatched_phrase_is_trimmed() {
        let (mut recognizer, probe, dispatcher) = recognizer();
        recognizer.process(&wake());
        probe.push_state(DetectState::Detected);
        probe.push_results(vec![Recognition::new("  light on\r\n", Some(1), 0.9)]);

        recognizer.process(&plain());

        assert_eq!(dispatcher.commands(), vec!["light on"]);
    }

    #[test]
    fn test_repeated_wake_is_idempotent() {
        let (mut recognizer, probe, _) = recognizer();
        recognizer.process(&wake());
        recognizer.process(&wake());

        assert_eq!(recognizer.state(), DetectionState::AwaitingCommand);
        assert_eq!(probe.detects(), 2);
    }

    #[test]
    fn test_acknowledger_called_per_wake() {
        let acks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&acks);
        let ack = move |_: &WakeEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        };
        let mut recognizer = Recognizer::new(
            Box::new(MockClassifier::new()),
            Arc::new(CollectingDispatcher::new()),
            Arc::new(ack),
        );

        recognizer.process(&wake());
        recognizer.process(&plain());
        recognizer.process(&wake());

        assert_eq!(acks.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_worker_cycle_counts_and_absorbs_fetch_errors() {
        let (recognizer, probe, dispatcher) = recognizer();
        let front_end = MockFrontEnd::new(4);
        let results = front_end.probe();
        let stats = Arc::new(PipelineStats::new());
        let mut worker = RecognitionWorker::new(
            Arc::new(front_end),
            recognizer,
            Arc::new(AtomicBool::new(true)),
            Arc::clone(&stats),
            Arc::new(LogReporter),
        );
        worker.fetch_timeout = Duration::from_millis(5);

        assert_eq!(worker.cycle(), Ok(None));

        probe.push_detection("light on");
        results.push(wake());
        assert!(matches!(worker.cycle(), Ok(Some(Step::Dispatched(_)))));

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.results, 1);
        assert_eq!(snapshot.wake_events, 1);
        assert_eq!(snapshot.commands_dispatched, 1);
        assert_eq!(dispatcher.count(), 1);
        assert_eq!(worker.state(), DetectionState::Idle);
    }

    #[test]
    fn test_worker_fetch_error() {
        let (recognizer, _, _) = recognizer();
        let stats = Arc::new(PipelineStats::new());
        let mut worker = RecognitionWorker::new(
            Arc::new(MockFrontEnd::new(4).with_fetch_failure()),
            recognizer,
            Arc::new(AtomicBool::new(true)),
            Arc::clone(&stats),
            Arc::new(LogReporter),
        );
        worker.fetch_timeout = Duration::from_millis(1);

        assert!(matches!(worker.cycle(), Err(CycleError::Engine(_))));
        assert_eq!(stats.snapshot().fetch_errors, 1);
    }
}
