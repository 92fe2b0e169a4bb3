//! Script-driven engine for running the pipeline on a host.
//!
//! The vendor front-end and classifier only exist on the device. On a host
//! the pipeline runs against a script that says at which chunk a wake phrase
//! ends and which command follows it, so the full capture → recognition →
//! dispatch path can be exercised with a real microphone or a WAV file.
//!
//! ```toml
//! period = 560            # optional, replay the script every N chunks
//!
//! [[utterance]]
//! wake_at = 62            # chunk index counted from session start
//! command = "light on"    # omit to let the command time out
//! after = 31              # chunks between wake and recognised command
//! probability = 0.93
//! ```

use crate::defaults::{ENGINE_QUEUE_CHUNKS, samples_for_ms};
use crate::engine::{
    AnalysisResult, CommandClassifier, DetectState, EngineError, FrontEndEngine, Recognition,
};
use crate::error::{Result, VoicectlError};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded, unbounded};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

fn default_after() -> u32 {
    31
}

fn default_probability() -> f32 {
    0.9
}

/// One wake phrase, optionally followed by a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utterance {
    pub wake_at: u64,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default = "default_after")]
    pub after: u32,
    #[serde(default = "default_probability")]
    pub probability: f32,
}

/// Sequence of utterances keyed by chunk index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Script {
    #[serde(default)]
    pub period: Option<u64>,
    #[serde(default, rename = "utterance")]
    pub utterances: Vec<Utterance>,
}

impl Script {
    /// Load a script from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| VoicectlError::ConfigInvalidValue {
            key: "engine.script".to_string(),
            message: format!("{}: {}", path.display(), e),
        })?;
        Self::parse(&content)
    }

    /// Parse and validate a script.
    pub fn parse(content: &str) -> Result<Self> {
        let mut script: Script = toml::from_str(content)?;
        script.utterances.sort_by_key(|u| u.wake_at);
        script.validate()?;
        Ok(script)
    }

    fn validate(&self) -> Result<()> {
        if let Some(period) = self.period {
            if period == 0 {
                return Err(VoicectlError::ConfigInvalidValue {
                    key: "script.period".to_string(),
                    message: "must be positive".to_string(),
                });
            }
            if let Some(last) = self.utterances.iter().map(|u| u.wake_at).max()
                && last >= period
            {
                return Err(VoicectlError::ConfigInvalidValue {
                    key: "script.period".to_string(),
                    message: format!("wake at chunk {} lies outside period {}", last, period),
                });
            }
        }
        for window in self.utterances.windows(2) {
            if window[0].wake_at == window[1].wake_at {
                return Err(VoicectlError::ConfigInvalidValue {
                    key: "script.utterance".to_string(),
                    message: format!("two wakes at chunk {}", window[0].wake_at),
                });
            }
        }
        Ok(())
    }

    /// Built-in demo: "light on", "light off", then a wake that times out,
    /// repeating every 20 seconds.
    ///
    /// Chunks longer than the gaps collapse the schedule onto consecutive
    /// chunks, so the wakes stay distinct and the period positive.
    pub fn demo(sample_rate: u32, chunk_size: usize) -> Self {
        let chunks = |ms: u32| (samples_for_ms(ms, sample_rate) / chunk_size.max(1)) as u64;
        let after = u32::try_from(chunks(1000)).unwrap_or(u32::MAX).max(1);
        let light_on = chunks(2_000);
        let light_off = chunks(6_000).max(light_on + 1);
        let silent = chunks(10_000).max(light_off + 1);
        Self {
            period: Some(chunks(20_000).max(silent + 1)),
            utterances: vec![
                Utterance {
                    wake_at: light_on,
                    command: Some("light on".to_string()),
                    after,
                    probability: 0.93,
                },
                Utterance {
                    wake_at: light_off,
                    command: Some("light off".to_string()),
                    after,
                    probability: 0.88,
                },
                Utterance {
                    wake_at: silent,
                    command: None,
                    after,
                    probability: 0.0,
                },
            ],
        }
    }

    fn wake_at(&self, chunk: u64) -> Option<(usize, &Utterance)> {
        let position = match self.period {
            Some(period) if period > 0 => chunk % period,
            _ => chunk,
        };
        self.utterances
            .iter()
            .enumerate()
            .find(|(_, u)| u.wake_at == position)
    }
}

/// Classifier steps in `timeout_ms` for the given chunk geometry.
pub fn timeout_chunks(timeout_ms: u32, sample_rate: u32, chunk_size: usize) -> u32 {
    let chunks = samples_for_ms(timeout_ms, sample_rate) / chunk_size.max(1);
    u32::try_from(chunks).unwrap_or(u32::MAX).max(1)
}

/// Build a linked front-end and classifier for one session.
pub fn pair(script: Script, chunk_size: usize, timeout_chunks: u32) -> (ScriptedFrontEnd, ScriptedClassifier) {
    let (wake_tx, wake_rx) = unbounded();
    let (results_tx, results_rx) = bounded(ENGINE_QUEUE_CHUNKS);
    let front_end = ScriptedFrontEnd {
        chunk_size,
        script,
        fed: AtomicU64::new(0),
        results_tx,
        results_rx,
        wake_tx,
    };
    let classifier = ScriptedClassifier {
        wake_rx,
        timeout_chunks,
        expected: None,
        elapsed: 0,
        pending: Vec::new(),
        vocabulary: Vec::new(),
        last: Vec::new(),
    };
    (front_end, classifier)
}

/// Front-end that passes audio through and raises wake events from a script.
pub struct ScriptedFrontEnd {
    chunk_size: usize,
    script: Script,
    fed: AtomicU64,
    results_tx: Sender<AnalysisResult>,
    results_rx: Receiver<AnalysisResult>,
    wake_tx: Sender<Utterance>,
}

impl ScriptedFrontEnd {
    /// Chunks accepted so far.
    pub fn fed(&self) -> u64 {
        self.fed.load(Ordering::Relaxed)
    }
}

impl FrontEndEngine for ScriptedFrontEnd {
    fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn feed(&self, samples: &[i16]) -> std::result::Result<(), EngineError> {
        if samples.len() != self.chunk_size {
            return Err(EngineError::Feed(format!(
                "expected {} samples, got {}",
                self.chunk_size,
                samples.len()
            )));
        }

        let chunk = self.fed.fetch_add(1, Ordering::Relaxed);
        let mut result = AnalysisResult::new(samples.to_vec());
        if let Some((index, utterance)) = self.script.wake_at(chunk) {
            result = result.with_wake(0, index + 1);
            if self.wake_tx.send(utterance.clone()).is_err() {
                log::debug!("Scripted classifier gone, wake at chunk {} not forwarded", chunk);
            }
        }

        match self.results_tx.try_send(result) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                Err(EngineError::Feed("analysis queue full".to_string()))
            }
            Err(TrySendError::Disconnected(_)) => {
                Err(EngineError::Feed("analysis queue closed".to_string()))
            }
        }
    }

    fn fetch(&self, timeout: Duration) -> std::result::Result<Option<AnalysisResult>, EngineError> {
        match self.results_rx.recv_timeout(timeout) {
            Ok(result) => Ok(Some(result)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(EngineError::Fetch("analysis queue closed".to_string()))
            }
        }
    }
}

/// Classifier that "hears" whatever command the script placed after the last wake.
pub struct ScriptedClassifier {
    wake_rx: Receiver<Utterance>,
    timeout_chunks: u32,
    expected: Option<Utterance>,
    elapsed: u32,
    pending: Vec<(u16, String)>,
    vocabulary: Vec<(u16, String)>,
    last: Vec<Recognition>,
}

impl ScriptedClassifier {
    fn reset(&mut self) {
        self.expected = None;
        self.elapsed = 0;
    }

    fn lookup(&self, phrase: &str) -> Option<u16> {
        self.vocabulary
            .iter()
            .find(|(_, p)| p == phrase)
            .map(|(id, _)| *id)
    }
}

impl CommandClassifier for ScriptedClassifier {
    fn detect(&mut self, _samples: &[i16]) -> DetectState {
        // A newer wake restarts the listening window.
        while let Ok(utterance) = self.wake_rx.try_recv() {
            self.expected = Some(utterance);
            self.elapsed = 0;
        }

        self.elapsed += 1;

        let heard = self.expected.as_ref().and_then(|u| {
            u.command
                .as_ref()
                .filter(|_| self.elapsed >= u.after)
                .map(|command| (command.clone(), u.probability))
        });
        if let Some((command, probability)) = heard {
            let id = self.lookup(command.trim());
            self.last = vec![Recognition::new(&command, id, probability)];
            self.reset();
            return DetectState::Detected;
        }

        if self.elapsed >= self.timeout_chunks {
            self.reset();
            return DetectState::Timeout;
        }
        DetectState::StillListening
    }

    fn results(&mut self) -> Vec<Recognition> {
        std::mem::take(&mut self.last)
    }

    fn clear_commands(&mut self) -> std::result::Result<(), EngineError> {
        self.pending.clear();
        Ok(())
    }

    fn add_command(&mut self, id: u16, phrase: &str) -> std::result::Result<(), EngineError> {
        let phrase = phrase.trim();
        if phrase.is_empty() {
            return Err(EngineError::Vocabulary(format!("command {} has an empty phrase", id)));
        }
        if self.pending.iter().any(|(existing, _)| *existing == id) {
            return Err(EngineError::Vocabulary(format!("duplicate command id {}", id)));
        }
        self.pending.push((id, phrase.to_string()));
        Ok(())
    }

    fn commit_commands(&mut self) -> std::result::Result<(), EngineError> {
        self.vocabulary = self.pending.clone();
        log::debug!("Scripted classifier vocabulary: {:?}", self.vocabulary);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCRIPT: &str = r#"
[[utterance]]
wake_at = 5
command = "light off"
after = 2

[[utterance]]
wake_at = 1
command = "light on"
after = 3
probability = 0.75
"#;

    fn feed_n(front_end: &ScriptedFrontEnd, n: usize) -> Vec<AnalysisResult> {
        (0..n)
            .map(|_| {
                front_end.feed(&[0; 4]).unwrap();
                front_end.fetch(Duration::from_millis(10)).unwrap().unwrap()
            })
            .collect()
    }

    #[test]
    fn test_parse_sorts_utterances() {
        let script = Script::parse(SCRIPT).unwrap();
        assert_eq!(script.utterances[0].wake_at, 1);
        assert_eq!(script.utterances[0].probability, 0.75);
        assert_eq!(script.utterances[1].after, 2);
        assert_eq!(script.utterances[1].probability, default_probability());
    }

    #[test]
    fn test_parse_rejects_wake_outside_period() {
        let result = Script::parse("period = 3\n[[utterance]]\nwake_at = 3\n");
        match result {
            Err(VoicectlError::ConfigInvalidValue { key, .. }) => assert_eq!(key, "script.period"),
            other => panic!("Expected ConfigInvalidValue, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_duplicate_wakes() {
        let result = Script::parse("[[utterance]]\nwake_at = 3\n[[utterance]]\nwake_at = 3\n");
        assert!(matches!(result, Err(VoicectlError::ConfigInvalidValue { .. })));
    }

    #[test]
    fn test_front_end_raises_wake_at_scripted_chunk() {
        let (front_end, _classifier) = pair(Script::parse(SCRIPT).unwrap(), 4, 10);

        let results = feed_n(&front_end, 6);

        let wakes: Vec<usize> = results
            .iter()
            .enumerate()
            .filter(|(_, r)| r.wake.is_some())
            .map(|(i, _)| i)
            .collect();
        assert_eq!(wakes, vec![1, 5]);
        assert_eq!(results[5].wake.map(|w| w.word_index), Some(2));
    }

    #[test]
    fn test_front_end_rejects_wrong_chunk_size() {
        let (front_end, _classifier) = pair(Script::default(), 4, 10);
        assert!(matches!(front_end.feed(&[0; 3]), Err(EngineError::Feed(_))));
        assert_eq!(front_end.fed(), 0);
    }

    #[test]
    fn test_front_end_reports_full_queue() {
        let (front_end, _classifier) = pair(Script::default(), 1, 10);
        for _ in 0..ENGINE_QUEUE_CHUNKS {
            front_end.feed(&[0]).unwrap();
        }
        assert!(matches!(front_end.feed(&[0]), Err(EngineError::Feed(_))));
    }

    #[test]
    fn test_period_repeats_wakes() {
        let script = Script::parse("period = 3\n[[utterance]]\nwake_at = 0\n").unwrap();
        let (front_end, _classifier) = pair(script, 4, 10);

        let results = feed_n(&front_end, 7);

        let wakes = results.iter().filter(|r| r.wake.is_some()).count();
        assert_eq!(wakes, 3);
    }

    #[test]
    fn test_classifier_detects_command_after_delay() {
        let (front_end, mut classifier) = pair(Script::parse(SCRIPT).unwrap(), 4, 10);
        classifier.add_command(1, "light on").unwrap();
        classifier.commit_commands().unwrap();

        feed_n(&front_end, 2);
        assert_eq!(classifier.detect(&[0; 4]), DetectState::StillListening);
        assert_eq!(classifier.detect(&[0; 4]), DetectState::StillListening);
        assert_eq!(classifier.detect(&[0; 4]), DetectState::Detected);

        let results = classifier.results();
        assert_eq!(results, vec![Recognition::new("light on", Some(1), 0.75)]);
        assert!(classifier.results().is_empty());
    }

    #[test]
    fn test_classifier_times_out_without_command() {
        let script = Script::parse("[[utterance]]\nwake_at = 0\n").unwrap();
        let (front_end, mut classifier) = pair(script, 4, 3);

        feed_n(&front_end, 1);

        assert_eq!(classifier.detect(&[0; 4]), DetectState::StillListening);
        assert_eq!(classifier.detect(&[0; 4]), DetectState::StillListening);
        assert_eq!(classifier.detect(&[0; 4]), DetectState::Timeout);
    }

    #[test]
    fn test_classifier_reports_unregistered_phrase_without_id() {
        let script = Script::parse("[[utterance]]\nwake_at = 0\ncommand = \"open door\"\nafter = 1\n").unwrap();
        let (front_end, mut classifier) = pair(script, 4, 10);

        feed_n(&front_end, 1);

        assert_eq!(classifier.detect(&[0; 4]), DetectState::Detected);
        assert_eq!(classifier.results()[0].command_id, None);
    }

    #[test]
    fn test_classifier_rejects_duplicate_ids() {
        let (_front_end, mut classifier) = pair(Script::default(), 4, 10);
        classifier.add_command(1, "light on").unwrap();
        assert!(matches!(
            classifier.add_command(1, "light off"),
            Err(EngineError::Vocabulary(_))
        ));
        assert!(matches!(
            classifier.add_command(2, "   "),
            Err(EngineError::Vocabulary(_))
        ));
    }

    #[test]
    fn test_timeout_chunks() {
        assert_eq!(timeout_chunks(5760, 16000, 512), 180);
        assert_eq!(timeout_chunks(0, 16000, 512), 1);
    }

    #[test]
    fn test_demo_script_is_valid() {
        let script = Script::demo(16000, 512);
        assert!(script.validate().is_ok());
        assert_eq!(script.utterances.len(), 3);
    }

    #[test]
    fn test_demo_script_with_chunk_longer_than_period() {
        let script = Script::demo(16000, 400_000);
        assert!(script.validate().is_ok());
        assert_eq!(script.period, Some(3));
        let wakes: Vec<u64> = script.utterances.iter().map(|u| u.wake_at).collect();
        assert_eq!(wakes, vec![0, 1, 2]);

        let (front_end, _classifier) = pair(script, 4, 10);
        let results = feed_n(&front_end, 4);
        assert_eq!(results.iter().filter(|r| r.wake.is_some()).count(), 4);
    }

    #[test]
    fn test_zero_period_does_not_repeat() {
        let script = Script {
            period: Some(0),
            utterances: vec![Utterance {
                wake_at: 1,
                command: None,
                after: 1,
                probability: 0.0,
            }],
        };
        let (front_end, _classifier) = pair(script, 4, 10);

        let results = feed_n(&front_end, 3);

        assert!(results[0].wake.is_none());
        assert!(results[1].wake.is_some());
        assert!(results[2].wake.is_none());
    }
}
