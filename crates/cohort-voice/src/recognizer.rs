//! Speech-command recognizer supervisor
//!
//! Keeps a continuous recognition backend running and turns final
//! transcripts into scene commands. Error handling:
//! - `no-speech` is routine and ignored
//! - `aborted` is logged and ends supervision without a restart
//! - anything else is logged; the backend decides whether it ends
//!
//! Any end that was not requested through [`CommandRecognizer::stop`] is
//! followed by a restart.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use cohort_core::CohortResult;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Pause before restarting a backend that ended on its own
pub const RESTART_DELAY: Duration = Duration::from_millis(100);

/// Recognition error classes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionError {
    NoSpeech,
    Aborted,
    Other(String),
}

impl fmt::Display for RecognitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecognitionError::NoSpeech => write!(f, "no-speech"),
            RecognitionError::Aborted => write!(f, "aborted"),
            RecognitionError::Other(msg) => write!(f, "{msg}"),
        }
    }
}

/// Backend output
#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionEvent {
    Transcript { text: String, is_final: bool },
    Error(RecognitionError),
    Ended,
}

/// Continuous speech recognition provider
#[async_trait]
pub trait RecognitionBackend: Send {
    async fn start(&mut self) -> CohortResult<mpsc::Receiver<RecognitionEvent>>;

    async fn stop(&mut self);
}

/// Scene commands understood by voice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechCommand {
    Reset,
    ScaleUp,
    ScaleDown,
}

/// Map a transcript to a command
pub fn parse_command(transcript: &str) -> Option<SpeechCommand> {
    let text = transcript.to_lowercase();
    if text.contains("reset") {
        Some(SpeechCommand::Reset)
    } else if ["zoom in", "bigger", "enhance"].iter().any(|w| text.contains(w)) {
        Some(SpeechCommand::ScaleUp)
    } else if ["zoom out", "smaller"].iter().any(|w| text.contains(w)) {
        Some(SpeechCommand::ScaleDown)
    } else {
        None
    }
}

/// How supervision ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognizerExit {
    Stopped,
    Aborted,
    Failed(String),
}

/// Supervised recognition task
pub struct CommandRecognizer {
    stop: watch::Sender<bool>,
    task: Option<JoinHandle<RecognizerExit>>,
}

impl CommandRecognizer {
    /// Start supervising `backend`, sending commands to `commands`
    pub fn spawn(
        backend: Box<dyn RecognitionBackend>,
        commands: mpsc::Sender<SpeechCommand>,
    ) -> Self {
        let (stop, stop_rx) = watch::channel(false);
        let task = tokio::spawn(supervise(backend, commands, stop_rx));
        Self {
            stop,
            task: Some(task),
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    /// Intentional stop; no restart follows
    pub async fn stop(&mut self) -> Option<RecognizerExit> {
        let _ = self.stop.send(true);
        let task = self.task.take()?;
        task.await.ok()
    }
}

impl Drop for CommandRecognizer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

enum Ending {
    Ended,
    Aborted,
    Stopped,
}

async fn supervise(
    mut backend: Box<dyn RecognitionBackend>,
    commands: mpsc::Sender<SpeechCommand>,
    mut stop: watch::Receiver<bool>,
) -> RecognizerExit {
    let mut restarts: u32 = 0;

    loop {
        if *stop.borrow() {
            return RecognizerExit::Stopped;
        }

        let mut events = match backend.start().await {
            Ok(events) => events,
            Err(err) => {
                tracing::error!(target: "recognizer", %err, "recognition start failed");
                return RecognizerExit::Failed(err.to_string());
            }
        };
        tracing::debug!(target: "recognizer", restarts, "recognition running");

        let ending = loop {
            tokio::select! {
                _ = stop.changed() => break Ending::Stopped,
                event = events.recv() => match event {
                    Some(RecognitionEvent::Transcript { text, is_final: true }) => {
                        if let Some(command) = parse_command(&text) {
                            tracing::info!(target: "recognizer", ?command, "voice command");
                            if commands.send(command).await.is_err() {
                                break Ending::Stopped;
                            }
                        }
                    }
                    Some(RecognitionEvent::Transcript { .. }) => {}
                    Some(RecognitionEvent::Error(RecognitionError::NoSpeech)) => {}
                    Some(RecognitionEvent::Error(RecognitionError::Aborted)) => {
                        tracing::warn!(target: "recognizer", "recognition aborted");
                        break Ending::Aborted;
                    }
                    Some(RecognitionEvent::Error(err)) => {
                        tracing::error!(target: "recognizer", %err, "recognition error");
                    }
                    Some(RecognitionEvent::Ended) | None => break Ending::Ended,
                },
            }
        };

        match ending {
            Ending::Stopped => {
                backend.stop().await;
                return RecognizerExit::Stopped;
            }
            Ending::Aborted => {
                backend.stop().await;
                return RecognizerExit::Aborted;
            }
            Ending::Ended => {
                if *stop.borrow() {
                    return RecognizerExit::Stopped;
                }
                restarts += 1;
                tracing::debug!(target: "recognizer", "recognition ended, restarting");
                tokio::time::sleep(RESTART_DELAY).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cohort_core::CohortError;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Plays one scripted event list per start
    struct Scripted {
        runs: VecDeque<Vec<RecognitionEvent>>,
        starts: Arc<AtomicUsize>,
        hold_open: Vec<mpsc::Sender<RecognitionEvent>>,
    }

    #[async_trait]
    impl RecognitionBackend for Scripted {
        async fn start(&mut self) -> CohortResult<mpsc::Receiver<RecognitionEvent>> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            let events = self
                .runs
                .pop_front()
                .ok_or_else(|| CohortError::MediaUnavailable("no script".into()))?;
            let (tx, rx) = mpsc::channel(events.len().max(1));
            let ends = events.iter().any(|e| matches!(e, RecognitionEvent::Ended));
            for event in events {
                tx.try_send(event).unwrap();
            }
            if !ends {
                self.hold_open.push(tx);
            }
            Ok(rx)
        }

        async fn stop(&mut self) {
            self.hold_open.clear();
        }
    }

    fn transcript(text: &str) -> RecognitionEvent {
        RecognitionEvent::Transcript {
            text: text.into(),
            is_final: true,
        }
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_command("Reset the view"), Some(SpeechCommand::Reset));
        assert_eq!(parse_command("zoom in please"), Some(SpeechCommand::ScaleUp));
        assert_eq!(parse_command("Enhance!"), Some(SpeechCommand::ScaleUp));
        assert_eq!(parse_command("make it smaller"), Some(SpeechCommand::ScaleDown));
        assert_eq!(parse_command("what is this part"), None);
    }

    #[tokio::test]
    async fn test_unintended_end_restarts() {
        let starts = Arc::new(AtomicUsize::new(0));
        let backend = Scripted {
            runs: VecDeque::from(vec![
                vec![
                    RecognitionEvent::Error(RecognitionError::NoSpeech),
                    RecognitionEvent::Ended,
                ],
                vec![transcript("zoom out")],
            ]),
            starts: Arc::clone(&starts),
            hold_open: Vec::new(),
        };
        let (tx, mut rx) = mpsc::channel(4);
        let mut recognizer = CommandRecognizer::spawn(Box::new(backend), tx);

        assert_eq!(rx.recv().await, Some(SpeechCommand::ScaleDown));
        assert_eq!(starts.load(Ordering::SeqCst), 2);
        assert!(recognizer.is_running());

        assert_eq!(recognizer.stop().await, Some(RecognizerExit::Stopped));
        assert_eq!(recognizer.stop().await, None);
        assert_eq!(starts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_aborted_is_not_restarted() {
        let starts = Arc::new(AtomicUsize::new(0));
        let backend = Scripted {
            runs: VecDeque::from(vec![
                vec![RecognitionEvent::Error(RecognitionError::Aborted)],
                vec![transcript("reset")],
            ]),
            starts: Arc::clone(&starts),
            hold_open: Vec::new(),
        };
        let (tx, _rx) = mpsc::channel(4);
        let mut recognizer = CommandRecognizer::spawn(Box::new(backend), tx);

        let task = recognizer.task.take().unwrap();
        assert_eq!(task.await.unwrap(), RecognizerExit::Aborted);
        assert_eq!(starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_other_errors_keep_running() {
        let backend = Scripted {
            runs: VecDeque::from(vec![vec![
                RecognitionEvent::Error(RecognitionError::Other("network".into())),
                transcript("bigger"),
            ]]),
            starts: Arc::new(AtomicUsize::new(0)),
            hold_open: Vec::new(),
        };
        let (tx, mut rx) = mpsc::channel(4);
        let mut recognizer = CommandRecognizer::spawn(Box::new(backend), tx);
        assert_eq!(rx.recv().await, Some(SpeechCommand::ScaleUp));
        assert_eq!(recognizer.stop().await, Some(RecognizerExit::Stopped));
    }
}
