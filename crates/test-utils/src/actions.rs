// src/actions.rs

//! Scripted actions and execution recording for tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use taskdag::{Action, ActionError, Outcome, Tag};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Started,
    Finished,
}

/// One recorded `perform` boundary.
#[derive(Debug, Clone)]
pub struct ExecEvent {
    pub task: String,
    pub kind: EventKind,
    pub at: Instant,
}

/// Shared recorder of action start/finish events, for ordering and overlap
/// assertions across tasks.
#[derive(Debug, Default)]
pub struct ExecLog {
    events: Mutex<Vec<ExecEvent>>,
}

impl ExecLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn record(&self, task: &str, kind: EventKind) {
        self.events.lock().unwrap().push(ExecEvent {
            task: task.to_string(),
            kind,
            at: Instant::now(),
        });
    }

    pub fn events(&self) -> Vec<ExecEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Task names in the order their first `perform` started.
    pub fn start_order(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for event in self.events() {
            if event.kind == EventKind::Started && !seen.contains(&event.task) {
                seen.push(event.task.clone());
            }
        }
        seen
    }

    /// True if `first` had finished (last finish) before `second` started
    /// (first start). Both tasks must appear in the log.
    pub fn finished_before_started(&self, first: &str, second: &str) -> bool {
        let events = self.events();

        let finished = events
            .iter()
            .rposition(|e| e.task == first && e.kind == EventKind::Finished);
        let started = events
            .iter()
            .position(|e| e.task == second && e.kind == EventKind::Started);

        match (finished, started) {
            (Some(f), Some(s)) => f < s,
            _ => false,
        }
    }

    /// True if the two tasks were inside `perform` at the same time.
    pub fn overlapped(&self, a: &str, b: &str) -> bool {
        let window = |task: &str| {
            let events = self.events();
            let start = events
                .iter()
                .find(|e| e.task == task && e.kind == EventKind::Started)
                .map(|e| e.at)?;
            let end = events
                .iter()
                .rev()
                .find(|e| e.task == task && e.kind == EventKind::Finished)
                .map(|e| e.at)?;
            Some((start, end))
        };

        match (window(a), window(b)) {
            (Some((a_start, a_end)), Some((b_start, b_end))) => {
                a_start < b_end && b_start < a_end
            }
            _ => false,
        }
    }
}

/// One scripted `perform` result.
#[derive(Debug, Clone)]
enum Step {
    Return(Outcome),
    Error(String),
    Cancel,
}

/// An [`Action`] whose `perform` results are scripted per invocation.
///
/// Once the script is exhausted, `perform` keeps returning the default
/// outcome (`Success` unless overridden).
pub struct ScriptedAction {
    name: String,
    tags: Vec<Tag>,
    script: Mutex<VecDeque<Step>>,
    default_outcome: Outcome,
    can_retry: bool,
    enabled: bool,
    delay: Option<Duration>,
    performs: AtomicUsize,
    log: Option<Arc<ExecLog>>,
}

impl ScriptedAction {
    pub fn builder(name: &str) -> ScriptedActionBuilder {
        ScriptedActionBuilder {
            name: name.to_string(),
            tags: Vec::new(),
            script: VecDeque::new(),
            default_outcome: Outcome::Success,
            can_retry: false,
            enabled: true,
            delay: None,
            log: None,
        }
    }

    /// An action that always succeeds.
    pub fn succeeding(name: &str) -> Arc<Self> {
        Self::builder(name).build()
    }

    /// Number of `perform` invocations so far.
    pub fn performs(&self) -> usize {
        self.performs.load(Ordering::SeqCst)
    }
}

impl Action for ScriptedAction {
    fn perform(&self) -> Result<Outcome, ActionError> {
        self.performs.fetch_add(1, Ordering::SeqCst);

        if let Some(log) = &self.log {
            log.record(&self.name, EventKind::Started);
        }

        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }

        let step = self.script.lock().unwrap().pop_front();
        let result = match step {
            Some(Step::Return(outcome)) => Ok(outcome),
            Some(Step::Error(message)) => Err(ActionError::Other(anyhow::anyhow!(message))),
            Some(Step::Cancel) => Err(ActionError::Cancelled),
            None => Ok(self.default_outcome),
        };

        if let Some(log) = &self.log {
            log.record(&self.name, EventKind::Finished);
        }

        result
    }

    fn can_retry(&self) -> bool {
        self.can_retry
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn tags(&self) -> Vec<Tag> {
        self.tags.clone()
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// Builder for [`ScriptedAction`].
pub struct ScriptedActionBuilder {
    name: String,
    tags: Vec<Tag>,
    script: VecDeque<Step>,
    default_outcome: Outcome,
    can_retry: bool,
    enabled: bool,
    delay: Option<Duration>,
    log: Option<Arc<ExecLog>>,
}

impl ScriptedActionBuilder {
    /// Append an outcome to the script.
    pub fn then(mut self, outcome: Outcome) -> Self {
        self.script.push_back(Step::Return(outcome));
        self
    }

    /// Append an error (treated as a failed attempt) to the script.
    pub fn then_error(mut self, message: &str) -> Self {
        self.script.push_back(Step::Error(message.to_string()));
        self
    }

    /// Append a re-raised cancellation to the script.
    pub fn then_cancel(mut self) -> Self {
        self.script.push_back(Step::Cancel);
        self
    }

    /// Outcome returned once the script is exhausted.
    pub fn default_outcome(mut self, outcome: Outcome) -> Self {
        self.default_outcome = outcome;
        self
    }

    pub fn retryable(mut self, can_retry: bool) -> Self {
        self.can_retry = can_retry;
        self
    }

    pub fn tags(mut self, tags: Vec<Tag>) -> Self {
        self.tags = tags;
        self
    }

    /// Report `is_enabled() == false` from the action itself.
    pub fn action_disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Sleep inside every `perform`, to make overlap observable.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn log(mut self, log: Arc<ExecLog>) -> Self {
        self.log = Some(log);
        self
    }

    pub fn build(self) -> Arc<ScriptedAction> {
        Arc::new(ScriptedAction {
            name: self.name,
            tags: self.tags,
            script: Mutex::new(self.script),
            default_outcome: self.default_outcome,
            can_retry: self.can_retry,
            enabled: self.enabled,
            delay: self.delay,
            performs: AtomicUsize::new(0),
            log: self.log,
        })
    }
}
