//! Live progress events emitted while an analysis runs.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::types::ModelVerdict;

/// Pipeline stage a progress event belongs to.
///
/// Declared in pipeline order, so `Ord` follows the order stages are reached.
///
/// # Examples
///
/// ```
/// use sage_core::Stage;
///
/// assert_eq!(serde_json::to_string(&Stage::TokenAlert).unwrap(), "\"token_alert\"");
/// assert!(Stage::Fetch < Stage::Diff);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Init,
    Fetch,
    Diff,
    Prompt,
    Llm,
    TokenAlert,
    Done,
    Error,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Init => "init",
            Stage::Fetch => "fetch",
            Stage::Diff => "diff",
            Stage::Prompt => "prompt",
            Stage::Llm => "llm",
            Stage::TokenAlert => "token_alert",
            Stage::Done => "done",
            Stage::Error => "error",
        };
        f.write_str(name)
    }
}

/// A single stage-transition notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub stage: Stage,
    pub message: String,
}

/// Everything an analysis run delivers to its caller, in order.
///
/// Zero or more `Progress` events are followed by exactly one terminal
/// `Result` or `Error`.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    Progress(ProgressEvent),
    Result(ModelVerdict),
    Error { message: String },
}

impl PipelineEvent {
    /// Stage of this event; terminal events map to `Done` and `Error`.
    pub fn stage(&self) -> Stage {
        match self {
            PipelineEvent::Progress(event) => event.stage,
            PipelineEvent::Result(_) => Stage::Done,
            PipelineEvent::Error { .. } => Stage::Error,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PipelineEvent::Progress(_))
    }
}

/// Producer half of an analysis event stream.
///
/// Sending never blocks the pipeline. A caller that stops listening does not
/// abort the run; its events are dropped.
///
/// # Examples
///
/// ```
/// use sage_core::{PipelineEvent, ProgressSink, Stage};
///
/// let (sink, mut events) = ProgressSink::channel();
/// sink.emit(Stage::Init, "starting");
/// drop(sink);
///
/// let first = events.try_recv().unwrap();
/// assert_eq!(first.stage(), Stage::Init);
/// assert!(events.try_recv().is_err());
/// ```
#[derive(Debug, Clone)]
pub struct ProgressSink {
    tx: mpsc::UnboundedSender<PipelineEvent>,
}

impl ProgressSink {
    /// Create a sink and the receiver its events arrive on.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<PipelineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Emit a progress event for `stage`.
    pub fn emit(&self, stage: Stage, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(%stage, %message, "progress");
        self.send(PipelineEvent::Progress(ProgressEvent { stage, message }));
    }

    /// Emit the terminal result.
    pub fn finish(&self, verdict: ModelVerdict) {
        self.send(PipelineEvent::Result(verdict));
    }

    /// Emit the terminal error.
    pub fn fail(&self, message: impl Into<String>) {
        self.send(PipelineEvent::Error {
            message: message.into(),
        });
    }

    fn send(&self, event: PipelineEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("progress receiver dropped; event discarded");
        }
    }
}
