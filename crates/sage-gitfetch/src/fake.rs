//! Scripted [`GitRunner`] for unit tests.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use sage_core::SageError;

use crate::runner::{GitOutput, GitRunner};

type Responder = Box<dyn Fn(&[String]) -> GitOutput + Send + Sync>;

/// Answers every invocation through a closure and records the arguments.
pub(crate) struct ScriptedGit {
    responder: Responder,
    calls: Mutex<Vec<Vec<String>>>,
}

impl ScriptedGit {
    pub(crate) fn new(responder: impl Fn(&[String]) -> GitOutput + Send + Sync + 'static) -> Self {
        Self {
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn succeeding() -> Self {
        Self::new(|_| Self::ok(""))
    }

    pub(crate) fn ok(stdout: &str) -> GitOutput {
        GitOutput {
            exit_code: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    pub(crate) fn fail(stderr: &str) -> GitOutput {
        GitOutput {
            exit_code: 128,
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    pub(crate) fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl GitRunner for ScriptedGit {
    async fn run(
        &self,
        _dir: &Path,
        args: &[String],
        _limit: Duration,
    ) -> Result<GitOutput, SageError> {
        self.calls.lock().unwrap().push(args.to_vec());
        Ok((self.responder)(args))
    }
}
