//! Scripted [`ProcessRunner`] that answers invocations from a closure.
//!
//! Used by unit and integration tests to drive the grading stages without a
//! real git / build / test toolchain. The handler may touch the filesystem to
//! simulate side effects such as writing a JUnit report.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{Invocation, ProcessError, ProcessOutput, ProcessRunner};

type Handler = dyn Fn(&Invocation) -> Result<ProcessOutput, ProcessError> + Send + Sync;

/// Process runner that records invocations and replies via a handler.
#[derive(Clone)]
pub struct ScriptedRunner {
    handler: Arc<Handler>,
    invocations: Arc<Mutex<Vec<Invocation>>>,
}

impl ScriptedRunner {
    /// Creates a runner answering every invocation with `handler`.
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&Invocation) -> Result<ProcessOutput, ProcessError> + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
            invocations: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Runner that succeeds with empty output for every invocation.
    pub fn succeeding() -> Self {
        Self::new(|_| Ok(ProcessOutput::ok(Vec::new())))
    }

    /// Every invocation received so far, in call order.
    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    /// Invocations whose program equals `program`.
    pub fn invocations_of(&self, program: &str) -> Vec<Invocation> {
        self.invocations()
            .into_iter()
            .filter(|inv| inv.program == program)
            .collect()
    }
}

impl std::fmt::Debug for ScriptedRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedRunner")
            .field("invocations", &self.invocations().len())
            .finish()
    }
}

#[async_trait]
impl ProcessRunner for ScriptedRunner {
    async fn run(&self, invocation: &Invocation) -> Result<ProcessOutput, ProcessError> {
        if let Ok(mut calls) = self.invocations.lock() {
            calls.push(invocation.clone());
        }
        (self.handler)(invocation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_runner_records_invocations() {
        let runner = ScriptedRunner::new(|inv| {
            if inv.program == "git" {
                Ok(ProcessOutput::ok("blob"))
            } else {
                Ok(ProcessOutput::failed(1, "nope"))
            }
        });

        let git = runner
            .run(&Invocation::new("git", "/ws").arg("status"))
            .await
            .unwrap();
        assert!(git.success());
        let ninja = runner.run(&Invocation::new("ninja", "/ws")).await.unwrap();
        assert_eq!(ninja.exit_code, 1);

        assert_eq!(runner.invocations().len(), 2);
        assert_eq!(runner.invocations_of("git").len(), 1);
        assert_eq!(runner.invocations_of("git")[0].args, vec!["status"]);
    }

    #[tokio::test]
    async fn test_scripted_runner_propagates_errors() {
        let runner = ScriptedRunner::new(|inv| {
            Err(ProcessError::Timeout {
                command: inv.display(),
                timeout: std::time::Duration::from_secs(1),
            })
        });
        let err = runner
            .run(&Invocation::new("go", "/ws"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Timeout { .. }));
    }
}
