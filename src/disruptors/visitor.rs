//! Per-target command strategies

use serde::Serialize;

use super::error::DisruptorResult;

/// A command to run against a target's agent and its compensating command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VisitCommands {
    /// Command executed in the agent container
    pub exec: Vec<String>,
    /// Command executed if `exec` fails. Empty means no cleanup.
    pub cleanup: Vec<String>,
}

impl VisitCommands {
    pub fn new(exec: Vec<String>, cleanup: Vec<String>) -> Self {
        Self { exec, cleanup }
    }
}

/// Produces the commands to run against a given target pod
pub trait Visitor: Send + Sync {
    fn visit(&self, pod: &str) -> DisruptorResult<VisitCommands>;
}

impl<F> Visitor for F
where
    F: Fn(&str) -> DisruptorResult<VisitCommands> + Send + Sync,
{
    fn visit(&self, pod: &str) -> DisruptorResult<VisitCommands> {
        self(pod)
    }
}

/// Visitor returning the same command for every target, without cleanup
#[derive(Debug, Clone)]
pub struct CommandVisitor {
    command: Vec<String>,
}

impl CommandVisitor {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

impl Visitor for CommandVisitor {
    fn visit(&self, _pod: &str) -> DisruptorResult<VisitCommands> {
        Ok(VisitCommands::new(self.command.clone(), Vec::new()))
    }
}
