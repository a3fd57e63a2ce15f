// ABOUTME: Shared test doubles: a scripted toolchain runner and prompt.
// ABOUTME: Routes fake az invocations by subcommand so tests stay declarative.

#![allow(dead_code)]

use async_trait::async_trait;
use skopos::orchestrator::ConfirmationPrompt;
use skopos::process::{CommandOutput, CommandRunner, ProcessError};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// One scripted response from the fake toolchain.
#[derive(Debug, Clone)]
pub enum Resp {
    Output {
        exit_code: i32,
        stdout: String,
        stderr: String,
    },
    Timeout(u64),
    ToolMissing,
}

impl Resp {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Resp::Output {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn fail(exit_code: i32, stderr: impl Into<String>) -> Self {
        Resp::Output {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

#[derive(Default)]
struct Queues {
    lint: VecDeque<Resp>,
    whatif: VecDeque<Resp>,
    create: VecDeque<Resp>,
    show: VecDeque<Resp>,
}

/// Fake az CLI. Responses are queued per subcommand; an empty queue yields
/// a default empty success. Every invocation is recorded.
pub struct FakeAz {
    queues: Mutex<Queues>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl FakeAz {
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(Queues::default()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn push_lint(&self, resp: Resp) {
        self.queues.lock().unwrap().lint.push_back(resp);
    }

    pub fn push_whatif(&self, resp: Resp) {
        self.queues.lock().unwrap().whatif.push_back(resp);
    }

    pub fn push_create(&self, resp: Resp) {
        self.queues.lock().unwrap().create.push_back(resp);
    }

    pub fn push_show(&self, resp: Resp) {
        self.queues.lock().unwrap().show.push_back(resp);
    }

    /// Count recorded invocations whose arguments include `needle`.
    pub fn calls_containing(&self, needle: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|args| args.iter().any(|a| a == needle))
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn route(&self, args: &[String]) -> Resp {
        let mut queues = self.queues.lock().unwrap();
        let queue = if args.iter().any(|a| a == "bicep") {
            &mut queues.lint
        } else if args.iter().any(|a| a == "what-if") {
            &mut queues.whatif
        } else if args.iter().any(|a| a == "create") {
            &mut queues.create
        } else if args.iter().any(|a| a == "show") {
            &mut queues.show
        } else {
            panic!("unexpected fake az invocation: {args:?}");
        };
        queue.pop_front().unwrap_or_else(|| Resp::ok(""))
    }
}

#[async_trait]
impl CommandRunner for FakeAz {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        _timeout: Duration,
    ) -> Result<CommandOutput, ProcessError> {
        let mut call = vec![program.to_string()];
        call.extend_from_slice(args);
        self.calls.lock().unwrap().push(call);

        match self.route(args) {
            Resp::Output {
                exit_code,
                stdout,
                stderr,
            } => Ok(CommandOutput {
                exit_code: Some(exit_code),
                stdout,
                stderr,
            }),
            Resp::Timeout(secs) => Err(ProcessError::TimedOut(secs)),
            Resp::ToolMissing => Err(ProcessError::ToolMissing(program.to_string())),
        }
    }
}

/// Prompt double with a fixed answer; counts how often it was asked.
pub struct ScriptedPrompt {
    answer: bool,
    asked: AtomicUsize,
}

impl ScriptedPrompt {
    pub fn new(answer: bool) -> Self {
        Self {
            answer,
            asked: AtomicUsize::new(0),
        }
    }

    pub fn times_asked(&self) -> usize {
        self.asked.load(Ordering::SeqCst)
    }
}

impl ConfirmationPrompt for ScriptedPrompt {
    fn confirm(&self, _question: &str) -> std::io::Result<bool> {
        self.asked.fetch_add(1, Ordering::SeqCst);
        Ok(self.answer)
    }
}

/// Clonable handle over a scripted prompt, so tests can keep inspecting
/// the prompt after boxing it into the orchestrator.
pub struct SharedPrompt(pub std::sync::Arc<ScriptedPrompt>);

impl ConfirmationPrompt for SharedPrompt {
    fn confirm(&self, question: &str) -> std::io::Result<bool> {
        self.0.confirm(question)
    }
}

/// A minimal successful apply output with one discoverable resource ID.
pub fn apply_output_with_id(resource_id: &str) -> String {
    format!(
        r#"{{"properties": {{"outputs": {{"siteId": {{"type": "String", "value": "{resource_id}"}}, "endpoint": {{"type": "String", "value": "https://example.net"}}}}}}}}"#
    )
}

/// A `resource show` body with the given provisioning state.
pub fn resource_show_output(state: &str) -> String {
    format!(r#"{{"properties": {{"provisioningState": "{state}"}}}}"#)
}
