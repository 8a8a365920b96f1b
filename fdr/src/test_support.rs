//! Test-only collaborators: a temporary git repository and scripted fakes
//! for the process runner, the agent, the review host, and the prompter.

use std::cell::RefCell;
use std::collections::{BTreeSet, VecDeque};
use std::fs;
use std::path::Path;
use std::process::Command;

use anyhow::{Result, anyhow};
use tempfile::TempDir;

use crate::core::threads::{ReviewThread, ThreadComment};
use crate::core::types::Interrupted;
use crate::io::agent::{Agent, AgentReply, AgentRequest};
use crate::io::detect::Prompter;
use crate::io::git::Git;
use crate::io::github::{PrInfo, ReviewHost};
use crate::io::process::{CommandOutput, CommandRunner, CommandSpec, SystemRunner};

/// A throwaway git repository on branch `main` with one commit
/// containing `status.txt`.
pub struct TestRepo {
    dir: TempDir,
    runner: SystemRunner,
}

impl TestRepo {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = Self {
            dir,
            runner: SystemRunner::default(),
        };
        repo.git_cmd(&["init", "-q", "-b", "main"]);
        repo.git_cmd(&["config", "user.email", "fdr@example.com"]);
        repo.git_cmd(&["config", "user.name", "fdr tests"]);
        repo.git_cmd(&["config", "commit.gpgsign", "false"]);
        repo.write("status.txt", "broken\n");
        repo.commit_all("initial");
        repo
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn runner(&self) -> &SystemRunner {
        &self.runner
    }

    pub fn git(&self) -> Git<'_> {
        Git::new(&self.runner, self.dir.path())
    }

    /// Write `contents` to a path relative to the root, creating parents.
    pub fn write(&self, rel: &str, contents: &str) {
        let path = self.root().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dirs");
        }
        fs::write(&path, contents).expect("write file");
    }

    pub fn read(&self, rel: &str) -> String {
        fs::read_to_string(self.root().join(rel)).unwrap_or_default()
    }

    pub fn commit_all(&self, message: &str) {
        self.git_cmd(&["add", "-A"]);
        self.git_cmd(&["commit", "-q", "-m", message]);
    }

    fn git_cmd(&self, args: &[&str]) {
        let status = Command::new("git")
            .args(args)
            .current_dir(self.root())
            .status()
            .expect("spawn git");
        assert!(status.success(), "git {} failed", args.join(" "));
    }
}

impl Default for TestRepo {
    fn default() -> Self {
        Self::new()
    }
}

enum FakeResult {
    Output(CommandOutput),
    Error(String),
    Interrupt,
}

/// [`CommandRunner`] that replays queued results and records every call.
///
/// With an empty queue every command exits with the default code and no
/// output.
pub struct FakeRunner {
    queue: RefCell<VecDeque<FakeResult>>,
    default_exit: i32,
    calls: RefCell<Vec<CommandSpec>>,
}

impl FakeRunner {
    /// Unqueued commands succeed.
    pub fn new() -> Self {
        Self::with_default_exit(0)
    }

    /// Unqueued commands exit with code 1.
    pub fn failing() -> Self {
        Self::with_default_exit(1)
    }

    fn with_default_exit(default_exit: i32) -> Self {
        Self {
            queue: RefCell::new(VecDeque::new()),
            default_exit,
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn push_output(&self, output: CommandOutput) {
        self.queue.borrow_mut().push_back(FakeResult::Output(output));
    }

    pub fn push_error(&self, message: &str) {
        self.queue
            .borrow_mut()
            .push_back(FakeResult::Error(message.to_string()));
    }

    pub fn push_interrupt(&self) {
        self.queue.borrow_mut().push_back(FakeResult::Interrupt);
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.borrow().clone()
    }
}

impl Default for FakeRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRunner for FakeRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.calls.borrow_mut().push(spec.clone());
        match self.queue.borrow_mut().pop_front() {
            Some(FakeResult::Output(output)) => Ok(output),
            Some(FakeResult::Error(message)) => Err(anyhow!(message)),
            Some(FakeResult::Interrupt) => Err(Interrupted.into()),
            None => Ok(CommandOutput {
                exit_code: Some(self.default_exit),
                ..CommandOutput::default()
            }),
        }
    }
}

/// One scripted agent turn: files to write, then the reply to return.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTurn {
    pub writes: Vec<(String, String)>,
    pub reply: AgentReply,
}

impl ScriptedTurn {
    /// Exit 0 without touching the tree.
    pub fn ok() -> Self {
        Self {
            writes: Vec::new(),
            reply: AgentReply {
                exit_code: Some(0),
                ..AgentReply::default()
            },
        }
    }

    /// Exit 1 with `stderr` and no edits.
    pub fn fail(stderr: &str) -> Self {
        Self {
            writes: Vec::new(),
            reply: AgentReply {
                exit_code: Some(1),
                stdout: String::new(),
                stderr: stderr.to_string(),
            },
        }
    }

    /// Also write `contents` to `rel` (relative to the project root).
    pub fn write(mut self, rel: &str, contents: &str) -> Self {
        self.writes.push((rel.to_string(), contents.to_string()));
        self
    }
}

/// [`Agent`] that plays back [`ScriptedTurn`]s against a project root.
///
/// Once the script runs out every call succeeds without editing anything.
pub struct ScriptedAgent {
    root: std::path::PathBuf,
    turns: RefCell<VecDeque<ScriptedTurn>>,
    requests: RefCell<Vec<AgentRequest>>,
}

impl ScriptedAgent {
    pub fn new(root: &Path, turns: Vec<ScriptedTurn>) -> Self {
        Self {
            root: root.to_path_buf(),
            turns: RefCell::new(turns.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<AgentRequest> {
        self.requests.borrow().clone()
    }
}

impl Agent for ScriptedAgent {
    fn invoke(&self, request: &AgentRequest) -> Result<AgentReply> {
        self.requests.borrow_mut().push(request.clone());
        let turn = self
            .turns
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(ScriptedTurn::ok);
        for (rel, contents) in &turn.writes {
            let path = self.root.join(rel);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, contents)?;
        }
        Ok(turn.reply)
    }
}

/// In-memory [`ReviewHost`]; resolving a thread flips its resolved flag.
pub struct FakeHost {
    pub authenticated: bool,
    pub pr: Option<PrInfo>,
    threads: RefCell<Vec<ReviewThread>>,
    failing_ids: BTreeSet<String>,
    resolve_calls: RefCell<Vec<String>>,
    fetches: RefCell<u32>,
}

impl FakeHost {
    pub fn new(threads: Vec<ReviewThread>) -> Self {
        Self {
            authenticated: true,
            pr: Some(PrInfo {
                number: 7,
                url: "https://github.com/acme/widgets/pull/7".to_string(),
                owner: "acme".to_string(),
                repo: "widgets".to_string(),
            }),
            threads: RefCell::new(threads),
            failing_ids: BTreeSet::new(),
            resolve_calls: RefCell::new(Vec::new()),
            fetches: RefCell::new(0),
        }
    }

    /// Resolving `id` fails at the API.
    pub fn fail_resolving(mut self, id: &str) -> Self {
        self.failing_ids.insert(id.to_string());
        self
    }

    /// Thread IDs sent to the resolve mutation, in call order.
    pub fn resolve_calls(&self) -> Vec<String> {
        self.resolve_calls.borrow().clone()
    }

    pub fn fetch_count(&self) -> u32 {
        *self.fetches.borrow()
    }
}

impl ReviewHost for FakeHost {
    fn is_authenticated(&self) -> Result<bool> {
        Ok(self.authenticated)
    }

    fn pull_request(&self, _branch: &str) -> Result<Option<PrInfo>> {
        Ok(self.pr.clone())
    }

    fn review_threads(&self, _pr: &PrInfo) -> Result<Vec<ReviewThread>> {
        *self.fetches.borrow_mut() += 1;
        Ok(self.threads.borrow().clone())
    }

    fn resolve_thread(&self, thread_id: &str) -> Result<()> {
        self.resolve_calls.borrow_mut().push(thread_id.to_string());
        if self.failing_ids.contains(thread_id) {
            return Err(anyhow!("resolve {thread_id} failed"));
        }
        for thread in self.threads.borrow_mut().iter_mut() {
            if thread.id == thread_id {
                thread.is_resolved = true;
            }
        }
        Ok(())
    }
}

/// Unresolved thread with a single comment.
pub fn thread(id: &str, created_at: &str, body: &str) -> ReviewThread {
    ReviewThread {
        id: id.to_string(),
        is_resolved: false,
        path: Some("src/lib.rs".to_string()),
        line: Some(10),
        comments: vec![ThreadComment {
            author: Some("reviewer".to_string()),
            body: body.to_string(),
            created_at: Some(created_at.to_string()),
        }],
    }
}

/// [`Prompter`] with canned answers. Exhausted confirmations answer no and
/// exhausted questions answer with an empty string.
pub struct ScriptedPrompter {
    interactive: bool,
    confirms: RefCell<VecDeque<bool>>,
    answers: RefCell<VecDeque<String>>,
    questions: RefCell<Vec<String>>,
}

impl ScriptedPrompter {
    pub fn non_interactive() -> Self {
        Self::interactive(Vec::new(), Vec::new()).with_terminal(false)
    }

    pub fn interactive(confirms: Vec<bool>, answers: Vec<String>) -> Self {
        Self {
            interactive: true,
            confirms: RefCell::new(confirms.into()),
            answers: RefCell::new(answers.into()),
            questions: RefCell::new(Vec::new()),
        }
    }

    fn with_terminal(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    pub fn questions(&self) -> Vec<String> {
        self.questions.borrow().clone()
    }
}

impl Prompter for ScriptedPrompter {
    fn is_interactive(&self) -> bool {
        self.interactive
    }

    fn confirm(&self, question: &str) -> Result<bool> {
        self.questions.borrow_mut().push(question.to_string());
        Ok(self.confirms.borrow_mut().pop_front().unwrap_or(false))
    }

    fn ask(&self, question: &str) -> Result<String> {
        self.questions.borrow_mut().push(question.to_string());
        Ok(self.answers.borrow_mut().pop_front().unwrap_or_default())
    }
}
