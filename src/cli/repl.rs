// src/cli/repl.rs

use crate::cli::helper::EditorSource;
use crate::cli::render;
use crate::config::Config;
use crate::error::Result;
use crate::executor::CommandExecutor;
use crate::handler::Dispatcher;
use crate::history::{HistoryStore, TEMP_CHAT_ID};
use crate::llm::CompletionOptions;
use crate::role::{RoleKind, SystemRole};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

// --- Constants ---
pub const ENTER_SHELL: &str = "role(shell)";
pub const EXIT_SHELL: &str = "role()";
pub const EXIT: &str = "exit()";
pub const MULTILINE: &str = "\"\"\"";
pub const CONTROL_TOKENS: [&str; 4] = [ENTER_SHELL, EXIT_SHELL, EXIT, MULTILINE];

const EXECUTE: &str = "e";
const DESCRIBE: &str = "d";
const PROMPT: &str = ">>> ";
const MULTILINE_PROMPT: &str = "... ";
const INIT_PROMPT_SEPARATOR: &str = "\n\n\n";

const BANNER: &str = "Entering REPL mode. \
Type [role(shell)] to enter SHELL mode, and [role()] to exit SHELL mode. \
Type [e] to execute commands or [d] to describe the commands while in SHELL mode. \
Press Ctrl+C to exit.";

/// One raw input line, classified before any mode is consulted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    EnterShell,
    ExitShell,
    Exit,
    BeginMultiline,
    Execute,
    Describe,
    Prompt(String),
}

impl Input {
    /// Exact match only: `" exit()"` is a prompt, not an exit.
    pub fn parse(line: &str) -> Self {
        match line {
            ENTER_SHELL => Input::EnterShell,
            EXIT_SHELL => Input::ExitShell,
            EXIT => Input::Exit,
            MULTILINE => Input::BeginMultiline,
            EXECUTE => Input::Execute,
            DESCRIBE => Input::Describe,
            other => Input::Prompt(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Plain,
    Shell,
}

/// What the loop must do for one input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    SwitchedMode(Mode),
    Exit,
    ReadMultiline,
    Chat(String),
    GenerateCommand(String),
    Execute(String),
    Describe(String),
}

/// Non-control input once the initial prompt has been considered.
enum Request {
    Execute,
    Describe,
    Prompt(String),
}

impl Request {
    fn into_text(self) -> String {
        match self {
            Request::Execute => EXECUTE.to_string(),
            Request::Describe => DESCRIBE.to_string(),
            Request::Prompt(text) => text,
        }
    }
}

/// Mode, the last generated command, and the not-yet-used initial prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplState {
    pub mode: Mode,
    pub pending_command: String,
    init_prompt: Option<String>,
}

impl ReplState {
    pub fn new(role: &SystemRole, init_prompt: Option<String>) -> Self {
        Self {
            mode: if role.is_shell() { Mode::Shell } else { Mode::Plain },
            pending_command: String::new(),
            init_prompt: init_prompt.filter(|p| !p.is_empty()),
        }
    }

    pub fn init_prompt(&self) -> Option<&str> {
        self.init_prompt.as_deref()
    }

    /// Advances the state machine by one input.
    ///
    /// The initial prompt is glued onto the first input that is not a mode or
    /// loop control token. Glued text is always a prompt, so in SHELL mode a
    /// first `e` becomes an instruction rather than an execute request.
    pub fn step(mut self, input: Input) -> (Self, Action) {
        let request = match input {
            Input::EnterShell => {
                self.mode = Mode::Shell;
                return (self, Action::SwitchedMode(Mode::Shell));
            }
            Input::ExitShell => {
                self.mode = Mode::Plain;
                return (self, Action::SwitchedMode(Mode::Plain));
            }
            Input::Exit => return (self, Action::Exit),
            Input::BeginMultiline => return (self, Action::ReadMultiline),
            Input::Execute => Request::Execute,
            Input::Describe => Request::Describe,
            Input::Prompt(text) => Request::Prompt(text),
        };

        let request = match self.init_prompt.take() {
            Some(init) => Request::Prompt(format!(
                "{}{}{}",
                init,
                INIT_PROMPT_SEPARATOR,
                request.into_text()
            )),
            None => request,
        };

        let action = match (self.mode, request) {
            (Mode::Plain, request) => Action::Chat(request.into_text()),
            (Mode::Shell, Request::Execute) => Action::Execute(self.pending_command.clone()),
            (Mode::Shell, Request::Describe) => Action::Describe(self.pending_command.clone()),
            (Mode::Shell, Request::Prompt(text)) => Action::GenerateCommand(text),
        };
        (self, action)
    }

    pub fn set_pending_command(&mut self, command: String) {
        self.pending_command = command;
    }
}

/// Result of one blocking read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadLine {
    Line(String),
    Interrupted,
    Eof,
}

pub trait LineSource {
    fn read_line(&mut self, prompt: &str) -> Result<ReadLine>;
}

/// Why the loop stopped. Every variant is a clean exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplExit {
    ExitCommand,
    Interrupted,
    EndOfInput,
}

/// Reads until the `"""` terminator, keeping each line plus a newline.
/// `None` means the read was cancelled.
pub fn read_multiline<L>(input: &mut L, cancel: &CancellationToken) -> Result<Option<String>>
where
    L: LineSource + ?Sized,
{
    let mut text = String::new();
    loop {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        match input.read_line(MULTILINE_PROMPT)? {
            ReadLine::Line(line) if line == MULTILINE => return Ok(Some(text)),
            ReadLine::Line(line) => {
                text.push_str(&line);
                text.push('\n');
            }
            ReadLine::Interrupted | ReadLine::Eof => {
                cancel.cancel();
                return Ok(None);
            }
        }
    }
}

/// Everything fixed for the lifetime of one REPL invocation.
#[derive(Debug, Clone)]
pub struct ReplSession {
    pub chat_id: String,
    pub role: SystemRole,
    pub shell_role: SystemRole,
    pub describe_role: SystemRole,
    pub markdown: bool,
    pub options: CompletionOptions,
}

impl ReplSession {
    pub fn new(
        chat_id: impl Into<String>,
        kind: RoleKind,
        os_name: &str,
        shell_name: &str,
        markdown: bool,
        options: CompletionOptions,
    ) -> Self {
        Self {
            chat_id: chat_id.into(),
            role: SystemRole::new(kind, os_name, shell_name),
            shell_role: SystemRole::new(RoleKind::Shell, os_name, shell_name),
            describe_role: SystemRole::new(RoleKind::DescribeShell, os_name, shell_name),
            markdown,
            options,
        }
    }
}

macro_rules! cancellable {
    ($cancel:expr, $fut:expr) => {
        tokio::select! {
            res = $fut => res?,
            _ = $cancel.cancelled() => return Ok(ReplExit::Interrupted),
            Ok(()) = tokio::signal::ctrl_c() => {
                $cancel.cancel();
                return Ok(ReplExit::Interrupted);
            }
        }
    };
}

/// The read-eval-print cycle. Collaborator errors propagate untouched.
pub async fn run_loop<D, E, L>(
    session: &ReplSession,
    mut state: ReplState,
    dispatcher: &D,
    executor: &E,
    lines: &mut L,
    cancel: &CancellationToken,
) -> Result<ReplExit>
where
    D: Dispatcher + ?Sized,
    E: CommandExecutor + ?Sized,
    L: LineSource + ?Sized,
{
    // A captured multi-line block waits here for the next turn of the loop.
    let mut queued: Option<Input> = None;
    loop {
        if cancel.is_cancelled() {
            return Ok(ReplExit::Interrupted);
        }
        let input = match queued.take() {
            Some(input) => input,
            None => match lines.read_line(PROMPT)? {
                ReadLine::Line(line) if line.is_empty() => continue,
                ReadLine::Line(line) => Input::parse(&line),
                ReadLine::Interrupted => {
                    cancel.cancel();
                    return Ok(ReplExit::Interrupted);
                }
                ReadLine::Eof => return Ok(ReplExit::EndOfInput),
            },
        };

        let (next, action) = state.step(input);
        state = next;
        debug!(?action, mode = ?state.mode, "REPL step");

        match action {
            Action::SwitchedMode(Mode::Shell) => render::print_notice("Enter SHELL mode"),
            Action::SwitchedMode(Mode::Plain) => render::print_notice("Exit SHELL mode"),
            Action::Exit => return Ok(ReplExit::ExitCommand),
            Action::ReadMultiline => match read_multiline(lines, cancel)? {
                Some(block) => queued = Some(Input::Prompt(block)),
                None => return Ok(ReplExit::Interrupted),
            },
            Action::Chat(prompt) => {
                println!("<<< ");
                cancellable!(
                    cancel,
                    dispatcher.complete(
                        &session.role,
                        &prompt,
                        session.markdown,
                        Some(session.chat_id.as_str()),
                        &session.options,
                    )
                );
            }
            Action::GenerateCommand(instruction) => {
                let command = cancellable!(
                    cancel,
                    dispatcher.complete(
                        &session.shell_role,
                        &instruction,
                        false,
                        None,
                        &session.options,
                    )
                );
                state.set_pending_command(command);
            }
            Action::Execute(command) => {
                println!();
                executor.execute(&command)?.print()?;
                println!();
                render::print_rule(None, render::history_rule_style());
            }
            Action::Describe(command) => {
                cancellable!(
                    cancel,
                    dispatcher.complete(
                        &session.describe_role,
                        &command,
                        false,
                        None,
                        &session.options,
                    )
                );
            }
        }
    }
}

/// Entry point for `--repl`: replays the chat, prints the banner, then runs the loop
/// on the terminal until exit or Ctrl+C. Once piped stdin has been drained, lines are
/// read from the controlling terminal instead.
pub async fn run_interactive<D, E>(
    config: &Config,
    session: ReplSession,
    init_prompt: Option<String>,
    stdin_piped: bool,
    dispatcher: &D,
    executor: &E,
) -> Result<ReplExit>
where
    D: Dispatcher + ?Sized,
    E: CommandExecutor + ?Sized,
{
    info!(chat_id = %session.chat_id, role = session.role.name(), "Starting REPL session.");

    let store = HistoryStore::new(&config.chat_cache_path, config.chat_cache_length);
    if session.chat_id == TEMP_CHAT_ID {
        store.invalidate(TEMP_CHAT_ID)?;
    }
    let turns = store.load(&session.chat_id)?;
    let initiated = !turns.is_empty();
    if initiated {
        render::print_rule(Some("Chat History"), render::history_rule_style());
        render::print_turns(&turns);
        render::print_rule(None, render::history_rule_style());
    }

    render::print_notice(BANNER);

    let state = ReplState::new(&session.role, init_prompt);
    if let Some(init) = state.init_prompt() {
        render::print_rule(Some("Input"), render::input_rule_style());
        println!("{}", init);
        render::print_rule(None, render::input_rule_style());
    }

    // SIGINT only ends the session while a request is in flight; a command run
    // with `e` takes the signal on its own.
    let cancel = CancellationToken::new();
    let mut input = EditorSource::new(stdin_piped)?;
    let outcome = run_loop(&session, state, dispatcher, executor, &mut input, &cancel).await;

    if let Ok(reason) = &outcome {
        info!(?reason, "Exiting REPL session.");
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::CommandOutcome;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    struct Call {
        role: RoleKind,
        prompt: String,
        markdown: bool,
        chat_id: Option<String>,
    }

    #[derive(Default)]
    struct FakeDispatcher {
        calls: Mutex<Vec<Call>>,
        replies: Mutex<VecDeque<String>>,
        fail: bool,
    }

    impl FakeDispatcher {
        fn replying(replies: &[&str]) -> Self {
            Self {
                replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Dispatcher for FakeDispatcher {
        async fn complete(
            &self,
            role: &SystemRole,
            prompt: &str,
            markdown: bool,
            chat_id: Option<&str>,
            _options: &CompletionOptions,
        ) -> Result<String> {
            self.calls.lock().unwrap().push(Call {
                role: role.kind,
                prompt: prompt.to_string(),
                markdown,
                chat_id: chat_id.map(str::to_string),
            });
            if self.fail {
                return Err(anyhow!("service unavailable"));
            }
            Ok(self.replies.lock().unwrap().pop_front().unwrap_or_default())
        }
    }

    #[derive(Default)]
    struct FakeExecutor {
        commands: Mutex<Vec<String>>,
        fail: bool,
    }

    impl CommandExecutor for FakeExecutor {
        fn execute(&self, command: &str) -> Result<CommandOutcome> {
            self.commands.lock().unwrap().push(command.to_string());
            if self.fail {
                return Err(anyhow!("Failed to spawn shell 'sh'"));
            }
            Ok(CommandOutcome {
                code: Some(0),
                success: true,
                stdout: String::new(),
                stderr: String::new(),
            })
        }
    }

    /// Interrupts the session from inside a request that never finishes.
    struct HangingDispatcher {
        cancel: CancellationToken,
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl Dispatcher for HangingDispatcher {
        async fn complete(
            &self,
            _role: &SystemRole,
            _prompt: &str,
            _markdown: bool,
            _chat_id: Option<&str>,
            _options: &CompletionOptions,
        ) -> Result<String> {
            *self.calls.lock().unwrap() += 1;
            self.cancel.cancel();
            std::future::pending().await
        }
    }

    /// Scripted input; running out of lines reads as end of input.
    struct Script {
        lines: VecDeque<ReadLine>,
        prompts: Vec<String>,
    }

    impl Script {
        fn new(lines: &[&str]) -> Self {
            Self {
                lines: lines.iter().map(|l| ReadLine::Line(l.to_string())).collect(),
                prompts: Vec::new(),
            }
        }

        fn then(mut self, read: ReadLine) -> Self {
            self.lines.push_back(read);
            self
        }
    }

    impl LineSource for Script {
        fn read_line(&mut self, prompt: &str) -> Result<ReadLine> {
            self.prompts.push(prompt.to_string());
            Ok(self.lines.pop_front().unwrap_or(ReadLine::Eof))
        }
    }

    fn session(kind: RoleKind) -> ReplSession {
        ReplSession::new("chat", kind, "Linux", "bash", true, CompletionOptions::default())
    }

    async fn run(
        kind: RoleKind,
        init_prompt: Option<&str>,
        script: &mut Script,
        dispatcher: &FakeDispatcher,
        executor: &FakeExecutor,
    ) -> ReplExit {
        let session = session(kind);
        let state = ReplState::new(&session.role, init_prompt.map(str::to_string));
        run_loop(&session, state, dispatcher, executor, script, &CancellationToken::new())
            .await
            .unwrap()
    }

    fn shell_state() -> ReplState {
        ReplState::new(&SystemRole::new(RoleKind::Shell, "Linux", "bash"), None)
    }

    #[test]
    fn parse_is_exact_match() {
        assert_eq!(Input::parse("role(shell)"), Input::EnterShell);
        assert_eq!(Input::parse("role()"), Input::ExitShell);
        assert_eq!(Input::parse("exit()"), Input::Exit);
        assert_eq!(Input::parse("\"\"\""), Input::BeginMultiline);
        assert_eq!(Input::parse("e"), Input::Execute);
        assert_eq!(Input::parse("d"), Input::Describe);
        assert_eq!(Input::parse(" exit()"), Input::Prompt(" exit()".into()));
        assert_eq!(Input::parse("role()]"), Input::Prompt("role()]".into()));
        assert_eq!(Input::parse("E"), Input::Prompt("E".into()));
    }

    #[test]
    fn initial_mode_follows_role_kind() {
        assert_eq!(shell_state().mode, Mode::Shell);
        let plain = ReplState::new(&SystemRole::new(RoleKind::Code, "Linux", "bash"), None);
        assert_eq!(plain.mode, Mode::Plain);
    }

    #[test]
    fn mode_toggle_keeps_pending_command() {
        let mut state = shell_state();
        state.set_pending_command("ls -la".into());

        let (state, action) = state.step(Input::EnterShell);
        assert_eq!(action, Action::SwitchedMode(Mode::Shell));
        let (state, action) = state.step(Input::ExitShell);
        assert_eq!(action, Action::SwitchedMode(Mode::Plain));
        assert_eq!(state.mode, Mode::Plain);
        assert_eq!(state.pending_command, "ls -la");

        let (_, action) = state.step(Input::EnterShell).0.step(Input::Execute);
        assert_eq!(action, Action::Execute("ls -la".into()));
    }

    #[test]
    fn execute_and_describe_are_prompts_in_plain_mode() {
        let state = ReplState::new(&SystemRole::new(RoleKind::Default, "Linux", "bash"), None);
        let (state, action) = state.step(Input::Execute);
        assert_eq!(action, Action::Chat("e".into()));
        let (_, action) = state.step(Input::Describe);
        assert_eq!(action, Action::Chat("d".into()));
    }

    #[test]
    fn execute_before_any_command_uses_empty_string() {
        let (state, action) = shell_state().step(Input::Execute);
        assert_eq!(action, Action::Execute(String::new()));
        let (_, action) = state.step(Input::Describe);
        assert_eq!(action, Action::Describe(String::new()));
    }

    #[test]
    fn initial_prompt_skips_control_tokens_and_is_used_once() {
        let role = SystemRole::new(RoleKind::Default, "Linux", "bash");
        let state = ReplState::new(&role, Some("context".into()));

        let (state, action) = state.step(Input::EnterShell);
        assert_eq!(action, Action::SwitchedMode(Mode::Shell));
        let (state, _) = state.step(Input::ExitShell);
        assert_eq!(state.init_prompt(), Some("context"));

        let (state, action) = state.step(Input::Prompt("first".into()));
        assert_eq!(action, Action::Chat("context\n\n\nfirst".into()));
        let (state, action) = state.step(Input::Prompt("second".into()));
        assert_eq!(action, Action::Chat("second".into()));
        assert_eq!(state.init_prompt(), None);
    }

    #[test]
    fn initial_prompt_turns_first_execute_into_instruction() {
        let role = SystemRole::new(RoleKind::Shell, "Linux", "bash");
        let (_, action) = ReplState::new(&role, Some("ctx".into())).step(Input::Execute);
        assert_eq!(action, Action::GenerateCommand("ctx\n\n\ne".into()));
    }

    #[test]
    fn multiline_block_joins_lines() {
        let mut script = Script::new(&["ls -la", "pwd", "\"\"\""]);
        let block = read_multiline(&mut script, &CancellationToken::new()).unwrap();
        assert_eq!(block.as_deref(), Some("ls -la\npwd\n"));
        assert!(script.prompts.iter().all(|p| p == MULTILINE_PROMPT));
    }

    #[test]
    fn multiline_block_may_be_empty_and_keeps_tokens_verbatim() {
        let mut script = Script::new(&["\"\"\""]);
        let cancel = CancellationToken::new();
        assert_eq!(read_multiline(&mut script, &cancel).unwrap().as_deref(), Some(""));

        let mut script = Script::new(&["exit()", "", "role()", "\"\"\""]);
        assert_eq!(
            read_multiline(&mut script, &cancel).unwrap().as_deref(),
            Some("exit()\n\nrole()\n")
        );
    }

    #[test]
    fn interrupt_inside_multiline_cancels() {
        let mut script = Script::new(&["partial"]).then(ReadLine::Interrupted);
        let cancel = CancellationToken::new();
        assert_eq!(read_multiline(&mut script, &cancel).unwrap(), None);
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn plain_inputs_each_reach_dispatcher_once() {
        let dispatcher = FakeDispatcher::default();
        let executor = FakeExecutor::default();
        let mut script = Script::new(&["hello", "how are you", "e", "exit()"]);

        let exit = run(RoleKind::Default, None, &mut script, &dispatcher, &executor).await;
        assert_eq!(exit, ReplExit::ExitCommand);

        let calls = dispatcher.calls();
        let prompts: Vec<&str> = calls.iter().map(|c| c.prompt.as_str()).collect();
        assert_eq!(prompts, ["hello", "how are you", "e"]);
        assert!(calls.iter().all(|c| c.role == RoleKind::Default
            && c.markdown
            && c.chat_id.as_deref() == Some("chat")));
        assert!(executor.commands.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn shell_role_then_plain_scenario() {
        let dispatcher = FakeDispatcher::default();
        let executor = FakeExecutor::default();
        let mut script = Script::new(&["role()", "hello", "exit()", "never read"]);

        let exit = run(RoleKind::Shell, None, &mut script, &dispatcher, &executor).await;
        assert_eq!(exit, ReplExit::ExitCommand);
        let calls = dispatcher.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].role, RoleKind::Shell);
        assert_eq!(calls[0].prompt, "hello");
        assert_eq!(calls[0].chat_id.as_deref(), Some("chat"));
        assert_eq!(script.lines.len(), 1);
    }

    #[tokio::test]
    async fn generated_command_is_what_gets_executed() {
        let dispatcher = FakeDispatcher::replying(&["ls -la"]);
        let executor = FakeExecutor::default();
        let mut script = Script::new(&["role(shell)", "list files", "e", "exit()"]);

        run(RoleKind::Default, None, &mut script, &dispatcher, &executor).await;

        let calls = dispatcher.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0],
            Call {
                role: RoleKind::Shell,
                prompt: "list files".into(),
                markdown: false,
                chat_id: None,
            }
        );
        assert_eq!(*executor.commands.lock().unwrap(), ["ls -la"]);
    }

    #[tokio::test]
    async fn describe_is_a_fresh_non_markdown_request() {
        let dispatcher = FakeDispatcher::replying(&["find . -name '*.rs'", "Finds Rust files."]);
        let executor = FakeExecutor::default();
        let mut script = Script::new(&["rust files", "d", "exit()"]);

        run(RoleKind::Shell, None, &mut script, &dispatcher, &executor).await;

        let calls = dispatcher.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].role, RoleKind::DescribeShell);
        assert_eq!(calls[1].prompt, "find . -name '*.rs'");
        assert!(!calls[1].markdown);
        assert_eq!(calls[1].chat_id, None);
    }

    #[tokio::test]
    async fn newer_command_replaces_pending_one() {
        let dispatcher = FakeDispatcher::replying(&["ls", "ls -la"]);
        let executor = FakeExecutor::default();
        let mut script = Script::new(&["list", "list all", "role()", "role(shell)", "e", "exit()"]);

        run(RoleKind::Shell, None, &mut script, &dispatcher, &executor).await;
        assert_eq!(*executor.commands.lock().unwrap(), ["ls -la"]);
    }

    #[tokio::test]
    async fn multiline_block_is_dispatched_as_one_prompt() {
        let dispatcher = FakeDispatcher::default();
        let executor = FakeExecutor::default();
        let mut script = Script::new(&["\"\"\"", "ls -la", "pwd", "\"\"\"", "exit()"]);

        run(RoleKind::Default, None, &mut script, &dispatcher, &executor).await;

        let calls = dispatcher.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].prompt, "ls -la\npwd\n");
        assert_eq!(script.prompts, [PROMPT, MULTILINE_PROMPT, MULTILINE_PROMPT, MULTILINE_PROMPT, PROMPT]);
    }

    #[tokio::test]
    async fn initial_prompt_attaches_to_first_forwarded_input() {
        let dispatcher = FakeDispatcher::default();
        let executor = FakeExecutor::default();
        let mut script = Script::new(&["role(shell)", "role()", "", "one", "two", "exit()"]);

        run(RoleKind::Default, Some("piped"), &mut script, &dispatcher, &executor).await;

        let prompts: Vec<String> = dispatcher.calls().into_iter().map(|c| c.prompt).collect();
        assert_eq!(prompts, ["piped\n\n\none", "two"]);
    }

    #[tokio::test]
    async fn exit_right_after_mode_switch_dispatches_nothing() {
        let dispatcher = FakeDispatcher::default();
        let executor = FakeExecutor::default();
        let mut script = Script::new(&["role(shell)", "exit()", "ignored"]);

        let exit = run(RoleKind::Default, None, &mut script, &dispatcher, &executor).await;
        assert_eq!(exit, ReplExit::ExitCommand);
        assert!(dispatcher.calls().is_empty());
    }

    #[tokio::test]
    async fn interrupt_and_eof_end_the_loop_cleanly() {
        let dispatcher = FakeDispatcher::default();
        let executor = FakeExecutor::default();

        let mut script = Script::new(&["hi"]).then(ReadLine::Interrupted);
        let exit = run(RoleKind::Default, None, &mut script, &dispatcher, &executor).await;
        assert_eq!(exit, ReplExit::Interrupted);

        let mut script = Script::new(&[]);
        let exit = run(RoleKind::Default, None, &mut script, &dispatcher, &executor).await;
        assert_eq!(exit, ReplExit::EndOfInput);
        assert_eq!(dispatcher.calls().len(), 1);
    }

    #[tokio::test]
    async fn pre_cancelled_token_stops_before_reading() {
        let dispatcher = FakeDispatcher::default();
        let executor = FakeExecutor::default();
        let mut script = Script::new(&["hello"]);
        let session = session(RoleKind::Default);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let exit = run_loop(
            &session,
            ReplState::new(&session.role, None),
            &dispatcher,
            &executor,
            &mut script,
            &cancel,
        )
        .await
        .unwrap();
        assert_eq!(exit, ReplExit::Interrupted);
        assert!(script.prompts.is_empty());
        assert!(dispatcher.calls().is_empty());
    }

    #[tokio::test]
    async fn dispatcher_errors_propagate() {
        let dispatcher = FakeDispatcher { fail: true, ..Default::default() };
        let executor = FakeExecutor::default();
        let mut script = Script::new(&["hello", "exit()"]);
        let session = session(RoleKind::Default);

        let result = run_loop(
            &session,
            ReplState::new(&session.role, None),
            &dispatcher,
            &executor,
            &mut script,
            &CancellationToken::new(),
        )
        .await;
        assert!(result.unwrap_err().to_string().contains("service unavailable"));
        assert_eq!(script.lines.len(), 1);
    }

    #[tokio::test]
    async fn cancelling_abandons_in_flight_request() {
        let cancel = CancellationToken::new();
        let dispatcher = HangingDispatcher { cancel: cancel.clone(), calls: Mutex::new(0) };
        let executor = FakeExecutor::default();
        let mut script = Script::new(&["hello", "more"]);
        let session = session(RoleKind::Default);

        let exit = run_loop(
            &session,
            ReplState::new(&session.role, None),
            &dispatcher,
            &executor,
            &mut script,
            &cancel,
        )
        .await
        .unwrap();
        assert_eq!(exit, ReplExit::Interrupted);
        assert_eq!(*dispatcher.calls.lock().unwrap(), 1);
        assert_eq!(script.prompts, [PROMPT]);
        assert_eq!(script.lines.len(), 1);
    }

    #[tokio::test]
    async fn executor_errors_propagate() {
        let dispatcher = FakeDispatcher::default();
        let executor = FakeExecutor { fail: true, ..Default::default() };
        let mut script = Script::new(&["e", "exit()"]);
        let session = session(RoleKind::Shell);

        let result = run_loop(
            &session,
            ReplState::new(&session.role, None),
            &dispatcher,
            &executor,
            &mut script,
            &CancellationToken::new(),
        )
        .await;
        assert!(result.unwrap_err().to_string().contains("Failed to spawn shell"));
        assert!(dispatcher.calls().is_empty());
        assert_eq!(script.lines.len(), 1);
    }

    #[tokio::test]
    async fn session_continues_after_running_a_command() {
        let dispatcher = FakeDispatcher::replying(&["sleep 100", "ls"]);
        let executor = FakeExecutor::default();
        let mut script = Script::new(&["wait", "e", "list files", "e", "exit()"]);

        let exit = run(RoleKind::Shell, None, &mut script, &dispatcher, &executor).await;
        assert_eq!(exit, ReplExit::ExitCommand);
        assert_eq!(*executor.commands.lock().unwrap(), ["sleep 100", "ls"]);
    }
}
