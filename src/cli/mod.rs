// src/cli/mod.rs
pub mod helper;
pub mod render;
pub mod repl;

use crate::config::Config;
use crate::error::Result;
use crate::executor::{CommandExecutor, ShellExecutor};
use crate::handler::{ChatHandler, Dispatcher};
use crate::history::HistoryStore;
use crate::llm::CompletionOptions;
use crate::role::{detect_os, detect_shell, RoleKind, SystemRole};
use anyhow::{anyhow, bail, Context};
use clap::Parser;
use reqwest::Client;
use std::io::{self, BufRead, IsTerminal, Write};
use tracing::{debug, info};

/// Ask a language model from the terminal, chat with it, or have it write shell commands.
#[derive(Parser, Debug)]
#[command(name = "shell-chat")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// The prompt to send (piped stdin is prepended to it)
    pub prompt: Option<String>,

    /// Model to use instead of the configured default
    #[arg(long)]
    pub model: Option<String>,

    /// Sampling temperature
    #[arg(long)]
    pub temperature: Option<f32>,

    /// Nucleus sampling probability mass
    #[arg(long)]
    pub top_p: Option<f32>,

    /// Render replies as markdown
    #[arg(long, overrides_with = "no_md")]
    pub md: bool,

    /// Print replies as plain text
    #[arg(long, overrides_with = "md")]
    pub no_md: bool,

    /// Generate and run shell commands
    #[arg(short, long, conflicts_with_all = ["describe_shell", "code"])]
    pub shell: bool,

    /// Describe a shell command
    #[arg(short, long, conflicts_with = "code")]
    pub describe_shell: bool,

    /// Generate only code
    #[arg(short, long)]
    pub code: bool,

    /// Continue a conversation with the given id
    #[arg(long, value_name = "CHAT_ID", conflicts_with = "repl")]
    pub chat: Option<String>,

    /// Start an interactive session (use "temp" for a throwaway chat)
    #[arg(long, value_name = "CHAT_ID")]
    pub repl: Option<String>,

    /// Print the messages of a conversation
    #[arg(long, value_name = "CHAT_ID")]
    pub show_chat: Option<String>,

    /// List stored conversations
    #[arg(long)]
    pub list_chats: bool,
}

impl Cli {
    pub fn role_kind(&self) -> RoleKind {
        if self.shell {
            RoleKind::Shell
        } else if self.describe_shell {
            RoleKind::DescribeShell
        } else if self.code {
            RoleKind::Code
        } else {
            RoleKind::Default
        }
    }

    /// Shell and code output is never rendered as markdown.
    pub fn markdown(&self, default: bool) -> bool {
        if matches!(self.role_kind(), RoleKind::Shell | RoleKind::Code) {
            return false;
        }
        if self.md {
            true
        } else if self.no_md {
            false
        } else {
            default
        }
    }

    pub fn options(&self) -> CompletionOptions {
        CompletionOptions {
            model: self.model.clone(),
            temperature: self.temperature,
            top_p: self.top_p,
        }
    }
}

/// Joins piped stdin and the positional prompt.
pub fn combine_prompt(stdin: Option<String>, prompt: Option<String>) -> Option<String> {
    match (stdin.filter(|s| !s.trim().is_empty()), prompt) {
        (Some(piped), Some(prompt)) => Some(format!("{}\n\n{}", piped.trim_end(), prompt)),
        (Some(piped), None) => Some(piped),
        (None, prompt) => prompt,
    }
}

/// Marks the end of piped input that is followed by more input for the REPL.
const STDIN_EOF_MARKER: &str = "__sgpt__eof__";

/// Collects piped lines up to the end marker (or end of input).
pub fn read_piped<R: BufRead>(reader: R) -> Result<String> {
    let mut buf = String::new();
    for line in reader.lines() {
        let line = line.context("Failed to read piped stdin")?;
        if line.contains(STDIN_EOF_MARKER) {
            break;
        }
        buf.push_str(&line);
        buf.push('\n');
    }
    Ok(buf)
}

fn read_piped_stdin(stdin_piped: bool) -> Result<Option<String>> {
    if !stdin_piped {
        return Ok(None);
    }
    read_piped(io::stdin().lock()).map(Some)
}

/// The REPL reads from the controlling terminal once the pipe is drained.
fn ensure_controlling_terminal() -> Result<()> {
    if cfg!(unix) {
        std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open("/dev/tty")
            .context("--repl with piped stdin needs a controlling terminal")?;
    }
    Ok(())
}

pub async fn run(cli: Cli, config: Config, client: Client) -> Result<()> {
    let store = HistoryStore::new(&config.chat_cache_path, config.chat_cache_length);

    if cli.list_chats {
        for id in store.list_ids()? {
            println!("{}", store.dir().join(id).display());
        }
        return Ok(());
    }
    if let Some(chat_id) = &cli.show_chat {
        if !store.exists(chat_id) {
            bail!("Chat '{}' does not exist", chat_id);
        }
        render::print_turns(&store.load(chat_id)?);
        return Ok(());
    }

    let stdin_piped = !io::stdin().is_terminal();
    if stdin_piped && cli.repl.is_some() {
        ensure_controlling_terminal()?;
    }
    let prompt = combine_prompt(read_piped_stdin(stdin_piped)?, cli.prompt.clone());
    let kind = cli.role_kind();
    let markdown = cli.markdown(config.prettify_markdown);
    let options = cli.options();
    debug!(?kind, markdown, ?options, "Resolved invocation");

    let executor = ShellExecutor::from_env();
    let dispatcher = ChatHandler::new(client, config.clone(), store);

    if let Some(chat_id) = cli.repl {
        let session = repl::ReplSession::new(
            chat_id,
            kind,
            &detect_os(&config.os_name),
            &detect_shell(&config.shell_name),
            markdown,
            options,
        );
        let reason = repl::run_interactive(
            &config,
            session,
            prompt,
            stdin_piped,
            &dispatcher,
            &executor,
        )
        .await?;
        info!(?reason, "REPL finished");
        return Ok(());
    }

    let prompt = prompt.ok_or_else(|| {
        anyhow!("A prompt is required unless --repl, --show-chat or --list-chats is given")
    })?;
    let role = SystemRole::from_config(kind, &config);
    let response = dispatcher
        .complete(&role, &prompt, markdown, cli.chat.as_deref(), &options)
        .await?;

    if role.is_shell() && config.shell_interaction && io::stdin().is_terminal() {
        let describe_role = SystemRole::from_config(RoleKind::DescribeShell, &config);
        shell_interaction(
            &response,
            config.default_execute_shell_cmd,
            &dispatcher,
            &executor,
            &describe_role,
            &options,
        )
        .await?;
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellChoice {
    Execute,
    Describe,
    Abort,
}

/// Maps an answer to the execute/describe/abort question. Empty takes the default.
pub fn parse_choice(answer: &str, default_execute: bool) -> Option<ShellChoice> {
    match answer.trim().to_lowercase().as_str() {
        "" if default_execute => Some(ShellChoice::Execute),
        "" => Some(ShellChoice::Abort),
        "e" | "execute" => Some(ShellChoice::Execute),
        "d" | "describe" => Some(ShellChoice::Describe),
        "a" | "abort" => Some(ShellChoice::Abort),
        _ => None,
    }
}

async fn shell_interaction<D, E>(
    command: &str,
    default_execute: bool,
    dispatcher: &D,
    executor: &E,
    describe_role: &SystemRole,
    options: &CompletionOptions,
) -> Result<()>
where
    D: Dispatcher + ?Sized,
    E: CommandExecutor + ?Sized,
{
    let default = if default_execute { "E" } else { "A" };
    loop {
        print!("[E]xecute, [D]escribe, [A]bort [{}]: ", default);
        io::stdout().flush().context("Flush failed")?;
        let mut buf = String::new();
        if io::stdin().read_line(&mut buf).context("Read failed")? == 0 {
            return Ok(());
        }
        match parse_choice(&buf, default_execute) {
            Some(ShellChoice::Execute) => {
                executor.execute(command)?.print()?;
                return Ok(());
            }
            Some(ShellChoice::Describe) => {
                dispatcher
                    .complete(describe_role, command, false, None, options)
                    .await?;
            }
            Some(ShellChoice::Abort) => return Ok(()),
            None => println!("Invalid input. Try again."),
        }
    }
}
