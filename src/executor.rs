// src/executor.rs

use crate::error::Result;
use anyhow::Context;
use std::env;
use std::io::{self, Write};
use std::process::{Command, Stdio};
use tracing::{debug, instrument};

/// What a finished shell command left behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutcome {
    /// Writes captured output to the terminal, stderr last, plus the status when it failed.
    pub fn print(&self) -> Result<()> {
        if !self.stdout.is_empty() {
            print!("{}", self.stdout);
        }
        io::stdout().flush().context("Failed to flush stdout after command output")?;
        if !self.stderr.is_empty() {
            eprint!("{}", self.stderr);
        }
        io::stderr().flush().context("Failed to flush stderr after command output")?;
        if !self.success {
            match self.code {
                Some(code) => eprintln!("\nCommand exited with status: {}", code),
                None => eprintln!("\nCommand terminated by signal"),
            }
        }
        Ok(())
    }
}

pub trait CommandExecutor {
    fn execute(&self, command: &str) -> Result<CommandOutcome>;
}

/// Runs commands through the user's shell (`$SHELL -c`, or `cmd /C` on Windows).
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    shell: String,
}

impl ShellExecutor {
    pub fn new(shell: impl Into<String>) -> Self {
        Self { shell: shell.into() }
    }

    pub fn from_env() -> Self {
        let shell = if cfg!(target_os = "windows") {
            "cmd".to_string()
        } else {
            env::var("SHELL")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "sh".to_string())
        };
        Self::new(shell)
    }

    fn command(&self, command: &str) -> Command {
        let mut cmd = Command::new(&self.shell);
        if cfg!(target_os = "windows") && self.shell.eq_ignore_ascii_case("cmd") {
            cmd.args(["/C", command]);
        } else {
            cmd.arg("-c").arg(command);
        }
        // Prompts like `rm -i` still need the user's keyboard.
        cmd.stdin(Stdio::inherit());
        cmd
    }
}

impl CommandExecutor for ShellExecutor {
    #[instrument(skip(self))]
    fn execute(&self, command: &str) -> Result<CommandOutcome> {
        debug!(shell = %self.shell, "Executing shell command");
        let output = self
            .command(command)
            .output()
            .with_context(|| format!("Failed to spawn shell '{}'", self.shell))?;
        Ok(CommandOutcome {
            code: output.status.code(),
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
