// src/cli/helper.rs
use crate::cli::repl::{LineSource, ReadLine, CONTROL_TOKENS};
use crate::config::default_config_dir;
use crate::error::Result;
use rustyline::completion::{Completer, Pair};
use rustyline::config::{Behavior, Config as EditorConfig};
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::history::DefaultHistory;
use rustyline::validate::Validator;
use rustyline::{Context, Editor, Helper, Result as RustylineResult};
use std::path::PathBuf;
use tracing::{error, warn};

const HISTORY_FILE: &str = "history.txt";

#[derive(Helper)]
pub struct ReplHelper {}

impl ReplHelper {
    pub fn new() -> Self {
        Self {}
    }
}

// Completes the REPL's control tokens from the start of the line.
impl Completer for ReplHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> RustylineResult<(usize, Vec<Self::Candidate>)> {
        let typed = &line[..pos];
        if typed.is_empty() || typed.contains(char::is_whitespace) {
            return Ok((pos, Vec::new()));
        }
        let completions = CONTROL_TOKENS
            .iter()
            .filter(|token| token.starts_with(typed))
            .map(|token| Pair {
                display: token.to_string(),
                replacement: token.to_string(),
            })
            .collect();
        Ok((0, completions))
    }
}

impl Hinter for ReplHelper {
    type Hint = String;
    fn hint(&self, _line: &str, _pos: usize, _ctx: &Context<'_>) -> Option<String> {
        None
    }
}

impl Validator for ReplHelper {}

impl Highlighter for ReplHelper {}

fn get_history_path() -> PathBuf {
    let path = default_config_dir();
    std::fs::create_dir_all(&path).ok();
    path.join(HISTORY_FILE)
}

/// Terminal input through rustyline, with persistent line history.
pub struct EditorSource {
    rl: Editor<ReplHelper, DefaultHistory>,
    history_path: PathBuf,
}

/// With stdin already drained by a pipe, rustyline has to talk to `/dev/tty`.
pub fn editor_config(stdin_piped: bool) -> EditorConfig {
    let behavior = if stdin_piped {
        Behavior::PreferTerm
    } else {
        Behavior::Stdio
    };
    EditorConfig::builder().behavior(behavior).build()
}

impl EditorSource {
    pub fn new(stdin_piped: bool) -> Result<Self> {
        let mut rl = Editor::<ReplHelper, DefaultHistory>::with_config(editor_config(stdin_piped))?;
        rl.set_helper(Some(ReplHelper::new()));
        let history_path = get_history_path();
        if let Err(e) = rl.load_history(&history_path) {
            warn!("Failed to load command history from {:?}: {}", history_path, e);
        }
        Ok(Self { rl, history_path })
    }
}

impl LineSource for EditorSource {
    fn read_line(&mut self, prompt: &str) -> Result<ReadLine> {
        match self.rl.readline(prompt) {
            Ok(line) => {
                if !line.trim().is_empty() {
                    if let Err(e) = self.rl.add_history_entry(line.as_str()) {
                        warn!("Failed to add line to history: {}", e);
                    }
                }
                Ok(ReadLine::Line(line))
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                Ok(ReadLine::Interrupted)
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                Ok(ReadLine::Eof)
            }
            Err(err) => {
                error!("Readline error: {:?}", err);
                Err(err.into())
            }
        }
    }
}

impl Drop for EditorSource {
    fn drop(&mut self) {
        if let Err(e) = self.rl.save_history(&self.history_path) {
            error!("Failed to save command history to {:?}: {}", self.history_path, e);
        }
    }
}
