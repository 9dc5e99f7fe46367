// src/cli/render.rs

use crate::history::Turn;
use console::{style, Style, Term};
use std::io::Write;
use std::process::{Command, Stdio};
use tracing::debug;

const FALLBACK_WIDTH: usize = 80;

/// Prints a model reply. Markdown goes through `glow` when it is installed.
pub fn print_response(text: &str, markdown: bool) {
    if markdown && pipe_to_glow(text) {
        return;
    }
    println!("{}", text.trim_end());
}

fn pipe_to_glow(text: &str) -> bool {
    let Ok(mut glow_process) = Command::new("glow")
        .stdin(Stdio::piped())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
    else {
        debug!("glow not available, printing plain text");
        return false;
    };

    if let Some(mut stdin) = glow_process.stdin.take() {
        if let Err(e) = stdin.write_all(text.as_bytes()) {
            eprintln!("Error writing to glow's stdin: {}", e);
        }
    }
    if let Err(e) = glow_process.wait() {
        eprintln!("Error waiting for glow to finish: {}", e);
    }
    true
}

/// Full-width horizontal rule with an optional centred title.
pub fn rule(title: Option<&str>, color: Style) -> String {
    let width = Term::stdout()
        .size_checked()
        .map(|(_, cols)| cols as usize)
        .unwrap_or(FALLBACK_WIDTH);
    let line = match title {
        Some(title) => {
            let label = format!(" {} ", title);
            let side = width.saturating_sub(label.chars().count()) / 2;
            format!("{}{}{}", "─".repeat(side), label, "─".repeat(side))
        }
        None => "─".repeat(width),
    };
    color.apply_to(line).to_string()
}

pub fn print_rule(title: Option<&str>, color: Style) {
    println!("{}", rule(title, color));
}

pub fn history_rule_style() -> Style {
    Style::new().magenta().bold()
}

pub fn input_rule_style() -> Style {
    Style::new().color256(93).bold()
}

/// Prints user/assistant turns; system prompts are not shown.
pub fn print_turns(turns: &[Turn]) {
    for turn in turns.iter().filter(|t| !t.is_system()) {
        let label = match turn.role.as_str() {
            "user" => style(turn.role.as_str()).cyan(),
            "assistant" => style(turn.role.as_str()).green(),
            _ => style(turn.role.as_str()).dim(),
        };
        println!("{}: {}", label, turn.content.trim_end());
    }
}

pub fn print_notice(message: &str) {
    println!("{}", style(message).yellow());
}
