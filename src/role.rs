// src/role.rs
use crate::config::Config;
use std::env;
use std::path::Path;

const DEFAULT_ROLE_PROMPT: &str = "You are programming and system administration assistant.
You are managing {os} operating system with {shell} shell.
Provide short responses in about 100 words, unless you are specifically asked for more details.
If you need to store any data, assume it will be stored in the conversation.
APPLY MARKDOWN formatting when possible.";

const SHELL_ROLE_PROMPT: &str = "Provide only {shell} commands for {os} without any description.
If there is a lack of details, provide most logical solution.
Ensure the output is a valid shell command.
If multiple steps required try to combine them together using &&.
Provide only plain text without Markdown formatting.
Do not provide markdown formatting such as ```.";

const DESCRIBE_SHELL_ROLE_PROMPT: &str = "Provide a terse, single sentence description of the given shell command.
Describe each argument and option of the command.
Provide short responses in about 80 words.
APPLY MARKDOWN formatting when possible.";

const CODE_ROLE_PROMPT: &str = "Provide only code as output without any description.
Provide only code in plain text format without Markdown formatting.
Do not include symbols such as ``` or ```python.
If there is a lack of details, provide most logical solution.
You are not allowed to ask for more details.
For example if the prompt is \"Hello world Python\", you should return \"print('Hello world')\".";

/// Built-in personas. Shell mode is keyed off `Shell`, never off a role name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleKind {
    Default,
    Shell,
    DescribeShell,
    Code,
}

impl RoleKind {
    pub fn name(&self) -> &'static str {
        match self {
            RoleKind::Default => "ShellChat",
            RoleKind::Shell => "Shell Command Generator",
            RoleKind::DescribeShell => "Shell Command Descriptor",
            RoleKind::Code => "Code Generator",
        }
    }

    fn template(&self) -> &'static str {
        match self {
            RoleKind::Default => DEFAULT_ROLE_PROMPT,
            RoleKind::Shell => SHELL_ROLE_PROMPT,
            RoleKind::DescribeShell => DESCRIBE_SHELL_ROLE_PROMPT,
            RoleKind::Code => CODE_ROLE_PROMPT,
        }
    }
}

/// A role resolved against the host: its system prompt is ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemRole {
    pub kind: RoleKind,
    pub prompt: String,
}

impl SystemRole {
    pub fn new(kind: RoleKind, os_name: &str, shell_name: &str) -> Self {
        let prompt = kind
            .template()
            .replace("{os}", os_name)
            .replace("{shell}", shell_name);
        Self { kind, prompt }
    }

    pub fn from_config(kind: RoleKind, config: &Config) -> Self {
        Self::new(kind, &detect_os(&config.os_name), &detect_shell(&config.shell_name))
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn is_shell(&self) -> bool {
        self.kind == RoleKind::Shell
    }
}

/// Resolves `auto` to the running OS, otherwise returns the override.
pub fn detect_os(configured: &str) -> String {
    if configured != "auto" {
        return configured.to_string();
    }
    match env::consts::OS {
        "linux" => "Linux".to_string(),
        "macos" => "macOS".to_string(),
        "windows" => "Windows".to_string(),
        other => other.to_string(),
    }
}

/// Resolves `auto` to the basename of `$SHELL` (or the Windows default).
pub fn detect_shell(configured: &str) -> String {
    if configured != "auto" {
        return configured.to_string();
    }
    if cfg!(target_os = "windows") {
        return if env::var_os("PSModulePath").is_some() {
            "powershell.exe".to_string()
        } else {
            "cmd.exe".to_string()
        };
    }
    env::var("SHELL")
        .ok()
        .and_then(|s| {
            Path::new(&s)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| "sh".to_string())
}
