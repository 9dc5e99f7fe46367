// src/handler.rs

use crate::cli::render;
use crate::config::Config;
use crate::error::Result;
use crate::history::{HistoryStore, Turn};
use crate::llm::{self, CompletionOptions};
use crate::role::SystemRole;
use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, instrument};

/// Turns a role and prompt into a reply, printing it on the way.
///
/// With a `chat_id` the exchange is replayed from and appended to that chat's
/// history; without one the request stands alone.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn complete(
        &self,
        role: &SystemRole,
        prompt: &str,
        markdown: bool,
        chat_id: Option<&str>,
        options: &CompletionOptions,
    ) -> Result<String>;
}

pub struct ChatHandler {
    client: Client,
    config: Config,
    store: HistoryStore,
}

impl ChatHandler {
    pub fn new(client: Client, config: Config, store: HistoryStore) -> Self {
        Self { client, config, store }
    }
}

/// Messages to send, and the turns a chat must persist once the reply is in.
/// A chat's first exchange also stores the role's system turn.
pub fn build_messages(
    store: &HistoryStore,
    role: &SystemRole,
    prompt: &str,
    chat_id: Option<&str>,
) -> Result<(Vec<Turn>, Vec<Turn>)> {
    let mut messages = match chat_id {
        Some(id) => store.load(id)?,
        None => Vec::new(),
    };
    let mut to_store = Vec::new();
    if messages.is_empty() {
        let system = Turn::system(role.prompt.as_str());
        messages.push(system.clone());
        to_store.push(system);
    }
    let user = Turn::user(prompt);
    messages.push(user.clone());
    to_store.push(user);
    Ok((messages, to_store))
}

#[async_trait]
impl Dispatcher for ChatHandler {
    #[instrument(skip(self, role, prompt, options), fields(role = role.name()))]
    async fn complete(
        &self,
        role: &SystemRole,
        prompt: &str,
        markdown: bool,
        chat_id: Option<&str>,
        options: &CompletionOptions,
    ) -> Result<String> {
        let (messages, mut to_store) = build_messages(&self.store, role, prompt, chat_id)?;
        debug!(turns = messages.len(), "Dispatching completion");

        let response = llm::generate(&self.client, &self.config, messages, options).await?;
        render::print_response(&response, markdown);

        if let Some(id) = chat_id {
            to_store.push(Turn::assistant(response.as_str()));
            self.store.append(id, &to_store)?;
        }
        Ok(response)
    }
}
