// src/llm/openai_compatible.rs

use crate::error::Result;
use crate::history::Turn;
use crate::llm::CompletionOptions;
use anyhow::{anyhow, Context};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument};

// --- Request Structures ---

#[derive(Serialize, Debug)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<Turn>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    pub stream: bool,
}

// --- Response Structures ---

#[derive(Deserialize, Debug)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
    // Some providers report errors in a 200 body
    pub error: Option<ApiError>,
}

#[derive(Deserialize, Debug)]
pub struct ChatChoice {
    pub message: ResponseMessage,
    pub finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct ResponseMessage {
    pub content: Option<String>, // Content can sometimes be null
}

#[derive(Deserialize, Debug)]
pub struct ApiError {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: Option<String>,
    pub code: Option<serde_json::Value>,
}

fn build_headers(api_key: &str) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    let mut auth_value =
        HeaderValue::from_str(&format!("Bearer {}", api_key)).context("Invalid API key format")?;
    auth_value.set_sensitive(true);
    headers.insert(AUTHORIZATION, auth_value);
    Ok(headers)
}

pub(crate) async fn handle_api_response<T: serde::de::DeserializeOwned + std::fmt::Debug>(
    response: reqwest::Response,
    operation_name: &str,
) -> Result<T> {
    let status = response.status();
    let response_bytes = response
        .bytes()
        .await
        .context(format!("Failed to read {} response body", operation_name))?;

    match serde_json::from_slice::<T>(&response_bytes) {
        Ok(parsed_response) => {
            debug!(?parsed_response, "Successfully parsed {} response", operation_name);
            Ok(parsed_response)
        }
        Err(parse_error) => {
            let body_string = String::from_utf8_lossy(&response_bytes);
            error!(
                status = ?status,
                error = ?parse_error,
                response_body = ?body_string,
                "Failed to parse {} response", operation_name
            );
            let base_msg = if status.is_success() {
                format!("Failed to parse successful {} response", operation_name)
            } else {
                format!("API {} request failed", operation_name)
            };
            Err(anyhow!("{} (Status: {}): {}. Body: {}", base_msg, status, parse_error, body_string))
        }
    }
}

/// Pulls the assistant text out of a parsed completion.
pub fn extract_content(parsed_response: ChatCompletionResponse) -> Result<String> {
    if let Some(api_error) = parsed_response.error {
        error!(?api_error, "API returned an error in the response body");
        return Err(anyhow!(
            "API Error: {} (Type: {:?}, Code: {:?})",
            api_error.message,
            api_error.error_type,
            api_error.code
        ));
    }

    let choice = parsed_response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("Completion response contained no choices"))?;
    if choice.finish_reason.as_deref() == Some("length") {
        debug!("Completion was cut off by the token limit");
    }
    choice
        .message
        .content
        .ok_or_else(|| anyhow!("Failed to extract text content from response choices"))
}

#[instrument(skip(client, api_key, base_url, messages, options))]
pub async fn generate(
    client: &Client,
    api_key: &str,
    base_url: &str,
    model: &str,
    messages: Vec<Turn>,
    options: &CompletionOptions,
) -> Result<String> {
    let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));
    let headers = build_headers(api_key)?;

    let request_payload = ChatCompletionRequest {
        model: model.to_string(),
        messages,
        temperature: options.temperature,
        top_p: options.top_p,
        stream: false,
    };

    debug!(?url, model, turns = request_payload.messages.len(), "Sending chat completion request");

    let response = client
        .post(&url)
        .headers(headers)
        .json(&request_payload)
        .send()
        .await
        .context(format!("Failed to send request to {}", url))?;

    let parsed_response: ChatCompletionResponse =
        handle_api_response(response, "chat completion").await?;
    extract_content(parsed_response)
}
