//! Ask Google Gemini from the chat.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::error;

use super::{
    Handler, MAX_MESSAGE_CHARS, MessageContext, Plugin, PluginContext, PluginError, bind,
};
use crate::telegram::escape_html;

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-2.5-flash";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const GENERATION_FAILED: &str = "error when generating response, see log for more info";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

impl GenerateResponse {
    /// Text of the first candidate, `None` when it has none.
    fn text(&self) -> Option<String> {
        let parts = &self.candidates.first()?.content.as_ref()?.parts;
        let text: String = parts.iter().filter_map(|p| p.text.as_deref()).collect();
        (!text.is_empty()).then_some(text)
    }
}

pub struct Gemini {
    ctx: PluginContext,
    http: Client,
}

pub fn load(ctx: &PluginContext) -> Result<Arc<dyn Plugin>, PluginError> {
    Ok(Arc::new(Gemini {
        ctx: ctx.clone(),
        http: Client::builder().timeout(REQUEST_TIMEOUT).build()?,
    }))
}

impl Gemini {
    async fn generate(&self, api_key: &str, model: &str, prompt: &str) -> Result<String, PluginError> {
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![RequestPart { text: prompt }],
            }],
            generation_config: GenerationConfig { temperature: 1.0 },
        };

        let response = self
            .http
            .post(format!("{API_BASE}/models/{model}:generateContent"))
            .header("x-goog-api-key", api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PluginError::Failed(format!(
                "status: {status}, body: {body}"
            )));
        }

        let parsed: GenerateResponse = response.json().await?;
        parsed
            .text()
            .ok_or_else(|| PluginError::Failed("response has no text".to_owned()))
    }

    /// Asks the model, folding every failure into a fixed message.
    async fn ask_gemini(&self, api_key: &str, prompt: &str) -> String {
        let model = std::env::var("GEMINI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_owned());
        match self.generate(api_key, &model, prompt).await {
            Ok(text) => text,
            Err(e) => {
                error!("error when generating response: {}", e);
                GENERATION_FAILED.to_owned()
            }
        }
    }

    async fn ask(self: Arc<Self>, ctx: MessageContext) -> Result<(), PluginError> {
        let Ok(api_key) = std::env::var("GEMINI_API_KEY") else {
            error!("api key for gemini is not set, please export GEMINI_API_KEY");
            return ctx.edit("api key for gemini is not set").await;
        };

        if ctx.args().is_empty() {
            return ctx.edit("Please provide a search query!").await;
        }

        ctx.edit("Asking..").await?;
        let answer = self.ask_gemini(&api_key, ctx.args()).await;

        if answer.chars().count() > MAX_MESSAGE_CHARS {
            ctx.edit("response too long, sending as file").await?;
            let dir = tempfile::tempdir()?;
            let path = dir.path().join("response.md");
            tokio::fs::write(&path, &answer).await?;
            ctx.reply_document(&path, "").await?;
            return Ok(());
        }

        ctx.edit(&escape_html(&answer)).await
    }
}

#[async_trait]
impl Plugin for Gemini {
    fn name(&self) -> &'static str {
        "Gemini"
    }

    fn description(&self) -> &'static str {
        "ask Google Gemini"
    }

    fn register_handlers(self: Arc<Self>) -> Vec<Handler> {
        vec![Handler::new(
            self.ctx.command(["ask"]).me_only(),
            bind(&self, Self::ask),
        )]
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_request_shape() {
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![RequestPart { text: "hi" }],
            }],
            generation_config: GenerationConfig { temperature: 1.0 },
        };

        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "contents": [{"parts": [{"text": "hi"}]}],
                "generationConfig": {"temperature": 1.0}
            })
        );
    }

    #[test]
    fn test_response_text_joins_parts() {
        let response: GenerateResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"parts": [{"text": "Hello, "}, {"text": "world"}], "role": "model"},
                "finishReason": "STOP"
            }]
        }))
        .unwrap();
        assert_eq!(response.text().as_deref(), Some("Hello, world"));
    }

    #[test]
    fn test_response_without_text() {
        let blocked: GenerateResponse = serde_json::from_value(json!({
            "promptFeedback": {"blockReason": "SAFETY"}
        }))
        .unwrap();
        assert_eq!(blocked.text(), None);

        let empty: GenerateResponse =
            serde_json::from_value(json!({"candidates": [{"finishReason": "SAFETY"}]})).unwrap();
        assert_eq!(empty.text(), None);
    }
}
