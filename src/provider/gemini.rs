//! Google Gemini provider over the `generateContent` REST API.

use super::{Provider, ProviderKind, TextStream};
use crate::config::Config;
use crate::conversation::Conversation;
use crate::http_client::HttpClient;
use crate::sse::parse_sse_stream;
use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt, future};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: Option<u16>,
    #[serde(default)]
    message: String,
}

impl GenerateResponse {
    fn parse(body: &str) -> Result<Self> {
        let response: Self =
            serde_json::from_str(body).context("failed to parse Gemini response")?;
        if let Some(error) = &response.error {
            match error.code {
                Some(code) => bail!("Gemini API error {}: {}", code, error.message),
                None => bail!("Gemini API error: {}", error.message),
            }
        }
        Ok(response)
    }

    /// Concatenated text parts of the first candidate.
    fn text(&self) -> Option<String> {
        let candidate = self.candidates.first()?;
        let text = candidate
            .content
            .iter()
            .flat_map(|content| &content.parts)
            .filter_map(|part| part.text.as_deref())
            .collect();
        Some(text)
    }
}

pub struct GeminiProvider {
    http: Box<dyn HttpClient>,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f64,
    base_url: String,
}

impl GeminiProvider {
    pub fn new(http: Box<dyn HttpClient>, api_key: &str, config: &Config) -> Self {
        Self {
            http,
            api_key: api_key.to_string(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn stream_url(&self) -> String {
        format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.base_url, self.model
        )
    }

    fn generate_url(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }

    fn request_body(&self, history: &Conversation, prompt: &str) -> Result<serde_json::Value> {
        let mut contents: Vec<Content> = history
            .turns()
            .iter()
            .map(|turn| Content {
                role: turn.role.as_str(),
                parts: vec![Part { text: &turn.text }],
            })
            .collect();
        contents.push(Content {
            role: "user",
            parts: vec![Part { text: prompt }],
        });

        let request = GenerateRequest {
            contents,
            generation_config: GenerationConfig {
                max_output_tokens: self.max_tokens,
                temperature: self.temperature,
            },
        };
        serde_json::to_value(&request).context("failed to encode Gemini request")
    }
}

/// Text carried by one streamed event. Events without candidates (usage
/// metadata, safety ratings) yield an empty string.
fn event_text(data: &str) -> Result<String> {
    let response = GenerateResponse::parse(data)?;
    Ok(response.text().unwrap_or_default())
}

#[async_trait]
impl Provider for GeminiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    async fn stream(&self, history: &Conversation, prompt: &str) -> Result<TextStream> {
        let body = self.request_body(history, prompt)?;
        debug!(model = %self.model, turns = history.len(), "opening Gemini stream");

        let bytes = self
            .http
            .post_json_stream(&self.stream_url(), &[(API_KEY_HEADER, self.api_key.as_str())], &body)
            .await?;
        let text = parse_sse_stream(bytes)
            .map(|event| event.and_then(|event| event_text(&event.data)))
            .try_filter(|chunk| future::ready(!chunk.is_empty()));
        Ok(Box::pin(text))
    }

    async fn complete(&self, history: &Conversation, prompt: &str) -> Result<String> {
        let body = self.request_body(history, prompt)?;
        info!(model = %self.model, "sending non-streaming Gemini request");

        let response = self
            .http
            .post_json(&self.generate_url(), &[(API_KEY_HEADER, self.api_key.as_str())], &body)
            .await?;
        GenerateResponse::parse(&response)?
            .text()
            .ok_or_else(|| anyhow!("no response candidates returned"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::tests::MockHttpClient;
    use crate::provider::send;
    use std::sync::Arc;

    struct SharedClient(Arc<MockHttpClient>);

    #[async_trait]
    impl HttpClient for SharedClient {
        async fn post_json(
            &self,
            url: &str,
            headers: &[(&str, &str)],
            body: &serde_json::Value,
        ) -> Result<String> {
            self.0.post_json(url, headers, body).await
        }

        async fn post_json_stream(
            &self,
            url: &str,
            headers: &[(&str, &str)],
            body: &serde_json::Value,
        ) -> Result<crate::http_client::ByteStream> {
            self.0.post_json_stream(url, headers, body).await
        }
    }

    fn provider(client: MockHttpClient) -> (GeminiProvider, Arc<MockHttpClient>) {
        let client = Arc::new(client);
        let config = Config {
            max_tokens: 256,
            temperature: 0.5,
            ..Config::default()
        };
        let provider = GeminiProvider::new(Box::new(SharedClient(client.clone())), "test-key", &config)
            .with_base_url("http://localhost/v1beta/");
        (provider, client)
    }

    fn reply_json(text: &str) -> String {
        serde_json::json!({
            "candidates": [{"content": {"role": "model", "parts": [{"text": text}]}}]
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_complete_sends_history_and_generation_config() {
        let (provider, client) = provider(MockHttpClient::text(&reply_json("ls -la")));
        let mut history = Conversation::primed("be brief");
        history.push_exchange("earlier", "answer");

        let reply = provider.complete(&history, "list files").await.unwrap();

        assert_eq!(reply, "ls -la");
        let requests = client.requests.lock().unwrap();
        let request = &requests[0];
        assert_eq!(
            request.url,
            "http://localhost/v1beta/models/gemini-2.0-flash:generateContent"
        );
        assert!(request
            .headers
            .contains(&("x-goog-api-key".to_string(), "test-key".to_string())));

        let contents = request.body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 4);
        assert_eq!(contents[0]["role"], "model");
        assert_eq!(contents[0]["parts"][0]["text"], "be brief");
        assert_eq!(contents[3]["role"], "user");
        assert_eq!(contents[3]["parts"][0]["text"], "list files");
        assert_eq!(request.body["generationConfig"]["maxOutputTokens"], 256);
        assert_eq!(request.body["generationConfig"]["temperature"], 0.5);
    }

    #[tokio::test]
    async fn test_complete_joins_all_parts_of_first_candidate() {
        let body = serde_json::json!({
            "candidates": [
                {"content": {"parts": [{"text": "Hello, "}, {"text": "world"}]}},
                {"content": {"parts": [{"text": "ignored"}]}}
            ]
        })
        .to_string();
        let (provider, _) = provider(MockHttpClient::text(&body));

        let reply = provider.complete(&Conversation::new(), "hi").await.unwrap();

        assert_eq!(reply, "Hello, world");
    }

    #[tokio::test]
    async fn test_complete_without_candidates_is_an_error() {
        let (provider, _) = provider(MockHttpClient::text(r#"{"candidates": []}"#));

        let err = provider.complete(&Conversation::new(), "hi").await.unwrap_err();

        assert!(err.to_string().contains("no response candidates"));
    }

    #[tokio::test]
    async fn test_error_payload_is_surfaced() {
        let body = r#"{"error": {"code": 400, "message": "API key not valid", "status": "INVALID_ARGUMENT"}}"#;
        let (provider, _) = provider(MockHttpClient::text(body));

        let err = provider.complete(&Conversation::new(), "hi").await.unwrap_err();

        assert!(err.to_string().contains("400"));
        assert!(err.to_string().contains("API key not valid"));
    }

    #[tokio::test]
    async fn test_transport_failure_is_propagated() {
        let (provider, _) = provider(MockHttpClient::failing("API error 503 Service Unavailable: overloaded"));

        let err = provider.complete(&Conversation::new(), "hi").await.unwrap_err();

        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_stream_yields_text_of_each_event() {
        let first = format!("data: {}\n\n", reply_json("Hel"));
        let second = format!("data: {}\n\n", reply_json("lo"));
        let split = first.len() / 2;
        let (provider, client) = provider(MockHttpClient::streaming(vec![
            Ok(&first[..split]),
            Ok(&first[split..]),
            Ok(second.as_str()),
            Ok("data: {\"usageMetadata\": {\"totalTokenCount\": 3}}\n\n"),
        ]));

        let chunks: Vec<String> = provider
            .stream(&Conversation::new(), "hi")
            .await
            .unwrap()
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;

        assert_eq!(chunks, vec!["Hel", "lo"]);
        let requests = client.requests.lock().unwrap();
        assert_eq!(
            requests[0].url,
            "http://localhost/v1beta/models/gemini-2.0-flash:streamGenerateContent?alt=sse"
        );
    }

    #[tokio::test]
    async fn test_stream_failure_falls_back_to_generate_content() {
        let event = format!("data: {}\n\n", reply_json("partial"));
        let client = MockHttpClient::streaming(vec![Ok(event.as_str()), Err("connection reset")]);
        let (provider, client) = provider(client);
        let mut history = Conversation::new();
        let mut out = Vec::new();
        let mut err = Vec::new();

        let result = send(&provider, &mut history, "hi", &mut out, &mut err).await;

        // The mock has no buffered response, so the fallback fails too.
        assert!(result.is_err());
        let requests = client.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert!(requests[1].url.ends_with(":generateContent"));
        assert!(history.is_empty());
    }
}
