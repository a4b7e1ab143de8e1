//! AI answer synthesis through the Gemini `generateContent` endpoint.
//!
//! The adapter is strictly best-effort: any transport error, non-200
//! status, or unexpected response shape degrades to "no summary" and the
//! search response carries `ai_summary: null`. Successful answers are
//! held in a dedicated day-long cache keyed by the raw query, so
//! repeated questions cost nothing.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

use crate::cache::ResponseCache;
use crate::error::Error;

const DEFAULT_MODEL: &str = "gemini-2.0-flash";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

const AI_CACHE_CAPACITY: usize = 500;
const AI_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// How much of an upstream error body makes it into the log.
const ERROR_BODY_LOG_LIMIT: usize = 500;

pub struct AiClient {
    http: reqwest::Client,
    cache: ResponseCache,
    api_key: Option<String>,
    model: String,
}

#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<RequestContent>,
}

#[derive(Serialize)]
struct RequestContent {
    parts: Vec<RequestPart>,
}

#[derive(Serialize)]
struct RequestPart {
    text: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    parts: Option<Vec<CandidatePart>>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

impl AiClient {
    /// Reads `GEMINI_API_KEY` and the optional `GEMINI_MODEL` override.
    /// With no key configured the client stays disabled and
    /// [`summarize`](Self::summarize) always returns `None`.
    pub fn from_env() -> Self {
        let api_key = std::env::var("GEMINI_API_KEY").ok().filter(|k| !k.is_empty());
        let model = std::env::var("GEMINI_MODEL")
            .ok()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("HTTP client construction failed");
        Self {
            http,
            cache: ResponseCache::new(AI_CACHE_CAPACITY, AI_CACHE_TTL),
            api_key,
            model,
        }
    }

    pub fn enabled(&self) -> bool {
        self.api_key.is_some()
    }

    /// Answers `query` using the assembled excerpt `context`. Returns
    /// `None` when disabled, when the context is empty, or on any
    /// upstream failure.
    pub async fn summarize(&self, query: &str, context: &str) -> Option<String> {
        let api_key = self.api_key.as_deref()?;
        if context.is_empty() {
            return None;
        }

        if let Some(hit) = self.cache.get(query) {
            return String::from_utf8(hit).ok();
        }

        match self.generate(query, context, api_key).await {
            Ok(summary) => {
                self.cache.set(query, summary.as_bytes(), None);
                Some(summary)
            }
            Err(e) => {
                warn!(error = %e, "AI synthesis failed");
                None
            }
        }
    }

    async fn generate(&self, query: &str, context: &str, api_key: &str) -> Result<String, Error> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            self.model, api_key
        );
        let body = GenerateRequest {
            contents: vec![RequestContent {
                parts: vec![RequestPart { text: build_prompt(query, context) }],
            }],
        };

        info!(query = query, context_bytes = context.len(), "Requesting AI summary");

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Upstream(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body: String = body.chars().take(ERROR_BODY_LOG_LIMIT).collect();
            return Err(Error::Upstream(format!("model endpoint returned {status}: {body}")));
        }

        let parsed: GenerateResponse =
            response.json().await.map_err(|e| Error::Upstream(e.to_string()))?;

        extract_text(parsed).ok_or_else(|| {
            Error::Upstream("response missing candidates[0].content.parts[0].text".into())
        })
    }
}

/// Walks `candidates[0].content.parts[0].text`.
fn extract_text(response: GenerateResponse) -> Option<String> {
    response.candidates?.into_iter().next()?.content?.parts?.into_iter().next()?.text
}

fn build_prompt(query: &str, context: &str) -> String {
    format!(
        "You are an expert assistant answering a reader's question about their PDF library. \
         Answer the question directly from your own knowledge; the PDF page excerpts below are \
         supplementary context, not the only source.\n\n\
         USER QUERY: \"{query}\"\n\n\
         SUPPLEMENTARY PDF CONTEXT:\n{context}\n\n\
         RESPONSE RULES:\n\
         1. Answer the exact question asked. Lead with the direct answer in the first paragraph.\n\
         2. Add supporting detail after the answer, and name the source excerpt when you rely on one.\n\
         3. For broad questions, cover the topic comprehensively; for specific questions, stay focused.\n\
         4. If the excerpts are incomplete, supplement them with your own expert knowledge.\n\n\
         OUTPUT FORMAT:\n\
         - Output raw HTML only, using <p>, <ul>, <ol>, <li>, <h3>, <h4>, <b>, <strong>, <em>, <i>, <br>.\n\
         - No markdown syntax and no code fences.\n\
         - Start immediately with an HTML tag."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_summary_text_from_well_formed_response() {
        let parsed: GenerateResponse = serde_json::from_value(json!({
            "candidates": [
                { "content": { "parts": [ { "text": "<p>Answer.</p>" } ] } }
            ]
        }))
        .unwrap();
        assert_eq!(extract_text(parsed).as_deref(), Some("<p>Answer.</p>"));
    }

    #[test]
    fn missing_fields_yield_none() {
        for value in [
            json!({}),
            json!({ "candidates": [] }),
            json!({ "candidates": [ {} ] }),
            json!({ "candidates": [ { "content": {} } ] }),
            json!({ "candidates": [ { "content": { "parts": [] } } ] }),
            json!({ "candidates": [ { "content": { "parts": [ {} ] } } ] }),
        ] {
            let parsed: GenerateResponse = serde_json::from_value(value).unwrap();
            assert!(extract_text(parsed).is_none());
        }
    }

    #[test]
    fn error_payload_shape_is_not_a_summary() {
        let parsed: GenerateResponse = serde_json::from_value(json!({
            "error": { "code": 429, "message": "quota exceeded" }
        }))
        .unwrap();
        assert!(extract_text(parsed).is_none());
    }

    #[test]
    fn prompt_embeds_query_and_context() {
        let prompt = build_prompt("what is a femur", "=== EXCERPT 1 ===\nbones");
        assert!(prompt.contains("\"what is a femur\""));
        assert!(prompt.contains("=== EXCERPT 1 ===\nbones"));
        assert!(prompt.contains("raw HTML only"));
    }
}
