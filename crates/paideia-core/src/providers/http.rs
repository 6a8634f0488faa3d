use std::time::Instant;

use async_trait::async_trait;
use serde_json::json;

use super::{GenerateOptions, JudgeClient, JudgeRequest, TurnContext, TutorClient};
use crate::errors::GenerateError;
use crate::model::{Generation, GenerationMeta, JudgeScores, Suggestion};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Tutor generation against any OpenAI-compatible chat endpoint. Throttling
/// is classified here, at the transport boundary, so the retry loop never
/// has to sniff error strings.
pub struct HttpTutorClient {
    pub base_url: String,
    pub api_key: String,
    pub client: reqwest::Client,
}

impl HttpTutorClient {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(DEFAULT_BASE_URL.to_string(), api_key)
    }

    pub fn with_base_url(base_url: String, api_key: String) -> Self {
        Self {
            base_url,
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl TutorClient for HttpTutorClient {
    async fn generate(
        &self,
        ctx: &TurnContext<'_>,
        opts: &GenerateOptions,
    ) -> Result<Generation, GenerateError> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut messages = Vec::new();
        if let Some(system) = opts.extra.get("system_prompt").and_then(|v| v.as_str()) {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.push(json!({
            "role": "user",
            "content": super::render_turn_prompt(ctx)
        }));

        let mut body = json!({
            "model": ctx.profile.model,
            "messages": messages,
        });
        if let Some(t) = opts.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(m) = opts.max_tokens {
            body["max_tokens"] = json!(m);
        }

        let started = Instant::now();
        let mut req = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(timeout) = opts.timeout {
            req = req.timeout(timeout);
        }

        let resp = req.send().await.map_err(classify_transport)?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, text));
        }

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| GenerateError::Fatal(format!("malformed provider response: {e}")))?;

        let text = json
            .pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| GenerateError::Fatal("provider response missing content".into()))?
            .to_string();

        Ok(Generation {
            suggestions: vec![Suggestion {
                title: None,
                message: text,
                reason: None,
            }],
            provider: self.provider_name().to_string(),
            model: ctx.profile.model.clone(),
            meta: GenerationMeta {
                latency_ms: Some(started.elapsed().as_millis() as u64),
                input_tokens: json
                    .pointer("/usage/prompt_tokens")
                    .and_then(|v| v.as_u64()),
                output_tokens: json
                    .pointer("/usage/completion_tokens")
                    .and_then(|v| v.as_u64()),
                dialogue_rounds: None,
                api_calls: Some(1),
                total_cost: None,
            },
            dialogue_trace: vec![],
        })
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }
}

/// Judge against the same endpoint shape. The judge is asked for a JSON
/// object of rubric ratings; a reply that does not parse is an error the
/// caller records as a failed judgment, never a guessed score.
pub struct HttpJudgeClient {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub client: reqwest::Client,
}

impl HttpJudgeClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key,
            model,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl JudgeClient for HttpJudgeClient {
    async fn score(&self, req: &JudgeRequest<'_>) -> anyhow::Result<JudgeScores> {
        let url = format!("{}/chat/completions", self.base_url);

        let transcript = req
            .generation
            .suggestions
            .iter()
            .map(|s| s.message.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Rate the tutor reply below on each rubric dimension from 1 to 5.\n\
             Respond with a single JSON object mapping dimension name to rating,\n\
             plus an optional \"summary\" string.\n\n\
             Scenario: {}\n\nTutor reply:\n{}",
            req.scenario.context, transcript
        );

        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": 0.0,
        });

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("judge API error ({}): {}", status.as_u16(), text);
        }

        let json: serde_json::Value = resp.json().await?;
        let content = json
            .pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("judge response missing content"))?;

        let parsed: serde_json::Value = serde_json::from_str(content.trim())
            .map_err(|e| anyhow::anyhow!("judge reply is not valid JSON: {e}"))?;
        let obj = parsed
            .as_object()
            .ok_or_else(|| anyhow::anyhow!("judge reply is not a JSON object"))?;

        let mut dimensions = std::collections::BTreeMap::new();
        let mut summary = None;
        for (k, v) in obj {
            if k == "summary" {
                summary = v.as_str().map(str::to_string);
                continue;
            }
            if let Some(n) = v.as_f64() {
                dimensions.insert(k.clone(), n);
            }
        }

        Ok(JudgeScores {
            dimensions,
            passes_required: None,
            passes_forbidden: None,
            summary,
            judge_model: self.model.clone(),
        })
    }

    fn judge_model(&self) -> String {
        self.model.clone()
    }
}

fn classify_transport(e: reqwest::Error) -> GenerateError {
    GenerateError::Transient(format!("transport error: {e}"))
}

fn classify_status(status: reqwest::StatusCode, body: String) -> GenerateError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        GenerateError::RateLimited(format!("429: {body}"))
    } else if status.is_server_error() {
        GenerateError::Transient(format!("{}: {body}", status.as_u16()))
    } else {
        GenerateError::Fatal(format!("{}: {body}", status.as_u16()))
    }
}
