//! OpenAI-compatible chat-completions provider.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::thread;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{AnalysisProvider, Availability};
use crate::analysis::AnalysisResult;
use crate::capture::{panic_message, truncate};
use crate::config::AiConfig;

const TEMPERATURE: f32 = 0.3;

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
  role: &'static str,
  content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
  model: &'a str,
  messages: Vec<ChatMessage<'a>>,
  temperature: f32,
  response_format: Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
  #[serde(default)]
  choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
  message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
  content: Option<String>,
}

/// Strict JSON schema matching [`AnalysisResult`].
fn response_format() -> Value {
  json!({
    "type": "json_schema",
    "json_schema": {
      "name": "analysis_result",
      "strict": true,
      "schema": {
        "type": "object",
        "properties": {
          "explanation": { "type": "string" },
          "suggested_fix": { "type": "string" }
        },
        "required": ["explanation", "suggested_fix"],
        "additionalProperties": false
      }
    }
  })
}

/// Talks to `{base_url}/chat/completions` with a bearer token.
///
/// Each call runs on its own scoped thread with a current-thread tokio
/// runtime, so it can be used from synchronous code, from inside another
/// runtime, and from a panic hook alike.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
  endpoint: Url,
  model: String,
  api_key: Option<String>,
  enabled: bool,
  timeout: Duration,
}

impl OpenAiProvider {
  pub fn new(config: &AiConfig) -> Result<Self> {
    let mut base = config.base_url.trim().to_string();
    if !base.ends_with('/') {
      base.push('/');
    }
    let endpoint = Url::parse(&base)
      .and_then(|base| base.join("chat/completions"))
      .map_err(|e| eyre!("Invalid analysis base URL {}: {}", config.base_url, e))?;

    Ok(Self {
      endpoint,
      model: config.model.clone(),
      api_key: config.api_key.clone(),
      enabled: config.enabled,
      timeout: config.timeout(),
    })
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
    self.api_key = Some(api_key.into());
    self
  }

  pub fn endpoint(&self) -> &Url {
    &self.endpoint
  }

  async fn send(&self, api_key: &str, request: &ChatRequest<'_>) -> Result<AnalysisResult> {
    let client = reqwest::Client::builder()
      .connect_timeout(self.timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    let call = async {
      let response = client
        .post(self.endpoint.clone())
        .bearer_auth(api_key)
        .json(request)
        .send()
        .await
        .map_err(|e| eyre!("Failed to reach analysis provider: {}", e))?;

      let status = response.status();
      if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(eyre!(
          "Analysis provider returned HTTP {}: {}",
          status.as_u16(),
          truncate(body.trim(), 200)
        ));
      }

      let completion: ChatResponse = response
        .json()
        .await
        .map_err(|e| eyre!("Failed to decode analysis response: {}", e))?;

      parse_completion(completion)
    };

    tokio::time::timeout(self.timeout, call)
      .await
      .map_err(|_| {
        eyre!(
          "Analysis request timed out after {:.1}s",
          self.timeout.as_secs_f64()
        )
      })?
  }
}

fn parse_completion(completion: ChatResponse) -> Result<AnalysisResult> {
  let content = completion
    .choices
    .into_iter()
    .next()
    .ok_or_else(|| eyre!("Analysis response contained no choices"))?
    .message
    .content
    .ok_or_else(|| eyre!("Analysis response had no content"))?;

  serde_json::from_str(&content)
    .map_err(|e| eyre!("Analysis response did not match the expected schema: {}", e))
}

impl AnalysisProvider for OpenAiProvider {
  fn get_analysis(&self, system_prompt: &str, user_prompt: &str) -> Result<AnalysisResult> {
    let api_key = match (self.availability(), self.api_key.as_deref()) {
      (Availability::Ready, Some(key)) => key,
      (availability, _) => {
        return Err(eyre!(
          "{}",
          availability.reason().unwrap_or("AI analysis is unavailable")
        ))
      }
    };

    let request = ChatRequest {
      model: &self.model,
      messages: vec![
        ChatMessage {
          role: "system",
          content: system_prompt,
        },
        ChatMessage {
          role: "user",
          content: user_prompt,
        },
      ],
      temperature: TEMPERATURE,
      response_format: response_format(),
    };

    debug!(endpoint = %self.endpoint, model = %self.model, "requesting analysis");

    thread::scope(|scope| {
      let worker = scope.spawn(|| {
        let runtime = tokio::runtime::Builder::new_current_thread()
          .enable_all()
          .build()
          .map_err(|e| eyre!("Failed to start async runtime: {}", e))?;
        runtime.block_on(self.send(api_key, &request))
      });

      worker
        .join()
        .map_err(|payload| eyre!("Analysis request panicked: {}", panic_message(payload.as_ref())))?
    })
  }

  fn availability(&self) -> Availability {
    if !self.enabled {
      Availability::Disabled
    } else if self.api_key.is_none() {
      Availability::MissingCredential
    } else {
      Availability::Ready
    }
  }
}
