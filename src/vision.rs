//! Vision model adapter: forwards a screenshot to the multimodal
//! endpoint and extracts coordinate arrays from its textual reply.
//!
//! Coordinates come back in the model's normalized 0–1000 space as
//! `[ymin, xmin, ymax, xmax]`; pixel conversion happens in the overlay
//! renderer.

use crate::config::Config;
use crate::error::ServerError;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::OnceLock;
use std::time::Duration;

/// Default detection prompt, matching what the model was tuned against.
const DEFAULT_PROMPT: &str = "Return bounding boxes as JSON arrays [ymin, xmin, ymax, xmax] \
     for all icons, svgs, clickable elements, buttons, etc";

/// A parsed detection response.
#[derive(Debug, Clone)]
pub struct Detection {
    pub raw_text: String,
    pub boxes: Vec<[i64; 4]>,
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
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

pub struct VisionClient {
    client: Client,
    base_url: String,
    model: String,
}

impl VisionClient {
    pub fn new(cfg: &Config) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            base_url: cfg.vision_base_url.trim_end_matches('/').to_string(),
            model: cfg.vision_model.clone(),
        }
    }

    /// Send a base64 PNG (bare or data-URL-wrapped) to the model and
    /// extract every coordinate array from the reply. Transient overload
    /// is retried once.
    pub async fn detect(
        &self,
        screenshot_b64: &str,
        api_key: &str,
        prompt: Option<&str>,
    ) -> Result<Detection, ServerError> {
        let image_data = strip_data_url(screenshot_b64);
        let prompt = prompt.unwrap_or(DEFAULT_PROMPT);

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.request(image_data, api_key, prompt).await {
                Err(ServerError::VisionOverloaded(msg)) if attempt == 1 => {
                    tracing::warn!(error = %msg, "Vision model overloaded, retrying once");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                other => return other,
            }
        }
    }

    async fn request(
        &self,
        image_data: &str,
        api_key: &str,
        prompt: &str,
    ) -> Result<Detection, ServerError> {
        let url = format!(
            "{}/{}:generateContent?key={}",
            self.base_url, self.model, api_key
        );
        let payload = json!({
            "contents": [{
                "parts": [
                    { "text": prompt },
                    { "inline_data": { "mime_type": "image/png", "data": image_data } }
                ]
            }]
        });

        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ServerError::BackendError(format!("vision request failed: {e}")))?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| ServerError::BackendError(format!("vision response unreadable: {e}")))?;

        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(ServerError::VisionAuth(api_message(&body)));
        }
        if status.as_u16() == 503 {
            return Err(ServerError::VisionOverloaded(api_message(&body)));
        }

        let parsed: GenerateResponse = serde_json::from_value(body)
            .map_err(|e| ServerError::BackendError(format!("vision response malformed: {e}")))?;

        if let Some(error) = parsed.error {
            let message = error.message;
            if error.code == 503 || message.contains("overloaded") {
                return Err(ServerError::VisionOverloaded(message));
            }
            if error.code == 401 || error.code == 403 {
                return Err(ServerError::VisionAuth(message));
            }
            return Err(ServerError::BackendError(format!(
                "vision model error ({}): {message}",
                error.code
            )));
        }

        let raw_text = parsed
            .candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .map(|p| p.text.clone())
            .ok_or(ServerError::VisionMalformed)?;

        let boxes = extract_coordinates(&raw_text);
        if boxes.is_empty() {
            return Err(ServerError::VisionMalformed);
        }

        Ok(Detection { raw_text, boxes })
    }
}

fn api_message(body: &Value) -> String {
    body.get("error")
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .unwrap_or("no detail")
        .to_string()
}

/// Strip an optional `data:image/...;base64,` prefix.
fn strip_data_url(screenshot: &str) -> &str {
    if screenshot.starts_with("data:image") {
        screenshot
            .split_once(',')
            .map(|(_, data)| data)
            .unwrap_or(screenshot)
    } else {
        screenshot
    }
}

/// Pull every `[a, b, c, d]` integer array out of free-form model text.
pub fn extract_coordinates(text: &str) -> Vec<[i64; 4]> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"\[\s*(\d+)\s*,\s*(\d+)\s*,\s*(\d+)\s*,\s*(\d+)\s*\]").expect("static regex")
    });
    re.captures_iter(text)
        .filter_map(|caps| {
            let mut coords = [0i64; 4];
            for (slot, group) in coords.iter_mut().zip(1..=4) {
                *slot = caps.get(group)?.as_str().parse().ok()?;
            }
            Some(coords)
        })
        .collect()
}
