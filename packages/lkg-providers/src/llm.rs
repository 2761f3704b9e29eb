//! Chat-completions client that asks for a strict JSON-schema response.

use std::time::Duration;

use reqwest::Client;
use serde_json::Value;

use crate::{Error, Result};

const MAX_PARSE_ATTEMPTS: usize = 3;

/// Sends `system` and `user` messages and decodes the JSON object the model returns.
///
/// Responses whose content is not a JSON object are re-requested a bounded number of times;
/// transport and HTTP errors are returned immediately.
pub async fn generate_json(
	cfg: &lkg_config::LlmProviderConfig,
	system: &str,
	user: &str,
	schema_name: &str,
	schema: &Value,
) -> Result<Value> {
	let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let url = format!("{}{}", cfg.api_base, cfg.path);
	let body = request_body(cfg, system, user, schema_name, schema);

	for _ in 0..MAX_PARSE_ATTEMPTS {
		let res = client
			.post(&url)
			.headers(crate::auth_headers(&cfg.api_key, &cfg.default_headers)?)
			.json(&body)
			.send()
			.await?;
		let json: Value = res.error_for_status()?.json().await?;

		if let Ok(parsed) = parse_json_content(json) {
			return Ok(parsed);
		}
	}

	Err(Error::InvalidResponse {
		message: format!("LLM response for {schema_name} is not a valid JSON object."),
	})
}

fn request_body(
	cfg: &lkg_config::LlmProviderConfig,
	system: &str,
	user: &str,
	schema_name: &str,
	schema: &Value,
) -> Value {
	serde_json::json!({
		"model": cfg.model,
		"temperature": cfg.temperature,
		"messages": [
			{ "role": "system", "content": system },
			{ "role": "user", "content": user },
		],
		"response_format": {
			"type": "json_schema",
			"json_schema": { "name": schema_name, "schema": schema, "strict": true },
		},
	})
}

fn parse_json_content(json: Value) -> Result<Value> {
	let content = json
		.get("choices")
		.and_then(|v| v.as_array())
		.and_then(|arr| arr.first())
		.and_then(|choice| choice.get("message"))
		.and_then(|msg| msg.get("content"))
		.and_then(|c| c.as_str())
		.ok_or_else(|| Error::InvalidResponse {
			message: "LLM response is missing message content.".to_string(),
		})?;
	let parsed: Value = serde_json::from_str(strip_code_fence(content))?;

	if !parsed.is_object() {
		return Err(Error::InvalidResponse {
			message: "LLM content must be a JSON object.".to_string(),
		});
	}

	Ok(parsed)
}

fn strip_code_fence(content: &str) -> &str {
	let trimmed = content.trim();
	let Some(inner) = trimmed.strip_prefix("```") else {
		return trimmed;
	};
	let inner = inner.strip_prefix("json").unwrap_or(inner);

	inner.strip_suffix("```").unwrap_or(inner).trim()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_choice_content_json() {
		let json = serde_json::json!({
			"choices": [
				{ "message": { "content": "{\"items\": []}" } }
			]
		});
		let parsed = parse_json_content(json).expect("parse failed");

		assert!(parsed.get("items").is_some());
	}

	#[test]
	fn accepts_fenced_content() {
		let json = serde_json::json!({
			"choices": [ { "message": { "content": "```json\n{\"ok\": true}\n```" } } ]
		});

		assert_eq!(parse_json_content(json).expect("parse failed"), serde_json::json!({ "ok": true }));
	}

	#[test]
	fn rejects_non_object_content() {
		let json = serde_json::json!({ "choices": [ { "message": { "content": "[1, 2]" } } ] });

		assert!(parse_json_content(json).is_err());
	}

	#[test]
	fn request_carries_strict_schema() {
		let cfg = lkg_config::LlmProviderConfig {
			provider_id: "p".to_string(),
			api_base: "http://localhost".to_string(),
			api_key: "key".to_string(),
			path: "/chat/completions".to_string(),
			model: "m".to_string(),
			temperature: 0.0,
			timeout_ms: 1_000,
			default_headers: serde_json::Map::new(),
		};
		let body = request_body(&cfg, "sys", "usr", "pair_score", &serde_json::json!({ "type": "object" }));

		assert_eq!(body["response_format"]["json_schema"]["name"], "pair_score");
		assert_eq!(body["response_format"]["json_schema"]["strict"], true);
		assert_eq!(body["messages"][1]["content"], "usr");
	}
}
