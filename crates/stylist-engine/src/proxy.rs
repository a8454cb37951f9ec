use std::fmt;
use std::time::Duration;

use anyhow::Context;
use reqwest::blocking::Client as HttpClient;
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::RemoteCallError;
use crate::prompts::STYLE_REFERENCE_INSTRUCTION;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetApi {
    Image,
    Text,
}

impl TargetApi {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Text => "text",
        }
    }
}

impl fmt::Display for TargetApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize)]
struct ProxyEnvelope<'a> {
    target_api: TargetApi,
    payload: &'a Value,
}

/// Base64 image plus its declared MIME type, as sent inline to the model.
#[derive(Debug, Clone, Copy)]
pub struct InlineImage<'a> {
    pub data: &'a str,
    pub mime_type: &'a str,
}

/// The boundary to the same-origin proxy. Implementations return the
/// upstream provider JSON untouched on success.
pub trait ProxyTransport: Send + Sync {
    fn call(&self, target: TargetApi, payload: &Value) -> Result<Value, RemoteCallError>;
}

pub struct HttpProxyClient {
    endpoint: String,
    http: HttpClient,
}

impl HttpProxyClient {
    /// `timeout` of `None` waits indefinitely.
    pub fn new(endpoint: impl Into<String>, timeout: Option<Duration>) -> anyhow::Result<Self> {
        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .context("failed to build proxy HTTP client")?;
        Ok(Self {
            endpoint: endpoint.into(),
            http,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl ProxyTransport for HttpProxyClient {
    fn call(&self, target: TargetApi, payload: &Value) -> Result<Value, RemoteCallError> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(&ProxyEnvelope {
                target_api: target,
                payload,
            })
            .send()
            .map_err(|err| {
                RemoteCallError::Transport(format!(
                    "proxy request failed ({}): {err}",
                    self.endpoint
                ))
            })?;
        let status = response.status().as_u16();
        let body = response.text().map_err(|err| {
            RemoteCallError::Transport(format!("proxy response body read failed: {err}"))
        })?;
        parse_proxy_response(status, &body)
    }
}

/// 2xx bodies must be JSON. Anything else surfaces the embedded
/// `error.message`, or a status-derived message when there is none.
pub fn parse_proxy_response(status: u16, body: &str) -> Result<Value, RemoteCallError> {
    if (200..300).contains(&status) {
        return serde_json::from_str(body)
            .map_err(|err| RemoteCallError::InvalidJson(err.to_string()));
    }
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|payload| {
            payload
                .pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| format!("HTTP error! status: {status}"));
    Err(RemoteCallError::Status { status, message })
}

fn inline_part(image: InlineImage<'_>) -> Value {
    json!({
        "inlineData": {
            "mimeType": image.mime_type,
            "data": image.data,
        }
    })
}

pub fn image_request_payload(
    prompt: &str,
    subject: InlineImage<'_>,
    style: Option<InlineImage<'_>>,
) -> Value {
    let mut parts = vec![json!({ "text": prompt }), inline_part(subject)];
    if let Some(style) = style {
        parts.push(json!({ "text": STYLE_REFERENCE_INSTRUCTION }));
        parts.push(inline_part(style));
    }
    json!({
        "contents": [{
            "role": "user",
            "parts": parts,
        }],
        "generationConfig": {
            "responseModalities": ["IMAGE"],
        },
    })
}

pub fn text_request_payload(system_prompt: &str, user_prompt: &str, photo: InlineImage<'_>) -> Value {
    json!({
        "systemInstruction": {
            "parts": [{ "text": system_prompt }],
        },
        "contents": [{
            "role": "user",
            "parts": [{ "text": user_prompt }, inline_part(photo)],
        }],
    })
}

fn first_candidate_parts(response: &Value) -> &[Value] {
    response
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Base64 payload of the first inline image in the first candidate.
///
/// Every part of that candidate is scanned, not only `parts[0]`, so a reply
/// that leads with a text part before its image still counts as an image.
/// Later candidates are never consulted.
pub fn extract_image_data(response: &Value) -> Result<String, RemoteCallError> {
    first_candidate_parts(response)
        .iter()
        .find_map(|part| {
            part.get("inlineData")
                .or_else(|| part.get("inline_data"))
                .and_then(|inline| inline.get("data"))
                .and_then(Value::as_str)
                .filter(|data| !data.is_empty())
                .map(str::to_string)
        })
        .ok_or(RemoteCallError::NoImageReturned)
}

pub fn extract_text(response: &Value) -> Result<String, RemoteCallError> {
    first_candidate_parts(response)
        .iter()
        .find_map(|part| {
            part.get("text")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|text| !text.is_empty())
                .map(str::to_string)
        })
        .ok_or(RemoteCallError::NoAnalysisReturned)
}
