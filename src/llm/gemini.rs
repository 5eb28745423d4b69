use std::path::Path;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use base64::prelude::*;
use futures::{StreamExt, TryStreamExt};
use log::debug;
use reqwest::Client;
use serde_json::{json, Value};

use super::{FragmentStream, ModelClient, PromptPart, PromptTurn};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Gemini client speaking the REST streaming API directly over reqwest,
/// parsing the `data:` lines of the SSE body.
#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: String, model: String) -> Self {
        GeminiClient {
            client: Client::new(),
            api_key,
            model,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    fn encode_turn(turn: &PromptTurn) -> Value {
        let parts: Vec<Value> = turn
            .parts
            .iter()
            .map(|part| match part {
                PromptPart::Text(text) => json!({ "text": text }),
                PromptPart::InlineData { mime_type, data } => json!({
                    "inline_data": {
                        "mime_type": mime_type,
                        "data": BASE64_STANDARD.encode(data),
                    }
                }),
                PromptPart::RemoteRef { file_id, mime_type } => json!({
                    "file_data": {
                        "file_uri": file_id,
                        "mime_type": mime_type,
                    }
                }),
            })
            .collect();
        json!({ "role": turn.role.as_str(), "parts": parts })
    }
}

/// Pulls the complete lines out of the carry-over buffer and parses them,
/// leaving a trailing partial line for the next body chunk. Chunk
/// boundaries do not align with SSE line boundaries.
fn drain_fragments(buffer: &mut String) -> Vec<String> {
    let Some(last_newline) = buffer.rfind('\n') else {
        return Vec::new();
    };
    let complete: String = buffer.drain(..=last_newline).collect();
    extract_fragments(&complete)
}

/// Pulls the candidate text out of complete SSE lines; input may carry
/// several `data:` lines.
fn extract_fragments(chunk: &str) -> Vec<String> {
    let mut fragments = Vec::new();
    for line in chunk.lines() {
        let line = line.trim();
        let Some(json_str) = line.strip_prefix("data: ") else {
            continue;
        };
        let Ok(parsed) = serde_json::from_str::<Value>(json_str) else {
            debug!("skipping unparseable stream line: {json_str}");
            continue;
        };
        if let Some(parts) = parsed["candidates"][0]["content"]["parts"].as_array() {
            for part in parts {
                if let Some(text) = part["text"].as_str() {
                    if !text.is_empty() {
                        fragments.push(text.to_string());
                    }
                }
            }
        }
    }
    fragments
}

#[async_trait]
impl ModelClient for GeminiClient {
    async fn stream_generate(
        &self,
        turns: Vec<PromptTurn>,
        system_instruction: &str,
    ) -> Result<FragmentStream> {
        let contents: Vec<Value> = turns.iter().map(Self::encode_turn).collect();
        let url = format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse&key={}",
            self.base_url, self.model, self.api_key
        );

        let response = self
            .client
            .post(&url)
            .json(&json!({
                "contents": contents,
                "systemInstruction": { "parts": [{ "text": system_instruction }] },
                "generationConfig": { "temperature": 0.7 },
            }))
            .send()
            .await
            .map_err(|e| anyhow!("failed to reach model endpoint: {e}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("model call failed with {status}: {body}"));
        }

        let stream = response
            .bytes_stream()
            .map_err(anyhow::Error::from)
            .scan(String::new(), |buffer, item| {
                let out: Vec<Result<String>> = match item {
                    Ok(bytes) => {
                        buffer.push_str(&String::from_utf8_lossy(&bytes));
                        drain_fragments(buffer).into_iter().map(Ok).collect()
                    }
                    Err(e) => vec![Err(e)],
                };
                futures::future::ready(Some(futures::stream::iter(out)))
            })
            .flatten()
            .boxed();

        Ok(stream)
    }

    async fn upload_file(
        &self,
        path: &Path,
        display_name: &str,
        mime_type: &str,
    ) -> Result<String> {
        let data = tokio::fs::read(path).await?;
        let url = format!("{}/upload/v1beta/files?key={}", self.base_url, self.api_key);

        let response = self
            .client
            .post(&url)
            .header("X-Goog-Upload-Protocol", "raw")
            .header("X-Goog-File-Name", display_name)
            .header("Content-Type", mime_type)
            .body(data)
            .send()
            .await
            .map_err(|e| anyhow!("file upload failed: {e}"))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(anyhow!("file upload failed with {status}"));
        }

        let body: Value = response.json().await?;
        body["file"]["uri"]
            .as_str()
            .or_else(|| body["file"]["name"].as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("upload response carried no file reference"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::TurnRole;

    #[test]
    fn extracts_text_fragments_from_sse_chunk() {
        let chunk = concat!(
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"He\"}]}}]}\n\n",
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"llo\"}]}}]}\n\n",
        );
        assert_eq!(extract_fragments(chunk), vec!["He", "llo"]);
    }

    #[test]
    fn data_line_split_across_body_chunks_is_reassembled() {
        let mut buffer = String::new();

        buffer.push_str("data: {\"candidates\":[{\"content\":{\"parts\":[{\"te");
        assert!(drain_fragments(&mut buffer).is_empty());

        buffer.push_str("xt\":\"Hello\"}]}}]}\n\n");
        assert_eq!(drain_fragments(&mut buffer), vec!["Hello"]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn complete_line_is_parsed_while_the_partial_tail_is_kept() {
        let mut buffer = String::from(concat!(
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"He\"}]}}]}\n",
            "data: {\"cand",
        ));
        assert_eq!(drain_fragments(&mut buffer), vec!["He"]);
        assert_eq!(buffer, "data: {\"cand");
    }

    #[test]
    fn ignores_blank_lines_and_empty_parts() {
        let chunk = concat!(
            "\n",
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"\"}]}}]}\n\n",
            ": comment\n",
            "data: not-json\n\n",
        );
        assert!(extract_fragments(chunk).is_empty());
    }

    #[test]
    fn turn_encoding_covers_all_part_kinds() {
        let turn = PromptTurn {
            role: TurnRole::User,
            parts: vec![
                PromptPart::Text("hi".into()),
                PromptPart::InlineData {
                    mime_type: "image/png".into(),
                    data: vec![1, 2, 3],
                },
                PromptPart::RemoteRef {
                    file_id: "files/abc".into(),
                    mime_type: "application/pdf".into(),
                },
            ],
        };
        let encoded = GeminiClient::encode_turn(&turn);
        assert_eq!(encoded["role"], "user");
        assert_eq!(encoded["parts"][0]["text"], "hi");
        assert_eq!(encoded["parts"][1]["inline_data"]["mime_type"], "image/png");
        assert_eq!(encoded["parts"][2]["file_data"]["file_uri"], "files/abc");
    }
}
