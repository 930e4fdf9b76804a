//! Wire types for the responses-style API.
//!
//! The response `output` is a heterogeneous list of message and
//! code-execution items; messages carry content blocks with optional
//! annotations. Unknown item and annotation kinds deserialize into
//! catch-all variants so new server-side types never break parsing.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Strict response-format wrapper: `{type:"json_schema", name, schema, strict:true}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonSchemaFormat {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub schema: Value,
    pub strict: bool,
}

impl JsonSchemaFormat {
    pub fn new(name: impl Into<String>, schema: Value) -> Self {
        Self {
            kind: "json_schema".to_string(),
            name: name.into(),
            schema,
            strict: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextFormat {
    pub format: JsonSchemaFormat,
}

/// Request body for `POST /responses`.
#[derive(Debug, Clone, Serialize)]
pub struct ResponsesRequest {
    pub model: String,
    pub input: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<TextFormat>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Value>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ReasoningOptions>,
}

impl ResponsesRequest {
    pub fn new(model: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            input: input.into(),
            text: None,
            tools: Vec::new(),
            stream: false,
            temperature: None,
            max_output_tokens: None,
            top_p: None,
            frequency_penalty: None,
            presence_penalty: None,
            reasoning: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningOptions {
    pub effort: String,
}

/// Response body of `POST /responses`.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub output: Vec<OutputItem>,
    #[serde(default)]
    pub output_text: Option<String>,
}

impl ApiResponse {
    /// Concatenated text of all message content blocks; falls back to the
    /// server-provided `output_text` convenience field.
    pub fn assistant_text(&self) -> String {
        let mut parts = Vec::new();
        for item in &self.output {
            if let OutputItem::Message { content, .. } = item {
                for block in content {
                    if let Some(text) = &block.text {
                        parts.push(text.as_str());
                    }
                }
            }
        }
        if parts.is_empty() {
            self.output_text.clone().unwrap_or_default()
        } else {
            parts.join("\n")
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum OutputItem {
    #[serde(rename = "message")]
    Message {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        content: Vec<ContentBlock>,
    },
    #[serde(rename = "code_interpreter_call")]
    CodeInterpreterCall {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        outputs: Vec<ToolCallOutput>,
    },
    #[serde(untagged)]
    Other(Value),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentBlock {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum Annotation {
    #[serde(rename = "container_file_citation")]
    ContainerFileCitation {
        file_id: String,
        #[serde(default)]
        container_id: Option<String>,
        #[serde(default)]
        filename: Option<String>,
    },
    #[serde(untagged)]
    Other(Value),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallOutput {
    #[serde(rename = "type")]
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub file_id: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
}

/// `POST /files` response.
#[derive(Debug, Clone, Deserialize)]
pub struct FileObject {
    pub id: String,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub bytes: Option<u64>,
}

/// Vector store lifecycle states; the wire uses `completed` for ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorStoreStatus {
    Creating,
    #[serde(alias = "indexing")]
    InProgress,
    Completed,
    Failed,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VectorStoreObject {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub status: VectorStoreStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_message_with_container_citation() {
        let raw = json!({
            "id": "resp_1",
            "output": [
                {
                    "type": "message",
                    "id": "msg_1",
                    "content": [
                        {
                            "text": "done",
                            "annotations": [
                                {
                                    "type": "container_file_citation",
                                    "file_id": "cfile_abc",
                                    "container_id": "cont_1",
                                    "filename": "plot.png"
                                }
                            ]
                        }
                    ]
                },
                {"type": "code_interpreter_call", "id": "cic_1", "outputs": [
                    {"type": "file", "file_id": "file_xyz", "filename": "out.csv"}
                ]},
                {"type": "some_future_item", "data": 42}
            ],
            "output_text": "done"
        });

        let response: ApiResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(response.output.len(), 3);
        assert_eq!(response.assistant_text(), "done");
        match &response.output[0] {
            OutputItem::Message { content, .. } => match &content[0].annotations[0] {
                Annotation::ContainerFileCitation { file_id, .. } => {
                    assert_eq!(file_id, "cfile_abc");
                }
                other => panic!("unexpected annotation {other:?}"),
            },
            other => panic!("unexpected item {other:?}"),
        }
        assert!(matches!(&response.output[2], OutputItem::Other(_)));
    }

    #[test]
    fn request_omits_empty_fields() {
        let request = ResponsesRequest::new("gpt-4o", "hello");
        let value = serde_json::to_value(&request).unwrap();
        let object = value.as_object().unwrap();
        assert!(!object.contains_key("text"));
        assert!(!object.contains_key("tools"));
        assert!(!object.contains_key("temperature"));
        assert_eq!(object["stream"], json!(false));
    }

    #[test]
    fn vector_store_status_aliases() {
        let store: VectorStoreObject =
            serde_json::from_value(json!({"id": "vs_1", "status": "in_progress"})).unwrap();
        assert_eq!(store.status, VectorStoreStatus::InProgress);
        let store: VectorStoreObject =
            serde_json::from_value(json!({"id": "vs_1", "status": "completed"})).unwrap();
        assert_eq!(store.status, VectorStoreStatus::Completed);
        let store: VectorStoreObject =
            serde_json::from_value(json!({"id": "vs_1", "status": "glorping"})).unwrap();
        assert_eq!(store.status, VectorStoreStatus::Unknown);
    }
}
