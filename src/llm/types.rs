//! Chat types with tool calling support
//!
//! Messages serialize in the OpenAI chat-completions wire shape so the same
//! history can be sent to any compatible server.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Author of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A message in a chat conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    /// `None` for assistant messages that only carry tool calls
    #[serde(default)]
    pub content: Option<String>,
    /// Tool invocations requested by the assistant (assistant only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// The tool call this message answers (tool only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Assistant turn that may carry tool calls and no text
    pub fn assistant_with_tools(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content,
            tool_calls,
            tool_call_id: None,
        }
    }

    /// Result of the tool call identified by `tool_call_id`
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    /// Text content, or an empty string when the message has none
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

/// A tool call from the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_type")]
    pub call_type: String, // Always "function"
    pub function: FunctionCall,
}

fn function_type() -> String {
    "function".to_string()
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            call_type: function_type(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }

    /// Parse the raw argument string as a JSON object
    ///
    /// An empty (or whitespace-only) argument string is an empty object.
    pub fn parse_arguments(&self) -> Result<Map<String, Value>, serde_json::Error> {
        let raw = self.function.arguments.trim();
        if raw.is_empty() {
            return Ok(Map::new());
        }
        serde_json::from_str(raw)
    }
}

/// Function call details
///
/// `arguments` is kept as the raw string the model produced; it is only
/// parsed right before dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

/// Tool definition for the model
#[derive(Debug, Clone, Serialize)]
pub struct Tool {
    #[serde(rename = "type")]
    pub tool_type: String, // Always "function"
    pub function: ToolFunction,
}

/// Function definition for a tool
#[derive(Debug, Clone, Serialize)]
pub struct ToolFunction {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value, // JSON Schema
}

impl Tool {
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            tool_type: "function".to_string(),
            function: ToolFunction {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assistant_tool_only_message_serializes_null_content() {
        let msg = ChatMessage::assistant_with_tools(
            None,
            vec![ToolCall::new("call_1", "shell_command", r#"{"command":"ls"}"#)],
        );
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["role"], "assistant");
        assert!(json["content"].is_null());
        assert_eq!(json["tool_calls"][0]["id"], "call_1");
        assert_eq!(json["tool_calls"][0]["type"], "function");
        assert_eq!(json["tool_calls"][0]["function"]["arguments"], r#"{"command":"ls"}"#);
        assert!(json.get("tool_call_id").is_none());
    }

    #[test]
    fn test_tool_message_carries_back_reference() {
        let msg = ChatMessage::tool("call_9", "ok");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"role\":\"tool\""));
        assert!(json.contains("\"tool_call_id\":\"call_9\""));
        assert!(!json.contains("tool_calls"));
    }

    #[test]
    fn test_parse_arguments() {
        let empty = ToolCall::new("a", "terminate", "  ");
        assert!(empty.parse_arguments().unwrap().is_empty());

        let call = ToolCall::new("b", "terminate", r#"{"reason":"done"}"#);
        assert_eq!(call.parse_arguments().unwrap()["reason"], "done");

        let broken = ToolCall::new("c", "terminate", r#"{"reason":"#);
        assert!(broken.parse_arguments().is_err());

        let not_object = ToolCall::new("d", "terminate", "[1,2]");
        assert!(not_object.parse_arguments().is_err());
    }

    #[test]
    fn test_message_round_trips_from_wire() {
        let wire = r#"{"role":"assistant","content":null,"tool_calls":[{"id":"x","type":"function","function":{"name":"terminate","arguments":"{}"}}]}"#;
        let msg: ChatMessage = serde_json::from_str(wire).unwrap();
        assert_eq!(msg.role, Role::Assistant);
        assert!(msg.content.is_none());
        assert_eq!(msg.tool_calls[0].name(), "terminate");
    }
}
