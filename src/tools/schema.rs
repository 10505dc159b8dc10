//! Tool definitions sent to the model

use serde_json::json;

use crate::llm::Tool;

pub const SHELL_COMMAND_TOOL: &str = "shell_command";
pub const FILE_OPERATION_TOOL: &str = "file_operation";
pub const CODE_EXECUTION_TOOL: &str = "code_execution";
pub const TERMINATE_TOOL: &str = "terminate";

/// Default system prompt for the sandbox agent
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are an autonomous assistant working inside a sandboxed Linux machine.

You have these tools:
- shell_command: run a shell command (optionally in a working directory)
- file_operation: read, write, create, delete or list files and directories
- code_execution: run a python, javascript or bash snippet
- terminate: finish the task

Guidelines:
- Relative paths resolve against your home directory
- Verify results with the tools instead of guessing
- If a command fails, read the error and fix the cause
- Paths ending with "/" passed to file_operation create are directories
- When the task is complete, call terminate with a short summary"#;

fn shell_command_tool() -> Tool {
    Tool::function(
        SHELL_COMMAND_TOOL,
        "Run a shell command in the sandbox and return its stdout, stderr and exit code.",
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to run"
                },
                "workingDirectory": {
                    "type": "string",
                    "description": "Directory to run the command in (defaults to the home directory)"
                }
            },
            "required": ["command"]
        }),
    )
}

fn file_operation_tool() -> Tool {
    Tool::function(
        FILE_OPERATION_TOOL,
        "Read, write, create, delete or list files and directories in the sandbox.",
        json!({
            "type": "object",
            "properties": {
                "type": {
                    "type": "string",
                    "enum": ["read", "write", "create", "delete", "list"],
                    "description": "The operation to perform"
                },
                "path": {
                    "type": "string",
                    "description": "Target path; a trailing / makes create produce a directory"
                },
                "content": {
                    "type": "string",
                    "description": "File content for write and create"
                },
                "recursive": {
                    "type": "boolean",
                    "description": "List subdirectories recursively"
                }
            },
            "required": ["type", "path"]
        }),
    )
}

fn code_execution_tool() -> Tool {
    Tool::function(
        CODE_EXECUTION_TOOL,
        "Execute a code snippet in the sandbox and return its output.",
        json!({
            "type": "object",
            "properties": {
                "language": {
                    "type": "string",
                    "enum": ["python", "javascript", "bash"],
                    "description": "The programming language to use"
                },
                "code": {
                    "type": "string",
                    "description": "The code to execute"
                },
                "timeout": {
                    "type": "number",
                    "description": "Timeout in seconds"
                }
            },
            "required": ["language", "code"]
        }),
    )
}

fn terminate_tool() -> Tool {
    Tool::function(
        TERMINATE_TOOL,
        "Finish the current task. Call this once the user's request is fully handled.",
        json!({
            "type": "object",
            "properties": {
                "reason": {
                    "type": "string",
                    "description": "Why the task is finished"
                },
                "summary": {
                    "type": "string",
                    "description": "Short summary of what was done, shown to the user"
                }
            },
            "required": ["reason"]
        }),
    )
}

/// The four tools exposed to the model, in a stable order
pub fn definitions() -> Vec<Tool> {
    vec![
        shell_command_tool(),
        file_operation_tool(),
        code_execution_tool(),
        terminate_tool(),
    ]
}
