use crate::error::{Error, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

// ===================================================================
// Agent kinds
// ===================================================================

/// The closed set of supported agents. Adding an agent means adding a
/// variant here plus its payload struct and transcript parser — never
/// threading new string checks through shared code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Claude,
    Codex,
    Gemini,
    Opencode,
    Copilot,
}

impl AgentKind {
    pub const ALL: [AgentKind; 5] = [
        AgentKind::Claude,
        AgentKind::Codex,
        AgentKind::Gemini,
        AgentKind::Opencode,
        AgentKind::Copilot,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Codex => "codex",
            Self::Gemini => "gemini",
            Self::Opencode => "opencode",
            Self::Copilot => "copilot",
        }
    }

    /// Whether this agent has a hook/plugin mechanism of its own.
    /// Hookless agents are only reachable through the post-commit trigger.
    pub fn has_hooks(self) -> bool {
        match self {
            Self::Claude | Self::Codex | Self::Opencode => true,
            Self::Gemini | Self::Copilot => false,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.as_str() == s)
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ===================================================================
// Canonical hook event
// ===================================================================

/// One tool invocation as reported by an agent's hook mechanism, normalized
/// from the agent's native payload shape. Immutable once constructed and
/// never persisted — consumed synchronously by the pipeline.
#[derive(Debug, Clone)]
pub struct HookEvent {
    pub agent: AgentKind,
    pub session_id: String,
    /// Before/after correlation ID where the agent provides one (opencode).
    pub call_id: Option<String>,
    pub tool_name: String,
    pub raw_command: String,
    pub working_dir: PathBuf,
    pub timestamp: Option<String>,
    /// Transcript location the payload itself named, if any. Saves the
    /// resolver a discovery pass for agents that report it directly.
    pub transcript_hint: Option<PathBuf>,
}

/// Detect whether a tool call is a git commit.
///
/// A plain substring check, intentionally conservative: a false negative
/// costs nothing (the post-commit trigger catches the commit anyway), while
/// matching loosely would attach conversations to the wrong HEAD.
pub fn is_commit_command(raw_command: &str) -> bool {
    raw_command.contains("git commit")
}

// ===================================================================
// Per-agent payload shapes
// ===================================================================

/// Claude Code hook payload (snake_case JSON on stdin).
#[derive(Debug, Deserialize)]
struct ClaudePayload {
    session_id: String,
    transcript_path: String,
    cwd: String,
    tool_name: String,
    #[serde(default)]
    tool_input: ClaudeToolInput,
    #[serde(default)]
    timestamp: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ClaudeToolInput {
    #[serde(default)]
    command: Option<String>,
}

/// Codex notify payload. Session ID arrives as `session_id` or `thread_id`
/// depending on the version; the command may be a string or an argv array.
#[derive(Debug, Deserialize)]
struct CodexPayload {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    thread_id: Option<String>,
    cwd: String,
    #[serde(default)]
    rollout_path: Option<String>,
    #[serde(default)]
    tool_name: Option<String>,
    #[serde(default)]
    command: Option<CodexCommand>,
    #[serde(default)]
    timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CodexCommand {
    Line(String),
    Argv(Vec<String>),
}

impl CodexCommand {
    fn joined(&self) -> String {
        match self {
            Self::Line(s) => s.clone(),
            Self::Argv(v) => v.join(" "),
        }
    }
}

/// opencode plugin payload (camelCase JSON, emitted by the
/// `tool.execute.before`/`tool.execute.after` hook pair).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpencodePayload {
    #[serde(rename = "sessionID")]
    session_id: String,
    #[serde(rename = "callID", default)]
    call_id: Option<String>,
    tool: String,
    directory: String,
    #[serde(default)]
    args: OpencodeArgs,
}

#[derive(Debug, Default, Deserialize)]
struct OpencodeArgs {
    #[serde(default)]
    command: Option<String>,
}

// ===================================================================
// Normalization
// ===================================================================

/// Translate a raw hook payload into a canonical [`HookEvent`].
///
/// Pure translation: no I/O beyond the payload string itself. Hookless
/// agents have no payload to translate and are rejected here — their events
/// are synthesized by the post-commit trigger via session discovery.
pub fn normalize(kind: AgentKind, raw_payload: &str) -> Result<HookEvent> {
    match kind {
        AgentKind::Claude => {
            let p: ClaudePayload = parse_payload(raw_payload)?;
            Ok(HookEvent {
                agent: kind,
                session_id: p.session_id,
                call_id: None,
                tool_name: p.tool_name,
                raw_command: p.tool_input.command.unwrap_or_default(),
                working_dir: PathBuf::from(p.cwd),
                timestamp: p.timestamp,
                transcript_hint: Some(PathBuf::from(p.transcript_path)),
            })
        }
        AgentKind::Codex => {
            let p: CodexPayload = parse_payload(raw_payload)?;
            let session_id = p
                .session_id
                .or(p.thread_id)
                .ok_or_else(|| missing_field(kind, "session_id or thread_id"))?;
            Ok(HookEvent {
                agent: kind,
                session_id,
                call_id: None,
                tool_name: p.tool_name.unwrap_or_else(|| "shell".into()),
                raw_command: p.command.map(|c| c.joined()).unwrap_or_default(),
                working_dir: PathBuf::from(p.cwd),
                timestamp: p.timestamp,
                transcript_hint: p.rollout_path.map(PathBuf::from),
            })
        }
        AgentKind::Opencode => {
            let p: OpencodePayload = parse_payload(raw_payload)?;
            Ok(HookEvent {
                agent: kind,
                session_id: p.session_id,
                call_id: p.call_id,
                tool_name: p.tool,
                raw_command: p.args.command.unwrap_or_default(),
                working_dir: PathBuf::from(p.directory),
                timestamp: None,
                transcript_hint: None,
            })
        }
        AgentKind::Gemini | AgentKind::Copilot => Err(Error::MalformedPayload(format!(
            "{kind} has no hook mechanism; its sessions are captured by the post-commit trigger"
        ))),
    }
}

fn parse_payload<'a, T: Deserialize<'a>>(raw: &'a str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| Error::MalformedPayload(e.to_string()))
}

fn missing_field(kind: AgentKind, field: &str) -> Error {
    Error::MalformedPayload(format!("{kind} payload is missing {field}"))
}
