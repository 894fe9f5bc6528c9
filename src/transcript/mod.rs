use crate::agent::{AgentKind, HookEvent};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

// ===================================================================
// Canonical transcript model
// ===================================================================

/// Who produced a message. Every agent's native roles map into this set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

/// A single canonical message. Timestamps are kept in the source's own
/// string form — they are display data here, not something we compute with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// A session's conversation, parsed from an agent-specific log into one
/// canonical shape. Chronological order is preserved; this is the unit
/// users read back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub session_id: String,
    pub agent: AgentKind,
    pub messages: Vec<Message>,
}

impl Transcript {
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }
}

/// Session-level metadata picked up while parsing a log: the model name and
/// token usage where the format reports them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogMeta {
    pub model: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Output of a single parser run: canonical messages, metadata, and the
/// number of lines/records that failed to parse (tolerated, logged).
#[derive(Debug, Default)]
pub struct ParsedLog {
    pub messages: Vec<Message>,
    pub meta: LogMeta,
    pub skipped: usize,
}

impl ParsedLog {
    fn push(&mut self, role: Role, text: impl Into<String>, timestamp: Option<String>) {
        let text = text.into();
        if text.trim().is_empty() {
            return;
        }
        self.messages.push(Message {
            role,
            text,
            timestamp,
        });
    }
}

// ===================================================================
// Claude Code JSONL
// ===================================================================

/// A typed subset of Claude Code's `.jsonl` transcript entries — just what
/// the canonical model needs. Other entry types (progress, snapshots,
/// queue operations) fall through to `Other`.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ClaudeEntry {
    #[serde(rename = "user")]
    User(ClaudeConversationEntry),
    #[serde(rename = "assistant")]
    Assistant(ClaudeConversationEntry),
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ClaudeConversationEntry {
    #[serde(default)]
    timestamp: Option<String>,
    message: ClaudeMessage,
}

#[derive(Debug, Deserialize)]
struct ClaudeMessage {
    content: ClaudeContent,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<ClaudeUsage>,
}

/// `message.content` is a plain string for user text, or an array of
/// content blocks for assistant responses and tool results.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ClaudeContent {
    Text(String),
    Blocks(Vec<ClaudeBlock>),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ClaudeBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "thinking")]
    Thinking {},
    #[serde(rename = "tool_use")]
    ToolUse {
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult { content: serde_json::Value },
}

#[derive(Debug, Deserialize)]
struct ClaudeUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

/// Parse a Claude Code JSONL transcript. Malformed lines are skipped, not
/// fatal — a partial transcript is better than none once the commit exists.
pub fn parse_claude_jsonl(contents: &str) -> ParsedLog {
    let mut log = ParsedLog::default();

    for (i, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let entry: ClaudeEntry = match serde_json::from_str(line) {
            Ok(e) => e,
            Err(e) => {
                warn!(line = i + 1, error = %e, "skipping malformed transcript line");
                log.skipped += 1;
                continue;
            }
        };

        match entry {
            ClaudeEntry::User(conv) => {
                let ts = conv.timestamp;
                match conv.message.content {
                    ClaudeContent::Text(t) => log.push(Role::User, t, ts),
                    ClaudeContent::Blocks(blocks) => {
                        for block in blocks {
                            match block {
                                ClaudeBlock::Text { text } => {
                                    log.push(Role::User, text, ts.clone());
                                }
                                ClaudeBlock::ToolResult { content } => {
                                    log.push(Role::Tool, flatten_result_text(&content), ts.clone());
                                }
                                _ => {}
                            }
                        }
                    }
                }
            }
            ClaudeEntry::Assistant(conv) => {
                let ts = conv.timestamp;
                if log.meta.model.is_none() {
                    log.meta.model = conv.message.model;
                }
                if let Some(usage) = &conv.message.usage {
                    log.meta.input_tokens += usage.input_tokens;
                    log.meta.output_tokens += usage.output_tokens;
                }
                if let ClaudeContent::Blocks(blocks) = conv.message.content {
                    let mut texts: Vec<String> = Vec::new();
                    for block in blocks {
                        match block {
                            ClaudeBlock::Text { text } => texts.push(text),
                            ClaudeBlock::ToolUse { name, input } => log.push(
                                Role::Tool,
                                format!("{name} {}", compact_json(&input)),
                                ts.clone(),
                            ),
                            _ => {}
                        }
                    }
                    if !texts.is_empty() {
                        log.push(Role::Assistant, texts.join("\n\n"), ts);
                    }
                }
            }
            ClaudeEntry::Other => {}
        }
    }

    log
}

// ===================================================================
// Codex rollout JSONL
// ===================================================================

#[derive(Debug, Deserialize)]
struct CodexLine {
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(rename = "type", default)]
    line_type: String,
    #[serde(default)]
    payload: serde_json::Value,
}

/// Parse a Codex rollout file: `{timestamp, type, payload}` lines where
/// `response_item` payloads carry the conversation, `turn_context` names the
/// model, and `event_msg`/`token_count` reports usage.
pub fn parse_codex_rollout(contents: &str) -> ParsedLog {
    let mut log = ParsedLog::default();

    for (i, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let entry: CodexLine = match serde_json::from_str(line) {
            Ok(e) => e,
            Err(e) => {
                warn!(line = i + 1, error = %e, "skipping malformed rollout line");
                log.skipped += 1;
                continue;
            }
        };

        match entry.line_type.as_str() {
            "turn_context" => {
                if let Some(model) = entry.payload.get("model").and_then(|v| v.as_str()) {
                    // Latest wins: sessions can switch models mid-thread.
                    log.meta.model = Some(model.to_string());
                }
            }
            "event_msg" => {
                if entry.payload.get("type").and_then(|v| v.as_str()) == Some("token_count") {
                    log.meta.input_tokens += entry
                        .payload
                        .get("input_tokens")
                        .and_then(|v| v.as_u64())
                        .unwrap_or(0);
                    log.meta.output_tokens += entry
                        .payload
                        .get("output_tokens")
                        .and_then(|v| v.as_u64())
                        .unwrap_or(0);
                }
            }
            "response_item" => {
                let payload = &entry.payload;
                match payload.get("type").and_then(|v| v.as_str()).unwrap_or("") {
                    "message" => {
                        let role = match payload.get("role").and_then(|v| v.as_str()) {
                            Some("user") => Role::User,
                            Some("assistant") => Role::Assistant,
                            _ => continue,
                        };
                        let mut parts: Vec<&str> = Vec::new();
                        if let Some(content) = payload.get("content").and_then(|v| v.as_array()) {
                            for item in content {
                                let kind = item.get("type").and_then(|v| v.as_str()).unwrap_or("");
                                if kind == "input_text" || kind == "output_text" {
                                    if let Some(text) = item.get("text").and_then(|v| v.as_str()) {
                                        parts.push(text);
                                    }
                                }
                            }
                        }
                        log.push(role, parts.join("\n"), entry.timestamp.clone());
                    }
                    "function_call" | "custom_tool_call" | "local_shell_call" => {
                        let name = payload
                            .get("name")
                            .and_then(|v| v.as_str())
                            .unwrap_or("shell");
                        let args = payload
                            .get("arguments")
                            .and_then(|v| v.as_str())
                            .map(String::from)
                            .unwrap_or_else(|| {
                                compact_json(payload.get("input").unwrap_or(payload))
                            });
                        log.push(Role::Tool, format!("{name} {args}"), entry.timestamp.clone());
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }

    log
}

/// Read the `cwd` from a rollout file's `session_meta` line, if present.
/// Used by discovery to match rollouts to a repository.
pub fn codex_rollout_cwd(path: &Path) -> Option<PathBuf> {
    let contents = fs::read_to_string(path).ok()?;
    for line in contents.lines().take(5) {
        let value: serde_json::Value = match serde_json::from_str(line.trim()) {
            Ok(v) => v,
            Err(_) => continue,
        };
        if value.get("type").and_then(|v| v.as_str()) == Some("session_meta") {
            return value
                .get("payload")
                .and_then(|p| p.get("cwd"))
                .and_then(|v| v.as_str())
                .map(PathBuf::from);
        }
    }
    None
}

// ===================================================================
// Gemini chat JSON
// ===================================================================

#[derive(Debug, Deserialize)]
struct GeminiChat {
    #[serde(rename = "sessionId", default)]
    session_id: Option<String>,
    #[serde(default)]
    messages: Vec<GeminiMessage>,
}

#[derive(Debug, Deserialize)]
struct GeminiMessage {
    #[serde(rename = "type", default)]
    message_type: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(rename = "toolCalls", default)]
    tool_calls: Vec<GeminiToolCall>,
}

#[derive(Debug, Deserialize)]
struct GeminiToolCall {
    name: String,
    #[serde(default)]
    args: serde_json::Value,
    #[serde(default)]
    timestamp: Option<String>,
}

/// Parse a Gemini chat file: a single JSON document whose `messages` array
/// alternates `user` and `gemini` entries. Also returns the session ID
/// embedded in the file, if any.
pub fn parse_gemini_chat(contents: &str) -> Result<(ParsedLog, Option<String>)> {
    let chat: GeminiChat = serde_json::from_str(contents)
        .map_err(|e| Error::TranscriptUnavailable(format!("invalid gemini chat file: {e}")))?;
    let mut log = ParsedLog::default();

    for message in chat.messages {
        match message.message_type.as_str() {
            "user" => {
                if let Some(content) = message.content {
                    log.push(Role::User, content, message.timestamp);
                }
            }
            "gemini" => {
                if log.meta.model.is_none() {
                    log.meta.model = message.model;
                }
                if let Some(content) = message.content {
                    log.push(Role::Assistant, content, message.timestamp.clone());
                }
                for call in message.tool_calls {
                    log.push(
                        Role::Tool,
                        format!("{} {}", call.name, compact_json(&call.args)),
                        call.timestamp,
                    );
                }
            }
            // info/error/warning entries carry no conversation content
            _ => {}
        }
    }

    Ok((log, chat.session_id))
}

// ===================================================================
// opencode per-message files
// ===================================================================

#[derive(Debug, Deserialize)]
struct OpencodeMessage {
    id: String,
    role: String,
    #[serde(default)]
    time: OpencodeTime,
    #[serde(rename = "modelID", default)]
    model_id: Option<String>,
    #[serde(default)]
    parts: Vec<OpencodePart>,
}

#[derive(Debug, Default, Deserialize)]
struct OpencodeTime {
    #[serde(default)]
    created: u64,
}

#[derive(Debug, Deserialize)]
struct OpencodePart {
    #[serde(rename = "type", default)]
    part_type: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    tool: Option<String>,
}

/// Parse an opencode session's message directory: one JSON file per message,
/// ordered by the agent's own `time.created` field (then by message ID,
/// which opencode also keeps time-sortable).
pub fn parse_opencode_messages(dir: &Path) -> Result<ParsedLog> {
    let mut parsed: Vec<OpencodeMessage> = Vec::new();
    let mut log = ParsedLog::default();

    let entries = fs::read_dir(dir)
        .map_err(|e| Error::TranscriptUnavailable(format!("reading {}: {e}", dir.display())))?;
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let contents = fs::read_to_string(&path)?;
        match serde_json::from_str::<OpencodeMessage>(&contents) {
            Ok(m) => parsed.push(m),
            Err(e) => {
                warn!(file = %path.display(), error = %e, "skipping malformed message file");
                log.skipped += 1;
            }
        }
    }

    parsed.sort_by(|a, b| {
        a.time
            .created
            .cmp(&b.time.created)
            .then_with(|| a.id.cmp(&b.id))
    });

    for message in parsed {
        let role = match message.role.as_str() {
            "user" => Role::User,
            "assistant" => Role::Assistant,
            _ => Role::System,
        };
        if log.meta.model.is_none() {
            log.meta.model = message.model_id;
        }
        let ts = (message.time.created > 0).then(|| message.time.created.to_string());
        for part in message.parts {
            match part.part_type.as_str() {
                "text" => {
                    if let Some(text) = part.text {
                        log.push(role, text, ts.clone());
                    }
                }
                "tool" => {
                    if let Some(tool) = part.tool {
                        log.push(Role::Tool, tool, ts.clone());
                    }
                }
                _ => {}
            }
        }
    }

    Ok(log)
}

// ===================================================================
// Copilot session JSON
// ===================================================================

#[derive(Debug, Deserialize)]
struct CopilotSession {
    #[serde(rename = "sessionId", default)]
    session_id: Option<String>,
    #[serde(default)]
    cwd: Option<String>,
    #[serde(default)]
    requests: Vec<CopilotRequest>,
}

#[derive(Debug, Deserialize)]
struct CopilotRequest {
    #[serde(default)]
    message: Option<CopilotRequestMessage>,
    #[serde(default)]
    response: Vec<CopilotResponsePart>,
    #[serde(default)]
    timestamp: Option<i64>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CopilotRequestMessage {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct CopilotResponsePart {
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    value: Option<String>,
}

/// Parse a Copilot chat session file: a `requests` array where each entry
/// pairs the user's message with the response parts it produced.
pub fn parse_copilot_session(contents: &str) -> Result<(ParsedLog, Option<String>)> {
    let session: CopilotSession = serde_json::from_str(contents)
        .map_err(|e| Error::TranscriptUnavailable(format!("invalid copilot session file: {e}")))?;
    let mut log = ParsedLog::default();

    for request in session.requests {
        let ts = request.timestamp.map(|ms| ms.to_string());
        if log.meta.model.is_none() {
            log.meta.model = request.model;
        }
        if let Some(message) = request.message {
            log.push(Role::User, message.text, ts.clone());
        }
        let mut texts: Vec<String> = Vec::new();
        for part in request.response {
            // Markdown-bearing response parts carry the assistant text;
            // tool and progress parts have other kinds.
            if let Some(value) = part.value {
                if part.kind.as_deref().is_none_or(|k| k.contains("markdown")) {
                    texts.push(value);
                }
            }
        }
        if !texts.is_empty() {
            log.push(Role::Assistant, texts.join("\n"), ts);
        }
    }

    Ok((log, session.session_id))
}

/// Read the `cwd` recorded in a copilot session file, for discovery matching.
pub fn copilot_session_cwd(path: &Path) -> Option<PathBuf> {
    let contents = fs::read_to_string(path).ok()?;
    let session: CopilotSession = serde_json::from_str(&contents).ok()?;
    session.cwd.map(PathBuf::from)
}

// ===================================================================
// Data roots and path schemes
// ===================================================================

/// Where each agent keeps its session data. Resolved once at the edge and
/// passed in explicitly, so the resolver and discovery are testable against
/// synthetic roots.
#[derive(Debug, Clone)]
pub struct DataRoots {
    pub claude: PathBuf,
    pub codex: PathBuf,
    pub gemini: PathBuf,
    pub opencode: PathBuf,
    pub copilot: PathBuf,
}

impl DataRoots {
    /// Resolve from the conventional locations, honoring the agents' own
    /// environment overrides where they exist.
    pub fn resolve() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        let data = dirs::data_dir().unwrap_or_else(|| home.join(".local/share"));
        Self {
            claude: std::env::var_os("CLAUDE_CONFIG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| home.join(".claude")),
            codex: std::env::var_os("CODEX_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| home.join(".codex")),
            gemini: home.join(".gemini"),
            opencode: data.join("opencode"),
            copilot: home.join(".copilot"),
        }
    }
}

/// Claude Code's per-project transcript directory: the working directory
/// path with every non-alphanumeric character flattened to `-`.
pub fn claude_project_dir(root: &Path, workdir: &Path) -> PathBuf {
    let munged: String = workdir_str(workdir)
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    root.join("projects").join(munged)
}

/// Gemini's per-project partition: SHA-256 of the working directory path.
pub fn gemini_project_dir(root: &Path, workdir: &Path) -> PathBuf {
    let mut hasher = Sha256::new();
    hasher.update(workdir_str(workdir).as_bytes());
    root.join("tmp").join(hex::encode(hasher.finalize()))
}

/// Working-directory path as the agents record it: no trailing separator.
/// git2 reports workdirs with one, agents don't, and both path schemes above
/// are byte-sensitive.
fn workdir_str(workdir: &Path) -> String {
    let s = workdir.to_string_lossy();
    s.strip_suffix('/').unwrap_or(&s).to_string()
}

/// opencode's per-session message directory under the project partition
/// keyed by the repository's root commit hash.
pub fn opencode_session_dir(root: &Path, project_id: &str, session_id: &str) -> PathBuf {
    root.join("project")
        .join(project_id)
        .join("storage/session/message")
        .join(session_id)
}

/// The newest rollout file for a codex session, searched recursively under
/// the sessions tree (rollouts are sharded into date directories).
pub fn find_codex_rollout(codex_root: &Path, session_id: &str) -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    collect_files(&codex_root.join("sessions"), &mut |path| {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if name.starts_with("rollout-") && name.contains(session_id) && name.ends_with(".jsonl") {
            candidates.push(path.to_path_buf());
        }
    });
    candidates.into_iter().max_by_key(|p| file_mtime(p))
}

/// Recursively visit every file under `dir`. Missing directories are fine.
pub(crate) fn collect_files(dir: &Path, visit: &mut dyn FnMut(&Path)) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, visit);
        } else {
            visit(&path);
        }
    }
}

pub(crate) fn file_mtime(path: &Path) -> std::time::SystemTime {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .unwrap_or(std::time::UNIX_EPOCH)
}

// ===================================================================
// Resolver
// ===================================================================

/// Where a transcript lives: a single log file, or a directory of
/// per-message files for agents that store sessions that way.
#[derive(Debug, Clone)]
pub struct SessionSource {
    pub agent: AgentKind,
    pub session_id: String,
    pub path: PathBuf,
}

/// Locates and parses agent session logs into canonical transcripts.
pub struct Resolver {
    roots: DataRoots,
}

impl Resolver {
    pub fn new(roots: DataRoots) -> Self {
        Self { roots }
    }

    pub fn roots(&self) -> &DataRoots {
        &self.roots
    }

    /// Resolve the transcript for a hook event. `project_id` is the
    /// root-commit project identifier, needed only for opencode.
    pub fn resolve(&self, event: &HookEvent, project_id: &str) -> Result<(Transcript, LogMeta)> {
        let source = self.locate(event, project_id)?;
        self.parse(&source)
    }

    /// Map an event to the on-disk location of its session log.
    fn locate(&self, event: &HookEvent, project_id: &str) -> Result<SessionSource> {
        let path = match event.agent {
            AgentKind::Claude => event.transcript_hint.clone().ok_or_else(|| {
                Error::TranscriptUnavailable("claude payload carried no transcript_path".into())
            })?,
            AgentKind::Codex => match &event.transcript_hint {
                Some(hint) => hint.clone(),
                None => {
                    find_codex_rollout(&self.roots.codex, &event.session_id).ok_or_else(|| {
                        Error::TranscriptUnavailable(format!(
                            "no rollout found for codex session {}",
                            event.session_id
                        ))
                    })?
                }
            },
            AgentKind::Opencode => {
                opencode_session_dir(&self.roots.opencode, project_id, &event.session_id)
            }
            AgentKind::Gemini | AgentKind::Copilot => {
                return Err(Error::TranscriptUnavailable(format!(
                    "{} sessions are located by discovery, not by hook events",
                    event.agent
                )));
            }
        };
        Ok(SessionSource {
            agent: event.agent,
            session_id: event.session_id.clone(),
            path,
        })
    }

    /// Parse a located session log into a canonical transcript.
    ///
    /// Fails with `TranscriptUnavailable` when the source is missing or
    /// parses to zero messages — the commit has already happened, so a
    /// swallowed failure here would break the core invariant.
    pub fn parse(&self, source: &SessionSource) -> Result<(Transcript, LogMeta)> {
        let log = match source.agent {
            AgentKind::Claude => parse_claude_jsonl(&read_source(&source.path)?),
            AgentKind::Codex => parse_codex_rollout(&read_source(&source.path)?),
            AgentKind::Gemini => parse_gemini_chat(&read_source(&source.path)?)?.0,
            AgentKind::Opencode => parse_opencode_messages(&source.path)?,
            AgentKind::Copilot => parse_copilot_session(&read_source(&source.path)?)?.0,
        };

        if log.messages.is_empty() {
            return Err(Error::TranscriptUnavailable(format!(
                "{} yielded no messages ({} records skipped)",
                source.path.display(),
                log.skipped
            )));
        }
        if log.skipped > 0 {
            warn!(
                source = %source.path.display(),
                skipped = log.skipped,
                "stored a partial transcript"
            );
        }

        Ok((
            Transcript {
                session_id: source.session_id.clone(),
                agent: source.agent,
                messages: log.messages,
            },
            log.meta,
        ))
    }
}

fn read_source(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .map_err(|e| Error::TranscriptUnavailable(format!("reading {}: {e}", path.display())))
}

fn compact_json(value: &serde_json::Value) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

/// Flatten a tool-result content value (string, or array of text blocks)
/// into plain text.
fn flatten_result_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|item| item.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}
