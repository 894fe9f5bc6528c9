#![allow(dead_code)]

use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Run the built binary with the given args, working directory, and
/// environment overrides, optionally piping JSON to stdin.
pub fn run_cli(
    args: &[&str],
    stdin_json: Option<&str>,
    cwd: &Path,
    envs: &[(&str, &str)],
) -> (i32, String, String) {
    let mut command = Command::new(env!("CARGO_BIN_EXE_gitscribe"));
    command
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for (key, value) in envs {
        command.env(key, value);
    }

    let mut child = command.spawn().expect("failed to spawn binary");
    if let Some(json) = stdin_json {
        child
            .stdin
            .as_mut()
            .unwrap()
            .write_all(json.as_bytes())
            .unwrap();
    }
    drop(child.stdin.take());

    let output = child.wait_with_output().unwrap();
    (
        output.status.code().unwrap_or(-1),
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
    )
}

/// A temp git repo with an initial commit, plus a temp "home" directory the
/// agent data-root environment variables point into so tests never touch the
/// real machine's session data.
pub struct TestEnv {
    pub repo_dir: tempfile::TempDir,
    pub home_dir: tempfile::TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        let repo_dir = tempfile::tempdir().unwrap();
        let home_dir = tempfile::tempdir().unwrap();
        let repo = git2::Repository::init(repo_dir.path()).unwrap();

        let mut config = repo.config().unwrap();
        config.set_str("user.name", "Test").unwrap();
        config.set_str("user.email", "test@test.com").unwrap();

        fs::write(repo_dir.path().join(".gitignore"), ".gitscribe\n").unwrap();
        let sig = repo.signature().unwrap();
        let tree_oid = repo.index().unwrap().write_tree().unwrap();
        let tree = repo.find_tree(tree_oid).unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[])
            .unwrap();

        Self { repo_dir, home_dir }
    }

    /// Canonical repo path, matching what the binary resolves internally.
    pub fn repo_path(&self) -> PathBuf {
        self.repo_dir.path().canonicalize().unwrap()
    }

    pub fn home_path(&self) -> &Path {
        self.home_dir.path()
    }

    /// Environment overrides that point every agent data root into the temp
    /// home directory.
    pub fn envs(&self) -> Vec<(String, String)> {
        let home = self.home_path().to_str().unwrap().to_string();
        vec![
            ("HOME".into(), home.clone()),
            ("XDG_DATA_HOME".into(), format!("{home}/.local/share")),
            ("CLAUDE_CONFIG_DIR".into(), format!("{home}/.claude")),
            ("CODEX_HOME".into(), format!("{home}/.codex")),
        ]
    }

    pub fn run(&self, args: &[&str], stdin_json: Option<&str>) -> (i32, String, String) {
        let envs = self.envs();
        let env_refs: Vec<(&str, &str)> =
            envs.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        run_cli(args, stdin_json, &self.repo_path(), &env_refs)
    }

    /// Add a commit so post-commit has something fresh to attach to.
    pub fn commit(&self, name: &str, message: &str) -> git2::Oid {
        let repo = git2::Repository::open(self.repo_dir.path()).unwrap();
        fs::write(self.repo_dir.path().join(name), name).unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new(name)).unwrap();
        index.write().unwrap();
        let tree_oid = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_oid).unwrap();
        let sig = repo.signature().unwrap();
        let parent = repo.head().unwrap().peel_to_commit().unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &[&parent])
            .unwrap()
    }

    /// Read the conversation note on HEAD, parsed as JSON.
    pub fn head_note(&self) -> Option<serde_json::Value> {
        let repo = git2::Repository::open(self.repo_dir.path()).unwrap();
        let head_oid = repo.head().unwrap().peel_to_commit().unwrap().id();
        let note = repo
            .find_note(Some("refs/notes/conversations"), head_oid)
            .ok()?;
        note.message().map(|body| serde_json::from_str(body).unwrap())
    }

    /// Write a Claude Code transcript file and return its path.
    pub fn write_claude_transcript(&self, session_id: &str, lines: &[serde_json::Value]) -> PathBuf {
        let munged: String = self
            .repo_path()
            .to_string_lossy()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect();
        let dir = self
            .home_path()
            .join(".claude/projects")
            .join(munged);
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("{session_id}.jsonl"));
        let body = lines
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join("\n");
        fs::write(&path, body).unwrap();
        path
    }

    /// Write a Gemini chat file under the hashed project partition.
    pub fn write_gemini_chat(&self, session_id: &str, chat: &serde_json::Value) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(self.repo_path().to_string_lossy().as_bytes());
        let dir = self
            .home_path()
            .join(".gemini/tmp")
            .join(hex::encode(hasher.finalize()))
            .join("chats");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("{session_id}.json"));
        fs::write(&path, chat.to_string()).unwrap();
        path
    }

    /// Write a Copilot session-state file recording this repo as its cwd.
    pub fn write_copilot_session(&self, session_id: &str, requests: serde_json::Value) -> PathBuf {
        let dir = self.home_path().join(".copilot/history-session-state");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("{session_id}.json"));
        let session = serde_json::json!({
            "sessionId": session_id,
            "cwd": self.repo_path().to_str().unwrap(),
            "requests": requests,
        });
        fs::write(&path, session.to_string()).unwrap();
        path
    }
}

/// A minimal but realistic Claude transcript: one user ask, one answer.
pub fn claude_transcript_lines(topic: &str) -> Vec<serde_json::Value> {
    vec![
        serde_json::json!({
            "type": "user",
            "timestamp": "2026-08-27T10:00:00Z",
            "message": {"role": "user", "content": format!("help me with {topic}")}
        }),
        serde_json::json!({
            "type": "assistant",
            "timestamp": "2026-08-27T10:00:05Z",
            "message": {
                "role": "assistant",
                "model": "model-a",
                "usage": {"input_tokens": 100, "output_tokens": 40},
                "content": [{"type": "text", "text": format!("Done: {topic} is set up.")}]
            }
        }),
    ]
}

/// A Claude hook payload for a tool call in this repo.
pub fn claude_payload(env: &TestEnv, transcript_path: &Path, command: &str) -> String {
    serde_json::json!({
        "session_id": "itest-session",
        "transcript_path": transcript_path.to_str().unwrap(),
        "cwd": env.repo_path().to_str().unwrap(),
        "tool_name": "Bash",
        "tool_input": {"command": command}
    })
    .to_string()
}
