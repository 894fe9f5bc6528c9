use crate::agent::AgentKind;
use crate::transcript::{
    self, DataRoots, SessionSource, claude_project_dir, codex_rollout_cwd, collect_files,
    copilot_session_cwd, file_mtime, gemini_project_dir,
};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::debug;

/// A session found by scanning agent data roots, with the activity time
/// used to pick a winner.
#[derive(Debug)]
struct Candidate {
    source: SessionSource,
    last_active: SystemTime,
}

/// Find the session most likely responsible for a commit that just landed:
/// the most recently active session, across all agents, that belongs to this
/// working directory.
///
/// This is the commit-time path used by the uniform post-commit trigger. It
/// never relies on a session ID passed at hook time — hookless agents have
/// none, and for hook-capable agents the commit may have happened in a
/// different process than the hook (a manual commit after the session).
///
/// `window` bounds how stale a session may be and still claim the commit.
/// `None` means no recent session: the commit was not agent-produced, and
/// the caller treats that as a clean no-op.
pub fn discover_session(
    roots: &DataRoots,
    workdir: &Path,
    opencode_project_id: Option<&str>,
    window: Duration,
) -> Option<SessionSource> {
    let mut candidates: Vec<Candidate> = Vec::new();
    candidates.extend(claude_candidates(roots, workdir));
    candidates.extend(codex_candidates(roots, workdir));
    candidates.extend(gemini_candidates(roots, workdir));
    if let Some(project_id) = opencode_project_id {
        candidates.extend(opencode_candidates(roots, project_id));
    }
    candidates.extend(copilot_candidates(roots, workdir));

    let now = SystemTime::now();
    let freshest = candidates
        .into_iter()
        .filter(|c| {
            now.duration_since(c.last_active)
                .map(|age| age <= window)
                .unwrap_or(true) // clock skew: mtime in the future still counts
        })
        .max_by_key(|c| c.last_active)?;

    debug!(
        agent = %freshest.source.agent,
        session = %freshest.source.session_id,
        path = %freshest.source.path.display(),
        "discovered active session"
    );
    Some(freshest.source)
}

/// Claude keeps one JSONL per session under the project's munged-path dir;
/// the file stem is the session ID.
fn claude_candidates(roots: &DataRoots, workdir: &Path) -> Vec<Candidate> {
    let dir = claude_project_dir(&roots.claude, workdir);
    read_dir_files(&dir)
        .into_iter()
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("jsonl"))
        .map(|path| Candidate {
            last_active: file_mtime(&path),
            source: SessionSource {
                agent: AgentKind::Claude,
                session_id: file_stem(&path),
                path,
            },
        })
        .collect()
}

/// Codex rollouts are sharded by date with no per-project partition, so the
/// `session_meta` cwd recorded in each file decides ownership.
fn codex_candidates(roots: &DataRoots, workdir: &Path) -> Vec<Candidate> {
    let mut out = Vec::new();
    collect_files(&roots.codex.join("sessions"), &mut |path| {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if !name.starts_with("rollout-") || !name.ends_with(".jsonl") {
            return;
        }
        if codex_rollout_cwd(path).as_deref() != Some(workdir) {
            return;
        }
        out.push(Candidate {
            last_active: file_mtime(path),
            source: SessionSource {
                agent: AgentKind::Codex,
                session_id: rollout_session_id(name),
                path: path.to_path_buf(),
            },
        });
    });
    out
}

fn gemini_candidates(roots: &DataRoots, workdir: &Path) -> Vec<Candidate> {
    let dir = gemini_project_dir(&roots.gemini, workdir).join("chats");
    read_dir_files(&dir)
        .into_iter()
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
        .map(|path| Candidate {
            last_active: file_mtime(&path),
            source: SessionSource {
                agent: AgentKind::Gemini,
                session_id: session_id_from_file(&path, AgentKind::Gemini),
                path,
            },
        })
        .collect()
}

/// opencode partitions by root commit hash; each session is a directory of
/// message files, so the freshest message decides the session's activity.
fn opencode_candidates(roots: &DataRoots, project_id: &str) -> Vec<Candidate> {
    let base = roots
        .opencode
        .join("project")
        .join(project_id)
        .join("storage/session/message");
    let Ok(entries) = std::fs::read_dir(&base) else {
        return Vec::new();
    };
    entries
        .flatten()
        .filter(|e| e.path().is_dir())
        .map(|e| {
            let path = e.path();
            let last_active = read_dir_files(&path)
                .iter()
                .map(|f| file_mtime(f))
                .max()
                .unwrap_or(std::time::UNIX_EPOCH);
            Candidate {
                last_active,
                source: SessionSource {
                    agent: AgentKind::Opencode,
                    session_id: file_stem(&path),
                    path,
                },
            }
        })
        .collect()
}

fn copilot_candidates(roots: &DataRoots, workdir: &Path) -> Vec<Candidate> {
    let dir = roots.copilot.join("history-session-state");
    read_dir_files(&dir)
        .into_iter()
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
        .filter(|p| copilot_session_cwd(p).as_deref() == Some(workdir))
        .map(|path| Candidate {
            last_active: file_mtime(&path),
            source: SessionSource {
                agent: AgentKind::Copilot,
                session_id: session_id_from_file(&path, AgentKind::Copilot),
                path,
            },
        })
        .collect()
}

// ---------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------

fn read_dir_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file() || p.is_dir())
        .collect()
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown")
        .to_string()
}

/// Session ID embedded in the file where the format records one, falling
/// back to the file stem.
fn session_id_from_file(path: &Path, agent: AgentKind) -> String {
    let embedded = std::fs::read_to_string(path).ok().and_then(|contents| {
        let id = match agent {
            AgentKind::Gemini => transcript::parse_gemini_chat(&contents).ok()?.1,
            AgentKind::Copilot => transcript::parse_copilot_session(&contents).ok()?.1,
            _ => None,
        };
        id
    });
    embedded.unwrap_or_else(|| file_stem(path))
}

/// Rollout filenames look like `rollout-2026-08-27T10-00-00-<session-id>.jsonl`;
/// the trailing UUID is the session ID.
fn rollout_session_id(name: &str) -> String {
    let stem = name
        .strip_prefix("rollout-")
        .unwrap_or(name)
        .strip_suffix(".jsonl")
        .unwrap_or(name);
    // Timestamp prefix is fixed-width; anything after it is the ID.
    match stem.char_indices().nth(20) {
        Some((idx, _)) => stem[idx..].to_string(),
        None => stem.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rollout_session_id_strips_timestamp_prefix() {
        let id = rollout_session_id(
            "rollout-2026-08-27T10-00-00-0199a213-ae87-7a31-8e63-d489d7a8d05d.jsonl",
        );
        assert_eq!(id, "0199a213-ae87-7a31-8e63-d489d7a8d05d");
    }

    #[test]
    fn rollout_session_id_tolerates_short_names() {
        assert_eq!(rollout_session_id("rollout-abc.jsonl"), "abc");
    }
}
