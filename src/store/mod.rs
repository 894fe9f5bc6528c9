use crate::error::{Error, Result};
use crate::transcript::Transcript;
use git2::Repository;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, info, warn};

/// Notes ref namespace holding one conversation per commit.
pub const DEFAULT_NOTES_REF: &str = "refs/notes/conversations";

/// Schema version of the note body.
pub const FORMAT_VERSION: u32 = 1;

/// Retry budget for same-commit write races. Two independent agent
/// processes touching the same just-made commit is the only realistic
/// contention, so a small bound suffices.
const PUT_ATTEMPTS: u32 = 3;

// ===================================================================
// Persisted envelope
// ===================================================================

/// Token/turn accounting for the session, where the agent's log reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Effort {
    pub turns: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// The durable record attached to a commit: the serialized transcript plus
/// enough metadata to search and verify it. One per commit SHA, written
/// exactly once; the transcript field holds the canonical `Transcript` as a
/// JSON string so the checksum covers its exact bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredConversation {
    pub version: u32,
    pub session_id: String,
    #[serde(default)]
    pub agent: String,
    #[serde(default)]
    pub model: String,
    pub project_path: String,
    pub git_branch: String,
    pub message_count: usize,
    pub checksum: String,
    pub transcript: String,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effort: Option<Effort>,
}

impl StoredConversation {
    /// Build an envelope around a canonical transcript, computing the
    /// checksum from the serialized form and stamping the current time.
    pub fn new(
        transcript: &Transcript,
        model: Option<String>,
        project_path: String,
        git_branch: String,
        effort: Option<Effort>,
    ) -> Result<Self> {
        let serialized = serde_json::to_string(transcript)?;
        let checksum = content_checksum(&serialized);
        let timestamp = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default();
        Ok(Self {
            version: FORMAT_VERSION,
            session_id: transcript.session_id.clone(),
            agent: transcript.agent.to_string(),
            model: model.unwrap_or_default(),
            project_path,
            git_branch,
            message_count: transcript.message_count(),
            checksum,
            transcript: serialized,
            timestamp,
            effort,
        })
    }

    /// Deserialize the embedded transcript.
    pub fn transcript(&self) -> Result<Transcript> {
        Ok(serde_json::from_str(&self.transcript)?)
    }

    /// Recompute the checksum over the stored transcript bytes.
    pub fn checksum_valid(&self) -> bool {
        content_checksum(&self.transcript) == self.checksum
    }
}

/// SHA-256 of the serialized transcript, hex-encoded.
pub fn content_checksum(serialized: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(serialized.as_bytes());
    hex::encode(hasher.finalize())
}

// ===================================================================
// Git-notes backed store
// ===================================================================

/// Outcome of a `put`: written fresh, or already present (idempotent
/// success, never a duplicate).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Written,
    AlreadyPresent,
}

/// One entry from a full scan. Corrupt records are reported in place so a
/// single bad note never aborts a listing.
#[derive(Debug)]
pub struct ListedConversation {
    pub commit: git2::Oid,
    pub subject: String,
    pub commit_time: i64,
    pub record: Result<StoredConversation>,
}

/// Conversation store over a dedicated git notes ref.
///
/// Git note-adds are not transactional across processes, so the store is an
/// optimistic key/value layer: check, write, and on a ref-moved conflict
/// re-check and retry within a small bound. All mutation goes through git's
/// own note machinery, never raw ref files, to keep git's locking intact.
pub struct Store<'repo> {
    repo: &'repo Repository,
    notes_ref: String,
}

impl<'repo> Store<'repo> {
    pub fn new(repo: &'repo Repository, notes_ref: impl Into<String>) -> Self {
        Self {
            repo,
            notes_ref: notes_ref.into(),
        }
    }

    /// Attach a conversation to a commit, at most once.
    ///
    /// A note already present for the SHA is success-without-duplication: a
    /// session legitimately triggers multiple attempts for the same commit
    /// (tool hook plus post-commit trigger), and the first writer wins.
    pub fn put(&self, commit: git2::Oid, conversation: &StoredConversation) -> Result<PutOutcome> {
        let body = serde_json::to_string_pretty(conversation)?;
        let sig = self.repo.signature()?;

        let mut last_err: Option<git2::Error> = None;
        for attempt in 1..=PUT_ATTEMPTS {
            if self.repo.find_note(Some(&self.notes_ref), commit).is_ok() {
                info!(%commit, "note already present, skipping write");
                return Ok(PutOutcome::AlreadyPresent);
            }
            match self
                .repo
                .note(&sig, &sig, Some(&self.notes_ref), commit, &body, false)
            {
                Ok(_) => {
                    debug!(%commit, notes_ref = %self.notes_ref, "conversation note written");
                    return Ok(PutOutcome::Written);
                }
                // Ref moved under us, or a concurrent writer got there
                // first; the next iteration re-checks existence.
                Err(e) if matches!(e.code(), git2::ErrorCode::Exists | git2::ErrorCode::Locked) => {
                    warn!(%commit, attempt, error = %e, "note write conflicted, retrying");
                    last_err = Some(e);
                }
                Err(e) => return Err(e.into()),
            }
        }

        match last_err {
            Some(_) if self.repo.find_note(Some(&self.notes_ref), commit).is_ok() => {
                Ok(PutOutcome::AlreadyPresent)
            }
            _ => Err(Error::WriteConflict {
                commit: commit.to_string(),
                attempts: PUT_ATTEMPTS,
            }),
        }
    }

    /// Read the conversation attached to a commit, verifying its checksum.
    pub fn get(&self, commit: git2::Oid) -> Result<Option<StoredConversation>> {
        let note = match self.repo.find_note(Some(&self.notes_ref), commit) {
            Ok(n) => n,
            Err(e) if e.code() == git2::ErrorCode::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let body = note.message().unwrap_or("");
        let conversation: StoredConversation = serde_json::from_str(body)?;
        if !conversation.checksum_valid() {
            return Err(Error::ChecksumMismatch {
                commit: commit.to_string(),
            });
        }
        Ok(Some(conversation))
    }

    /// Scan every stored conversation, newest commit first.
    ///
    /// Corrupt or checksum-failing notes are reported per-entry; the scan
    /// itself never aborts on one bad record.
    pub fn list(&self) -> Result<Vec<ListedConversation>> {
        let notes = match self.repo.notes(Some(&self.notes_ref)) {
            Ok(iter) => iter,
            // No ref yet means nothing has been stored.
            Err(e) if e.code() == git2::ErrorCode::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries: Vec<ListedConversation> = Vec::new();
        for item in notes {
            let (_, annotated) = item?;
            let commit = match self.repo.find_commit(annotated) {
                Ok(c) => c,
                // Note on a pruned or non-commit object; skip it.
                Err(_) => continue,
            };
            let record = match self.get(annotated) {
                Ok(Some(c)) => Ok(c),
                Ok(None) => continue,
                Err(e) => {
                    warn!(commit = %annotated, error = %e, "unreadable conversation note");
                    Err(e)
                }
            };
            entries.push(ListedConversation {
                commit: annotated,
                subject: commit.summary().unwrap_or("").to_string(),
                commit_time: commit.time().seconds(),
                record,
            });
        }

        entries.sort_by(|a, b| b.commit_time.cmp(&a.commit_time));
        Ok(entries)
    }
}
