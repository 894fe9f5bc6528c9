use thiserror::Error;

/// Failure taxonomy for the capture pipeline.
///
/// Anything that would otherwise leave a commit without its note must travel
/// through here and out of the process as a non-zero exit — a swallowed
/// failure is the one bug class this design exists to prevent.
#[derive(Debug, Error)]
pub enum Error {
    /// Hook payload on stdin was not valid JSON, or was missing a required
    /// field for the claimed agent.
    #[error("malformed hook payload: {0}")]
    MalformedPayload(String),

    /// The transcript referenced by the event could not be located or
    /// yielded no messages. Never a silently-empty success: by the time this
    /// fires the commit already exists.
    #[error("transcript unavailable: {0}")]
    TranscriptUnavailable(String),

    /// The repository has no commit to attach a note to (unborn HEAD,
    /// empty repository).
    #[error("no HEAD commit to attach conversation to")]
    NoHeadCommit,

    /// Concurrent writers for the same commit exhausted the retry budget.
    #[error("note write conflict on commit {commit} after {attempts} attempts")]
    WriteConflict { commit: String, attempts: u32 },

    /// A stored note's checksum no longer matches its transcript body.
    /// Read-time only; reported per-record during list/search.
    #[error("checksum mismatch for commit {commit}: note is corrupt")]
    ChecksumMismatch { commit: String },

    /// The repository has more than one root commit, so the opencode
    /// project partition is ambiguous. Surfaced rather than guessed.
    #[error("repository has {0} root commits; project identity is ambiguous")]
    MultipleRootCommits(usize),

    #[error(transparent)]
    Git(#[from] git2::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
