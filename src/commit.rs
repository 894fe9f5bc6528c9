use crate::error::{Error, Result};
use git2::Repository;

/// What a stored conversation gets attached to: the commit on HEAD at the
/// time the pipeline runs, plus the metadata the envelope records.
#[derive(Debug, Clone)]
pub struct HeadCommit {
    pub oid: git2::Oid,
    pub subject: String,
    pub branch: String,
}

/// Resolve the current HEAD commit. Fails fast with `NoHeadCommit` on an
/// unborn HEAD (fresh repository, detached-and-empty state) so the caller
/// exits non-zero instead of silently losing the transcript.
pub fn resolve_head(repo: &Repository) -> Result<HeadCommit> {
    let head = repo.head().map_err(|_| Error::NoHeadCommit)?;
    let commit = head.peel_to_commit().map_err(|_| Error::NoHeadCommit)?;
    let subject = commit.summary().unwrap_or("").to_string();
    let branch = head.shorthand().unwrap_or("HEAD").to_string();
    Ok(HeadCommit {
        oid: commit.id(),
        subject,
        branch,
    })
}

/// The repository's root commit hash — the project identifier opencode uses
/// to partition its session storage.
///
/// Grafted or merged histories can have several roots; that makes the
/// partition ambiguous, so it is surfaced as an error rather than guessed.
pub fn root_commit_hash(repo: &Repository) -> Result<String> {
    let mut revwalk = repo.revwalk()?;
    revwalk.push_head().map_err(|_| Error::NoHeadCommit)?;

    let mut roots: Vec<git2::Oid> = Vec::new();
    for oid in revwalk {
        let oid = oid?;
        if repo.find_commit(oid)?.parent_count() == 0 {
            roots.push(oid);
        }
    }

    match roots.as_slice() {
        [root] => Ok(root.to_string()),
        [] => Err(Error::NoHeadCommit),
        many => Err(Error::MultipleRootCommits(many.len())),
    }
}
