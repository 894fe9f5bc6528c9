use crate::agent::{self, AgentKind, HookEvent};
use crate::commit;
use crate::discovery::discover_session;
use crate::error::Error;
use crate::preferences::Preferences;
use crate::search::{self, Match};
use crate::store::{Effort, PutOutcome, Store, StoredConversation};
use crate::transcript::{DataRoots, LogMeta, Resolver, Role, Transcript};
use anyhow::{Context, Result};
use git2::Repository;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const DOTDIR: &str = ".gitscribe";

/// What a pipeline run did. `SkippedNonCommit` and `NoActiveSession` are
/// clean no-ops: hooks fire for every tool call and post-commit fires for
/// every commit, so "nothing to capture" is the common case, not a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Stored { commit: String, agent: AgentKind },
    AlreadyStored { commit: String },
    SkippedNonCommit,
    NoActiveSession,
}

/// A repository plus everything needed to capture conversations into it.
pub struct Pipeline {
    repo: Repository,
    workdir: PathBuf,
    prefs: Preferences,
    resolver: Resolver,
}

/// Entry point for the hook path: parse the payload, open the repository the
/// event names, and capture if the tool call was a commit.
pub fn run_store(kind: AgentKind, raw_payload: &str) -> Result<Outcome> {
    let event = agent::normalize(kind, raw_payload)?;
    let pipeline = Pipeline::open(&event.working_dir)?;
    pipeline.capture_hook(&event)
}

/// Entry point for the post-commit trigger: attach the most recently active
/// session, whichever agent it belongs to, to the commit that just landed.
pub fn run_post_commit(cwd: &Path) -> Result<Outcome> {
    let pipeline = Pipeline::open(cwd)?;
    pipeline.capture_post_commit()
}

impl Pipeline {
    /// Open the repository containing `cwd`, creating the `.gitscribe`
    /// preferences directory on first use.
    pub fn open(cwd: &Path) -> Result<Self> {
        let repo = Repository::discover(cwd)
            .with_context(|| format!("no git repository at {}", cwd.display()))?;
        let workdir = repo
            .workdir()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| cwd.to_path_buf());
        // Agents record canonical paths; symlinked temp dirs would otherwise
        // break discovery's cwd matching.
        let workdir = workdir.canonicalize().unwrap_or(workdir);
        let dotdir = workdir.join(DOTDIR);
        if !dotdir.exists() {
            fs::create_dir_all(&dotdir)
                .with_context(|| format!("creating {}", dotdir.display()))?;
        }
        let prefs = Preferences::load(&dotdir)?;
        Ok(Self {
            repo,
            workdir,
            prefs,
            resolver: Resolver::new(DataRoots::resolve()),
        })
    }

    fn store(&self) -> Store<'_> {
        Store::new(&self.repo, self.prefs.notes_ref.clone())
    }

    /// Handle one normalized hook event. Non-commit tool calls are a no-op:
    /// the post-commit trigger will see any commit this session makes later.
    pub fn capture_hook(&self, event: &HookEvent) -> Result<Outcome> {
        if !agent::is_commit_command(&event.raw_command) {
            debug!(agent = %event.agent, tool = %event.tool_name, "not a commit, ignoring");
            return Ok(Outcome::SkippedNonCommit);
        }

        // Only opencode partitions its session storage by project identity.
        let project_id = if event.agent == AgentKind::Opencode {
            commit::root_commit_hash(&self.repo)?
        } else {
            String::new()
        };

        let (transcript, meta) = self.resolver.resolve(event, &project_id)?;
        let head = commit::resolve_head(&self.repo)?;
        let record = self.build_record(&transcript, meta, head.branch)?;
        self.attach(head.oid, transcript.agent, &record)
    }

    /// Handle a commit that just landed, with no hook payload to go on.
    /// Session discovery picks the most recently active session for this
    /// working directory; no session within the window means the commit was
    /// not agent-produced.
    pub fn capture_post_commit(&self) -> Result<Outcome> {
        let head = commit::resolve_head(&self.repo)?;
        match self.store().get(head.oid) {
            // A corrupt note still occupies the commit's slot.
            Ok(Some(_)) | Err(Error::ChecksumMismatch { .. }) => {
                info!(commit = %head.oid, "conversation already attached");
                return Ok(Outcome::AlreadyStored {
                    commit: head.oid.to_string(),
                });
            }
            Ok(None) => {}
            Err(e) => return Err(e.into()),
        }

        // Only opencode needs the root-commit project id; an ambiguous
        // history must not cost the other agents their capture.
        let project_id = match commit::root_commit_hash(&self.repo) {
            Ok(id) => Some(id),
            Err(Error::MultipleRootCommits(roots)) => {
                warn!(roots, "multiple root commits, skipping opencode discovery");
                None
            }
            Err(e) => return Err(e.into()),
        };
        let window = self.prefs.discovery_window();
        let Some(source) = discover_session(
            self.resolver.roots(),
            &self.workdir,
            project_id.as_deref(),
            window,
        ) else {
            debug!(commit = %head.oid, "no recently active session, nothing to attach");
            return Ok(Outcome::NoActiveSession);
        };

        let (transcript, meta) = self.resolver.parse(&source)?;
        let record = self.build_record(&transcript, meta, head.branch)?;
        self.attach(head.oid, transcript.agent, &record)
    }

    /// Search stored conversations for a case-insensitive substring.
    pub fn search(&self, query: &str) -> Result<Vec<Match>> {
        Ok(search::search(
            &self.store(),
            query,
            self.prefs.snippet_context,
        )?)
    }

    fn attach(
        &self,
        oid: git2::Oid,
        agent: AgentKind,
        record: &StoredConversation,
    ) -> Result<Outcome> {
        match self.store().put(oid, record)? {
            PutOutcome::Written => {
                info!(commit = %oid, %agent, messages = record.message_count, "conversation attached");
                Ok(Outcome::Stored {
                    commit: oid.to_string(),
                    agent,
                })
            }
            PutOutcome::AlreadyPresent => Ok(Outcome::AlreadyStored {
                commit: oid.to_string(),
            }),
        }
    }

    fn build_record(
        &self,
        transcript: &Transcript,
        meta: LogMeta,
        branch: String,
    ) -> Result<StoredConversation> {
        let turns = transcript
            .messages
            .iter()
            .filter(|m| m.role == Role::User)
            .count() as u32;
        let effort = (turns > 0 || meta.input_tokens > 0 || meta.output_tokens > 0).then(|| {
            Effort {
                turns,
                input_tokens: meta.input_tokens,
                output_tokens: meta.output_tokens,
            }
        });
        let project_path = self.workdir.to_string_lossy().into_owned();
        Ok(StoredConversation::new(
            transcript,
            meta.model,
            project_path,
            branch,
            effort,
        )?)
    }
}
