//! Search integration tests over stored conversation notes.

mod common;

use common::{TestEnv, claude_payload, claude_transcript_lines};

fn store_conversation(env: &TestEnv, topic: &str) {
    let transcript = env.write_claude_transcript("itest-session", &claude_transcript_lines(topic));
    let payload = claude_payload(env, &transcript, "git commit -m x");
    let (code, _, err) = env.run(&["store", "--agent", "claude"], Some(&payload));
    assert_eq!(code, 0, "stderr: {err}");
}

#[test]
fn finds_conversations_by_message_text() {
    let env = TestEnv::new();
    store_conversation(&env, "JWT authentication middleware");

    let (code, out, err) = env.run(&["search", "authentication"], None);
    assert_eq!(code, 0, "stderr: {err}");
    assert!(out.contains("authentication"), "stdout: {out}");
    // the snippet line carries surrounding context from the message
    assert!(out.contains("JWT"), "stdout: {out}");
}

#[test]
fn search_is_case_insensitive() {
    let env = TestEnv::new();
    store_conversation(&env, "JWT authentication middleware");

    let (code, out, _) = env.run(&["search", "AUTHENTICATION"], None);
    assert_eq!(code, 0);
    assert!(!out.contains("no matching conversations found"));
}

#[test]
fn no_match_prints_the_expected_line() {
    let env = TestEnv::new();
    store_conversation(&env, "JWT authentication middleware");

    let (code, out, _) = env.run(&["search", "xyznonexistent99"], None);
    assert_eq!(code, 0);
    assert!(out.contains("no matching conversations found"), "stdout: {out}");
}

#[test]
fn empty_store_prints_the_expected_line() {
    let env = TestEnv::new();
    let (code, out, _) = env.run(&["search", "anything"], None);
    assert_eq!(code, 0);
    assert!(out.contains("no matching conversations found"), "stdout: {out}");
}

#[test]
fn matches_commit_subjects_too() {
    let env = TestEnv::new();
    store_conversation(&env, "error handling");

    // the initial commit's subject is "initial"; the note sits on HEAD, whose
    // subject is searchable even when no message mentions the query
    let (code, out, _) = env.run(&["search", "initial"], None);
    assert_eq!(code, 0);
    assert!(out.contains("initial"), "stdout: {out}");
}
