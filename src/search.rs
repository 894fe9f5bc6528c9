use crate::error::Result;
use crate::store::Store;
use serde::Serialize;

/// Which part of a stored conversation matched the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchedField {
    MessageText,
    CommitSubject,
    SessionId,
}

/// One search hit, ordered newest commit first.
#[derive(Debug, Serialize)]
pub struct Match {
    pub commit: String,
    pub subject: String,
    pub snippet: String,
    pub matched_field: MatchedField,
}

/// Case-insensitive substring search over every stored conversation.
///
/// The notes namespace is scanned fresh per query: one note per commit is
/// small enough that consistency with git history beats an index. Corrupt
/// records are skipped (already logged by the store) and never abort the
/// query.
pub fn search(store: &Store, query: &str, context: usize) -> Result<Vec<Match>> {
    let needle = query.to_lowercase();
    let mut matches = Vec::new();
    if needle.is_empty() {
        return Ok(matches);
    }

    for entry in store.list()? {
        let Ok(conversation) = entry.record else {
            continue;
        };
        let commit = entry.commit.to_string();

        if let Some(snippet) = snippet_around(&entry.subject, &needle, context) {
            matches.push(Match {
                commit,
                subject: entry.subject.clone(),
                snippet,
                matched_field: MatchedField::CommitSubject,
            });
            continue;
        }

        if contains_ci(&conversation.session_id, &needle) {
            matches.push(Match {
                snippet: conversation.session_id.clone(),
                commit,
                subject: entry.subject.clone(),
                matched_field: MatchedField::SessionId,
            });
            continue;
        }

        let Ok(transcript) = conversation.transcript() else {
            continue;
        };
        if let Some(snippet) = transcript
            .messages
            .iter()
            .find_map(|m| snippet_around(&m.text, &needle, context))
        {
            matches.push(Match {
                commit,
                subject: entry.subject.clone(),
                snippet,
                matched_field: MatchedField::MessageText,
            });
        }
    }

    Ok(matches)
}

fn contains_ci(haystack: &str, needle_lower: &str) -> bool {
    find_ci(haystack, needle_lower).is_some()
}

/// Find `needle_lower` in `haystack` case-insensitively. Returns the byte
/// range of the matched span in the original string.
fn find_ci(haystack: &str, needle_lower: &str) -> Option<(usize, usize)> {
    for (start, _) in haystack.char_indices() {
        let mut consumed = 0usize;
        let mut hay_chars = haystack[start..].char_indices();
        let mut needle_chars = needle_lower.chars().peekable();
        let matched = loop {
            if needle_chars.peek().is_none() {
                break true;
            }
            let Some((offset, hc)) = hay_chars.next() else {
                break false;
            };
            // Compare one original char against the needle, consuming as
            // many needle chars as its lowercase expansion produces.
            let mut ok = true;
            for lc in hc.to_lowercase() {
                if needle_chars.next() != Some(lc) {
                    ok = false;
                    break;
                }
            }
            if !ok {
                break false;
            }
            consumed = offset + hc.len_utf8();
        };
        if matched {
            return Some((start, start + consumed));
        }
    }
    None
}

/// Cut a snippet of up to `context` characters either side of the match,
/// with ellipses where the text was truncated.
fn snippet_around(text: &str, needle_lower: &str, context: usize) -> Option<String> {
    let (start, end) = find_ci(text, needle_lower)?;

    let prefix_start = text[..start]
        .char_indices()
        .rev()
        .take(context)
        .last()
        .map(|(i, _)| i)
        .unwrap_or(start);
    let suffix_end = text[end..]
        .char_indices()
        .nth(context)
        .map(|(i, _)| end + i)
        .unwrap_or(text.len());

    let mut snippet = String::new();
    if prefix_start > 0 {
        snippet.push_str("...");
    }
    snippet.push_str(text[prefix_start..suffix_end].trim_matches(['\n', '\r']));
    if suffix_end < text.len() {
        snippet.push_str("...");
    }
    Some(snippet)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_ci_matches_mixed_case() {
        assert_eq!(find_ci("Help me with JWT", "jwt"), Some((13, 16)));
        assert_eq!(find_ci("AUTHENTICATION", "authentication"), Some((0, 14)));
        assert!(find_ci("nothing here", "jwt").is_none());
    }

    #[test]
    fn snippet_truncates_both_sides() {
        let text = "a".repeat(100) + "needle" + &"b".repeat(100);
        let snippet = snippet_around(&text, "needle", 10).unwrap();
        assert!(snippet.starts_with("..."));
        assert!(snippet.ends_with("..."));
        assert!(snippet.contains("needle"));
        // 10 context chars + ellipses on each side.
        assert_eq!(snippet.len(), 3 + 10 + 6 + 10 + 3);
    }

    #[test]
    fn snippet_keeps_short_text_whole() {
        let snippet = snippet_around("set up JWT tokens", "jwt", 60).unwrap();
        assert_eq!(snippet, "set up JWT tokens");
    }

    #[test]
    fn snippet_respects_multibyte_boundaries() {
        let text = "héllo wörld ... needle ... ünïcode";
        let snippet = snippet_around(text, "needle", 5).unwrap();
        assert!(snippet.contains("needle"));
    }
}
