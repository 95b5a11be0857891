//! Deciding whether the problem a stale plan was written for still exists.
//!
//! This is a heuristic and can be wrong both ways: a keyword collision keeps
//! a resolved plan alive (false positive), and a condition that comes back
//! under a different type and identifier lets a live problem be closed
//! (false negative). Callers treat "gone" as grounds to close the plan, not
//! as proof of a fix.

use std::collections::HashSet;

use crate::issue::Issue;
use crate::plan::Plan;

pub trait PersistenceCheck {
    fn still_present(&self, plan: &Plan, current: &[Issue]) -> bool;
}

const STOPWORDS: &[&str] = &[
    "about", "after", "again", "also", "been", "being", "check", "could", "does", "from", "have",
    "into", "issue", "more", "most", "only", "other", "over", "should", "some", "than", "that",
    "their", "then", "there", "these", "this", "unknown", "very", "were", "what", "when",
    "where", "which", "while", "will", "with", "would", "your",
];

const MIN_KEYWORD_LEN: usize = 4;

/// Still present when any current issue shares a fingerprint or an issue
/// type with the plan's triggers, or mentions a keyword taken from the
/// plan's trigger identifiers and evidence lines.
#[derive(Debug, Default)]
pub struct OverlapCheck;

impl OverlapCheck {
    fn keywords(plan: &Plan) -> HashSet<String> {
        let mut sources: Vec<String> = plan.draft.evidence.clone();
        for issue in &plan.draft.trigger_issues {
            if let Some(id) = issue.identifier() {
                sources.push(id);
            }
        }
        sources.iter().flat_map(|s| tokenize(s)).collect()
    }
}

impl PersistenceCheck for OverlapCheck {
    fn still_present(&self, plan: &Plan, current: &[Issue]) -> bool {
        if current.is_empty() {
            return false;
        }

        let fingerprints: HashSet<&str> = plan.draft.fingerprints.iter().map(String::as_str).collect();
        let types: HashSet<&str> = plan
            .draft
            .trigger_issues
            .iter()
            .map(|i| i.issue_type.as_str())
            .collect();

        for issue in current {
            if fingerprints.contains(issue.fingerprint().as_str())
                || types.contains(issue.issue_type.as_str())
            {
                return true;
            }
        }

        let keywords = Self::keywords(plan);
        if keywords.is_empty() {
            return false;
        }
        current.iter().any(|issue| {
            let mut text = issue.message.clone();
            if let Some(id) = issue.identifier() {
                text.push(' ');
                text.push_str(&id);
            }
            tokenize(&text).iter().any(|t| keywords.contains(t))
        })
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '-' || c == '_'))
        .map(|w| w.trim_matches(|c| c == '-' || c == '_').to_lowercase())
        .filter(|w| w.chars().count() >= MIN_KEYWORD_LEN && !STOPWORDS.contains(&w.as_str()))
        .collect()
}
