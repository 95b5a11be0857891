use std::fmt;

/// What an operator message asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Approve(Option<String>),
    Reject {
        plan_id: Option<String>,
        reason: Option<String>,
    },
    Reinvestigate(Option<String>),
    Status,
    Help,
    /// Anything that is not a command.
    FreeText(String),
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Intent::Approve(_) => f.write_str("approve"),
            Intent::Reject { .. } => f.write_str("reject"),
            Intent::Reinvestigate(_) => f.write_str("reinvestigate"),
            Intent::Status => f.write_str("status"),
            Intent::Help => f.write_str("help"),
            Intent::FreeText(_) => f.write_str("free text"),
        }
    }
}

pub trait IntentParser {
    fn parse(&self, text: &str) -> Intent;
}

const APPROVE: &[&str] = &["approve", "yes", "ok", "execute", "run"];
const REJECT: &[&str] = &["reject", "no", "deny", "cancel", "skip"];
const REINVESTIGATE: &[&str] = &["reinvestigate", "investigate", "recheck"];
const STATUS: &[&str] = &["status", "pending", "list", "plans", "?"];
const HELP: &[&str] = &["help", "commands"];

/// Keyword commands, case-insensitive, plus the 👍 👎 🔍 reactions.
#[derive(Debug, Default)]
pub struct KeywordIntentParser;

impl IntentParser for KeywordIntentParser {
    fn parse(&self, text: &str) -> Intent {
        let trimmed = text.trim();
        match trimmed.trim_end_matches('\u{fe0f}') {
            "👍" => return Intent::Approve(None),
            "👎" => return Intent::Reject {
                plan_id: None,
                reason: None,
            },
            "🔍" => return Intent::Reinvestigate(None),
            _ => {}
        }

        let mut words = trimmed.split_whitespace();
        let Some(first) = words.next() else {
            return Intent::FreeText(String::new());
        };
        let verb = first.to_lowercase();
        let plan_id = words.next().map(str::to_string);
        let rest: Vec<&str> = words.collect();

        if APPROVE.contains(&verb.as_str()) && rest.is_empty() {
            return Intent::Approve(plan_id);
        }
        if REJECT.contains(&verb.as_str()) {
            let reason = (!rest.is_empty()).then(|| rest.join(" "));
            return Intent::Reject { plan_id, reason };
        }
        if REINVESTIGATE.contains(&verb.as_str()) && rest.is_empty() {
            return Intent::Reinvestigate(plan_id);
        }
        if plan_id.is_none() {
            if STATUS.contains(&verb.as_str()) {
                return Intent::Status;
            }
            if HELP.contains(&verb.as_str()) {
                return Intent::Help;
            }
        }
        Intent::FreeText(trimmed.to_string())
    }
}

pub const HELP_TEXT: &str = "🤖 mender commands:

• approve [plan_id] - execute a pending plan (newest if omitted)
• reject [plan_id] [reason] - dismiss a pending plan
• reinvestigate [plan_id] - re-check the host and re-plan
• status - list pending plans
• help - show this message

Reactions: 👍 approve, 👎 reject, 🔍 reinvestigate";
