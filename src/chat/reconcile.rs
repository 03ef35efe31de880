//! Merging a client's optimistic transcript with what the store persisted.

use serde::{Deserialize, Serialize};

use crate::store::{Role, StoredMessage};

/// One transcript line as a client holds it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

impl HistoryEntry {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    fn same_as(&self, other: &HistoryEntry) -> bool {
        self.role == other.role && self.content.trim() == other.content.trim()
    }

    /// Whether this persisted entry accounts for an optimistic one.
    ///
    /// A streamed assistant reply cut short is a prefix of what was stored.
    fn covers(&self, optimistic: &HistoryEntry) -> bool {
        if self.same_as(optimistic) {
            return true;
        }
        let partial = optimistic.content.trim();
        self.role == Role::Assistant
            && optimistic.role == Role::Assistant
            && !partial.is_empty()
            && self.content.trim_start().starts_with(partial)
    }
}

impl From<&StoredMessage> for HistoryEntry {
    fn from(message: &StoredMessage) -> Self {
        Self::new(message.role, message.content.clone())
    }
}

/// Remove a leading repeat of `prompt` from an assistant reply.
///
/// Matching ignores surrounding whitespace and ASCII case. A reply that is
/// nothing but the echo is returned unchanged.
pub fn strip_echo(prompt: &str, response: &str) -> String {
    let prompt = prompt.trim();
    let body = response.trim_start();
    if prompt.is_empty() {
        return response.to_string();
    }

    let echoed = body
        .get(..prompt.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prompt));
    if !echoed {
        return response.to_string();
    }

    let rest = body[prompt.len()..].trim_start_matches(|c: char| c.is_whitespace() || c == ':');
    if rest.is_empty() {
        response.to_string()
    } else {
        rest.to_string()
    }
}

/// Merge an optimistic transcript into the persisted one.
///
/// Persisted entries win and keep their order. Optimistic entries with no
/// persisted counterpart are appended after them. Consecutive duplicate
/// entries collapse into one.
pub fn reconcile(optimistic: &[HistoryEntry], persisted: &[StoredMessage]) -> Vec<HistoryEntry> {
    let persisted: Vec<HistoryEntry> = persisted
        .iter()
        .filter(|m| !m.is_deleted)
        .map(HistoryEntry::from)
        .collect();

    let mut matched = vec![false; persisted.len()];
    let mut pending = Vec::new();
    let mut prompt = "";
    for entry in optimistic {
        let entry = match entry.role {
            Role::User => {
                prompt = &entry.content;
                entry.clone()
            }
            Role::Assistant if is_echo_fragment(prompt, &entry.content) => continue,
            Role::Assistant => HistoryEntry::new(entry.role, strip_echo(prompt, &entry.content)),
            Role::Tool => entry.clone(),
        };
        let hit = (0..persisted.len()).find(|&i| !matched[i] && persisted[i].covers(&entry));
        match hit {
            Some(i) => matched[i] = true,
            None => pending.push(entry),
        }
    }

    let mut merged: Vec<HistoryEntry> = Vec::with_capacity(persisted.len() + pending.len());
    for entry in persisted.into_iter().chain(pending) {
        if merged.last().is_some_and(|last| last.same_as(&entry)) {
            continue;
        }
        merged.push(entry);
    }
    merged
}

/// A streamed reply that so far holds nothing but part of the prompt echo
fn is_echo_fragment(prompt: &str, reply: &str) -> bool {
    let prompt = prompt.trim();
    let reply = reply.trim();
    !prompt.is_empty()
        && !reply.is_empty()
        && prompt
            .get(..reply.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(reply))
}

/// Drop a trailing user entry that repeats the message being sent
pub(crate) fn drop_trailing_echo(history: &mut Vec<HistoryEntry>, message: &str) {
    if history
        .last()
        .is_some_and(|last| last.role == Role::User && last.content.trim() == message.trim())
    {
        history.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn stored(seq: i64, role: Role, content: &str) -> StoredMessage {
        StoredMessage {
            id: format!("m{}", seq),
            conversation_id: "c".into(),
            seq,
            role,
            content: content.into(),
            tool_name: None,
            tool_payload: Vec::new(),
            sql_details: None,
            calculation_details: None,
            chart_data: None,
            error: None,
            is_deleted: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn strips_leading_echo() {
        assert_eq!(
            strip_echo("How much rent?", "how much rent?\n\nAbout $1,800."),
            "About $1,800."
        );
        assert_eq!(strip_echo("hi", "Hello there"), "Hello there");
        assert_eq!(strip_echo("hi", "hi"), "hi");
        assert_eq!(strip_echo("", "text"), "text");
    }

    #[test]
    fn non_ascii_prompt_does_not_split_chars() {
        assert_eq!(strip_echo("ab", "é and more"), "é and more");
    }

    #[test]
    fn persisted_wins_and_pending_is_appended() {
        let persisted = vec![
            stored(1, Role::User, "Can I afford a house?"),
            stored(2, Role::Assistant, "Let's look at your budget."),
        ];
        let optimistic = vec![
            HistoryEntry::new(Role::User, "Can I afford a house? "),
            HistoryEntry::new(Role::Assistant, "Let's look at your bud"),
            HistoryEntry::new(Role::User, "My rent is 1800"),
        ];

        let merged = reconcile(&optimistic, &persisted);
        assert_eq!(
            merged,
            vec![
                HistoryEntry::new(Role::User, "Can I afford a house?"),
                HistoryEntry::new(Role::Assistant, "Let's look at your budget."),
                HistoryEntry::new(Role::User, "My rent is 1800"),
            ]
        );
    }

    #[test]
    fn echoed_optimistic_reply_matches_persisted_reply() {
        let persisted = vec![
            stored(1, Role::User, "How much rent?"),
            stored(2, Role::Assistant, "About $1,800."),
        ];
        let optimistic = vec![
            HistoryEntry::new(Role::User, "How much rent?"),
            HistoryEntry::new(Role::Assistant, "How much rent?\n\nAbout $1,800."),
        ];

        let merged = reconcile(&optimistic, &persisted);
        assert_eq!(
            merged,
            vec![
                HistoryEntry::new(Role::User, "How much rent?"),
                HistoryEntry::new(Role::Assistant, "About $1,800."),
            ]
        );
    }

    #[test]
    fn echo_only_partial_is_not_kept() {
        let persisted = vec![
            stored(1, Role::User, "How much rent?"),
            stored(2, Role::Assistant, "About $1,800."),
        ];
        let optimistic = vec![
            HistoryEntry::new(Role::User, "How much rent?"),
            HistoryEntry::new(Role::Assistant, "How much"),
        ];
        assert_eq!(reconcile(&optimistic, &persisted).len(), 2);

        let unsaved = vec![
            HistoryEntry::new(Role::User, "How much rent?"),
            HistoryEntry::new(Role::Assistant, "How much rent? Around"),
        ];
        let merged = reconcile(&unsaved, &persisted[..1]);
        assert_eq!(
            merged,
            vec![
                HistoryEntry::new(Role::User, "How much rent?"),
                HistoryEntry::new(Role::Assistant, "Around"),
            ]
        );
    }

    #[test]
    fn consecutive_duplicates_collapse() {
        let persisted = vec![stored(1, Role::User, "hello"), stored(2, Role::User, "hello")];
        let merged = reconcile(&[], &persisted);
        assert_eq!(merged.len(), 1);
    }

    #[test]
    fn deleted_messages_are_ignored() {
        let mut gone = stored(1, Role::User, "typo");
        gone.is_deleted = true;
        let merged = reconcile(&[], &[gone, stored(2, Role::User, "fixed")]);
        assert_eq!(merged, vec![HistoryEntry::new(Role::User, "fixed")]);
    }

    #[test]
    fn trailing_echo_is_dropped() {
        let mut history = vec![
            HistoryEntry::new(Role::Assistant, "Hi!"),
            HistoryEntry::new(Role::User, "pay off my card"),
        ];
        drop_trailing_echo(&mut history, "pay off my card");
        assert_eq!(history.len(), 1);
        drop_trailing_echo(&mut history, "pay off my card");
        assert_eq!(history.len(), 1);
    }
}
