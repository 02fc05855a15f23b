// Event Filter Engine
//
// A closed boolean predicate algebra over inbound review events. Decides
// which notifications become jobs. An absent event is false at every
// predicate, and an empty And/Or list is false - a misconfigured empty
// filter must never become an open gate.

use regex::{Regex, RegexBuilder};

use crate::config::Config;
use crate::domain::error::{DomainError, Result};
use crate::domain::event::{EventKind, ReviewEvent};

#[derive(Debug, Clone)]
pub enum EventFilter {
    /// Event kind equals the given kind.
    EventType(EventKind),
    /// Branch equals a fixed value AND project is in the allow-list.
    Change {
        branch: String,
        projects: Vec<String>,
    },
    /// Comment text matches the pattern (no comment: no match).
    Comment(Regex),
    /// Author username equals the given account (no author: no match).
    Author(String),
    Not(Box<EventFilter>),
    /// Short-circuits on the first non-match. Empty list is always false.
    And(Vec<EventFilter>),
    /// Short-circuits on the first match. Empty list is always false.
    Or(Vec<EventFilter>),
}

impl EventFilter {
    pub fn matches(&self, event: Option<&ReviewEvent>) -> bool {
        let Some(event) = event else {
            return false;
        };
        match self {
            EventFilter::EventType(kind) => event.kind == *kind,
            EventFilter::Change { branch, projects } => event
                .change
                .as_ref()
                .is_some_and(|c| c.branch == *branch && projects.contains(&c.project)),
            EventFilter::Comment(pattern) => event
                .comment
                .as_deref()
                .is_some_and(|c| pattern.is_match(c)),
            EventFilter::Author(username) => event
                .author
                .as_ref()
                .is_some_and(|a| a.username == *username),
            EventFilter::Not(inner) => !inner.matches(Some(event)),
            EventFilter::And(filters) => {
                !filters.is_empty() && filters.iter().all(|f| f.matches(Some(event)))
            }
            EventFilter::Or(filters) => filters.iter().any(|f| f.matches(Some(event))),
        }
    }

    /// The production trigger rule:
    ///
    /// `(comment-added AND not-from-own-account AND recheck-comment AND
    /// change-matches) OR (patchset-created AND change-matches)`
    pub fn production(config: &Config) -> Result<Self> {
        let recheck = RegexBuilder::new(&config.recheck_pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| DomainError::InvalidPattern(e.to_string()))?;
        let change = || EventFilter::Change {
            branch: config.branch.clone(),
            projects: config.projects.clone(),
        };
        Ok(EventFilter::Or(vec![
            EventFilter::And(vec![
                EventFilter::EventType(EventKind::CommentAdded),
                EventFilter::Not(Box::new(EventFilter::Author(config.ci_account.clone()))),
                EventFilter::Comment(recheck),
                change(),
            ]),
            EventFilter::And(vec![
                EventFilter::EventType(EventKind::PatchsetCreated),
                change(),
            ]),
        ]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::{Account, Change, Patchset};

    fn event(kind: EventKind) -> ReviewEvent {
        ReviewEvent {
            kind,
            change: Some(Change {
                project: "nova".to_string(),
                branch: "master".to_string(),
                number: Some("65261".to_string()),
            }),
            patchset: Some(Patchset {
                ref_name: "refs/changes/61/65261/7".to_string(),
                revision: "c0ff33".to_string(),
            }),
            comment: None,
            author: Some(Account {
                username: "dev1".to_string(),
            }),
        }
    }

    fn config() -> Config {
        Config {
            projects: vec!["nova".to_string(), "tempest".to_string()],
            ..Config::default()
        }
    }

    #[test]
    fn empty_and_is_false() {
        let e = event(EventKind::PatchsetCreated);
        assert!(!EventFilter::And(vec![]).matches(Some(&e)));
    }

    #[test]
    fn empty_or_is_false() {
        let e = event(EventKind::PatchsetCreated);
        assert!(!EventFilter::Or(vec![]).matches(Some(&e)));
    }

    #[test]
    fn missing_event_is_false_everywhere() {
        let filters = [
            EventFilter::EventType(EventKind::PatchsetCreated),
            EventFilter::And(vec![EventFilter::EventType(EventKind::PatchsetCreated)]),
            EventFilter::Or(vec![EventFilter::EventType(EventKind::PatchsetCreated)]),
            EventFilter::Not(Box::new(EventFilter::EventType(EventKind::PatchsetCreated))),
        ];
        for f in &filters {
            assert!(!f.matches(None));
        }
    }

    #[test]
    fn patchset_created_for_allowed_project_matches() {
        let f = EventFilter::production(&config()).unwrap();
        assert!(f.matches(Some(&event(EventKind::PatchsetCreated))));
    }

    #[test]
    fn patchset_created_for_other_branch_does_not_match() {
        let f = EventFilter::production(&config()).unwrap();
        let mut e = event(EventKind::PatchsetCreated);
        e.change.as_mut().unwrap().branch = "stable/havana".to_string();
        assert!(!f.matches(Some(&e)));
    }

    #[test]
    fn patchset_created_for_unlisted_project_does_not_match() {
        let f = EventFilter::production(&config()).unwrap();
        let mut e = event(EventKind::PatchsetCreated);
        e.change.as_mut().unwrap().project = "glance".to_string();
        assert!(!f.matches(Some(&e)));
    }

    #[test]
    fn recheck_comment_matches_case_insensitively() {
        let f = EventFilter::production(&config()).unwrap();
        let mut e = event(EventKind::CommentAdded);
        e.comment = Some("Recheck nobug".to_string());
        assert!(f.matches(Some(&e)));
    }

    #[test]
    fn ordinary_comment_does_not_match() {
        let f = EventFilter::production(&config()).unwrap();
        let mut e = event(EventKind::CommentAdded);
        e.comment = Some("Looks good to me".to_string());
        assert!(!f.matches(Some(&e)));
    }

    #[test]
    fn own_account_comment_is_ignored() {
        let cfg = config();
        let f = EventFilter::production(&cfg).unwrap();
        let mut e = event(EventKind::CommentAdded);
        e.comment = Some("recheck".to_string());
        e.author = Some(Account {
            username: cfg.ci_account.clone(),
        });
        assert!(!f.matches(Some(&e)));
    }

    #[test]
    fn unknown_event_kind_does_not_match() {
        let f = EventFilter::production(&config()).unwrap();
        assert!(!f.matches(Some(&event(EventKind::Unknown))));
    }
}
