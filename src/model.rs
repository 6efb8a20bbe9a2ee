//! Records persisted by the entity store, the shared scrape-status
//! lifecycle, and the tagged item type the retry layer dispatches on.

use serde::{Deserialize, Serialize};

/// Scrape progress for lists and titles.
///
/// Legal edges: `in_progress` is enterable from any state (a visit beginning,
/// including a forced re-scrape); `completed` and `failed` are only reachable
/// from `in_progress`; `pending` is only re-enterable from `failed` (explicit
/// retry). Titles are additionally driven straight from `pending` to
/// `completed` by [`crate::store::Store::complete_title`], since for a title
/// "completed" means "identity recorded", not "metadata enriched".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrapeStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl ScrapeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ScrapeStatus::Pending => "pending",
            ScrapeStatus::InProgress => "in_progress",
            ScrapeStatus::Completed => "completed",
            ScrapeStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(ScrapeStatus::Pending),
            "in_progress" => Some(ScrapeStatus::InProgress),
            "completed" => Some(ScrapeStatus::Completed),
            "failed" => Some(ScrapeStatus::Failed),
            _ => None,
        }
    }

    pub fn can_become(self, next: ScrapeStatus) -> bool {
        match next {
            ScrapeStatus::InProgress => true,
            ScrapeStatus::Completed | ScrapeStatus::Failed => self == ScrapeStatus::InProgress,
            ScrapeStatus::Pending => self == ScrapeStatus::Failed,
        }
    }
}

impl std::fmt::Display for ScrapeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Database primary key of a list row. Status updates key on this, never on
/// the external [`ListId`]; mixing the two silently corrupts unrelated rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListKey(pub i64);

/// The site's own numeric list identifier (the suffix of the list URL).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListId(pub i64);

/// The site's numeric edition identifier embedded in `/ediciones/{id}/...`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TitleId(pub i64);

/// The site's volume token from `/comics/{id}/...`. Alphanumeric and
/// case-sensitive; deliberately not numeric.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VolumeId(pub String);

impl std::fmt::Display for ListId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::fmt::Display for TitleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::fmt::Display for VolumeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A list discovered on a profile page, ready to register.
#[derive(Debug, Clone)]
pub struct NewList {
    pub list_id: ListId,
    pub title: String,
    pub url: String,
    pub owner_profile: String,
}

/// A stored list row.
#[derive(Debug, Clone)]
pub struct ListRecord {
    pub key: ListKey,
    pub list_id: ListId,
    pub title: String,
    pub url: String,
    pub owner_profile: String,
    pub status: ScrapeStatus,
    pub last_scraped_at: Option<String>,
}

/// A title resolved from a volume's parent-title link.
#[derive(Debug, Clone)]
pub struct NewTitle {
    pub title_id: TitleId,
    pub display_name: String,
    pub url: String,
}

/// A volume discovered on a list page.
#[derive(Debug, Clone)]
pub struct NewVolume {
    pub volume_id: VolumeId,
    pub title_id: TitleId,
    pub url: String,
}

/// One logical write, dispatched per variant by
/// [`crate::store::persist_item`] under the retry layer.
#[derive(Debug, Clone)]
pub enum Item {
    List(NewList),
    Title(NewTitle),
    Volume(NewVolume),
    Membership {
        list: ListKey,
        title: TitleId,
        position: Option<i64>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditOutcome {
    Started,
    Success,
    Failed,
}

impl AuditOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditOutcome::Started => "started",
            AuditOutcome::Success => "success",
            AuditOutcome::Failed => "failed",
        }
    }
}

/// Append-only record of one attempted operation. A retried operation that
/// exhausts its attempts still produces a single `failed` entry.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub actor: &'static str,
    pub operation: &'static str,
    pub entity_id: String,
    pub outcome: AuditOutcome,
    pub error: Option<String>,
    pub duration_ms: Option<i64>,
}

impl AuditEntry {
    pub fn started(actor: &'static str, operation: &'static str, entity_id: String) -> Self {
        Self {
            actor,
            operation,
            entity_id,
            outcome: AuditOutcome::Started,
            error: None,
            duration_ms: None,
        }
    }

    pub fn success(actor: &'static str, operation: &'static str, entity_id: String) -> Self {
        Self {
            actor,
            operation,
            entity_id,
            outcome: AuditOutcome::Success,
            error: None,
            duration_ms: None,
        }
    }

    pub fn failed(
        actor: &'static str,
        operation: &'static str,
        entity_id: String,
        error: String,
    ) -> Self {
        Self {
            actor,
            operation,
            entity_id,
            outcome: AuditOutcome::Failed,
            error: Some(error),
            duration_ms: None,
        }
    }

    pub fn with_duration_ms(mut self, duration_ms: i64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_progress_is_enterable_from_any_state() {
        for from in [
            ScrapeStatus::Pending,
            ScrapeStatus::InProgress,
            ScrapeStatus::Completed,
            ScrapeStatus::Failed,
        ] {
            assert!(from.can_become(ScrapeStatus::InProgress), "from {from}");
        }
    }

    #[test]
    fn pending_cannot_jump_straight_to_completed() {
        assert!(!ScrapeStatus::Pending.can_become(ScrapeStatus::Completed));
        assert!(ScrapeStatus::InProgress.can_become(ScrapeStatus::Completed));
    }

    #[test]
    fn only_failed_returns_to_pending() {
        assert!(ScrapeStatus::Failed.can_become(ScrapeStatus::Pending));
        assert!(!ScrapeStatus::Completed.can_become(ScrapeStatus::Pending));
        assert!(!ScrapeStatus::InProgress.can_become(ScrapeStatus::Pending));
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            ScrapeStatus::Pending,
            ScrapeStatus::InProgress,
            ScrapeStatus::Completed,
            ScrapeStatus::Failed,
        ] {
            assert_eq!(ScrapeStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ScrapeStatus::parse("unknown"), None);
    }
}
