use crate::api::models::CallRecord;
use chrono::NaiveDate;

/// The seven tags offered by the filter modal.
pub const DEFAULT_TAGS: [&str; 7] = [
    "Support",
    "Billing",
    "Technical Issue",
    "Churn Risk",
    "Sales",
    "Feedback",
    "Complaint",
];

pub const ALL_SENTIMENTS: [&str; 3] = ["positive", "neutral", "negative"];

/// Filter modal state. Defaults select everything.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterState {
    pub sentiments: Vec<String>,
    pub tags: Vec<String>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
}

impl Default for FilterState {
    fn default() -> Self {
        Self {
            sentiments: ALL_SENTIMENTS.iter().map(|s| s.to_string()).collect(),
            tags: DEFAULT_TAGS.iter().map(|s| s.to_string()).collect(),
            date_from: None,
            date_to: None,
        }
    }
}

impl FilterState {
    /// Reset to the select-everything default.
    pub fn reset(&mut self) {
        *self = FilterState::default();
    }

    /// True when `call` passes every active filter plus the search term.
    ///
    /// Search matches filename, transcript, summary or any tag,
    /// case-insensitively. Calls without tags pass the tag filter; calls
    /// without a sentiment count as neutral. Date bounds are inclusive whole
    /// days.
    pub fn matches(&self, call: &CallRecord, search_term: &str) -> bool {
        if !search_term.is_empty() {
            let hit = contains_ci(call.filename.as_deref(), search_term)
                || contains_ci(call.transcript.as_deref(), search_term)
                || contains_ci(call.summary.as_deref(), search_term)
                || call
                    .tags
                    .iter()
                    .any(|t| t.to_lowercase().contains(search_term));
            if !hit {
                return false;
            }
        }

        if !self.sentiments.contains(&call.sentiment_lower()) {
            return false;
        }

        if !self.tags.is_empty() && !call.tags.is_empty() {
            let has_match = call.tags.iter().any(|t| self.tags.contains(t));
            if !has_match {
                return false;
            }
        }

        if let Some(created) = call.created_at {
            let day = created.date_naive();
            if let Some(from) = self.date_from {
                if day < from {
                    return false;
                }
            }
            if let Some(to) = self.date_to {
                if day > to {
                    return false;
                }
            }
        }

        true
    }

    /// Project `calls` through the filters, preserving order.
    pub fn apply<'a>(&self, calls: &'a [CallRecord], search_term: &str) -> Vec<&'a CallRecord> {
        calls
            .iter()
            .filter(|c| self.matches(c, search_term))
            .collect()
    }
}

fn contains_ci(haystack: Option<&str>, needle: &str) -> bool {
    haystack
        .map(|h| h.to_lowercase().contains(needle))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(json: serde_json::Value) -> CallRecord {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_default_passes_everything() {
        let filters = FilterState::default();
        let c = call(serde_json::json!({ "id": 1 }));
        assert!(filters.matches(&c, ""));
    }

    #[test]
    fn test_search_matches_tags_and_filename() {
        let filters = FilterState::default();
        let c = call(serde_json::json!({
            "id": 1,
            "filename": "Monday_Call.mp3",
            "tags": ["Churn Risk"]
        }));
        assert!(filters.matches(&c, "monday"));
        assert!(filters.matches(&c, "churn"));
        assert!(!filters.matches(&c, "invoice"));
    }

    #[test]
    fn test_sentiment_filter_defaults_missing_to_neutral() {
        let mut filters = FilterState::default();
        filters.sentiments = vec!["positive".to_string()];
        let no_sentiment = call(serde_json::json!({ "id": 1 }));
        assert!(!filters.matches(&no_sentiment, ""));

        filters.sentiments = vec!["neutral".to_string()];
        assert!(filters.matches(&no_sentiment, ""));
    }

    #[test]
    fn test_untagged_calls_pass_tag_filter() {
        let mut filters = FilterState::default();
        filters.tags = vec!["Billing".to_string()];

        let untagged = call(serde_json::json!({ "id": 1 }));
        assert!(filters.matches(&untagged, ""));

        let other_tag = call(serde_json::json!({ "id": 2, "tags": ["Sales"] }));
        assert!(!filters.matches(&other_tag, ""));
    }

    #[test]
    fn test_date_bounds_are_inclusive_whole_days() {
        let mut filters = FilterState::default();
        filters.date_from = NaiveDate::from_ymd_opt(2025, 3, 10);
        filters.date_to = NaiveDate::from_ymd_opt(2025, 3, 10);

        let late_that_day = call(serde_json::json!({
            "id": 1,
            "created_at": "2025-03-10T23:59:00Z"
        }));
        assert!(filters.matches(&late_that_day, ""));

        let day_after = call(serde_json::json!({
            "id": 2,
            "created_at": "2025-03-11T00:01:00Z"
        }));
        assert!(!filters.matches(&day_after, ""));
    }

    #[test]
    fn test_apply_preserves_order() {
        let filters = FilterState::default();
        let calls: Vec<CallRecord> = (1..=3)
            .map(|id| call(serde_json::json!({ "id": id })))
            .collect();
        let ids: Vec<i64> = filters.apply(&calls, "").iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_reset_restores_defaults() {
        let mut filters = FilterState::default();
        filters.sentiments = vec!["negative".to_string()];
        filters.date_from = NaiveDate::from_ymd_opt(2025, 1, 1);
        filters.reset();
        assert_eq!(filters, FilterState::default());
    }
}
