pub mod filters;

use crate::api::models::{CallRecord, GlobalStats};
use crate::settings::UserSettings;
use filters::FilterState;

pub const PAGE_SIZE: usize = 20;

/// The single state container behind every rendered view.
///
/// All mutation goes through the managers; render functions only ever read.
/// The rendered call table is always `filtered_calls()` — a deterministic
/// projection of `calls`, the search term and the filter state.
#[derive(Debug)]
pub struct DashboardState {
    pub calls: Vec<CallRecord>,
    pub total_calls: u64,
    pub offset: usize,
    pub has_more: bool,
    pub stats: Option<GlobalStats>,
    pub search_term: String,
    pub filters: FilterState,
    pub settings: UserSettings,
    /// Set when the last fetch failed; rendered as an inline error row.
    pub fetch_error: Option<String>,
}

impl DashboardState {
    pub fn new(settings: UserSettings) -> Self {
        Self {
            calls: Vec::new(),
            total_calls: 0,
            offset: 0,
            has_more: true,
            stats: None,
            search_term: String::new(),
            filters: FilterState::default(),
            settings,
            fetch_error: None,
        }
    }

    /// Replace (or extend, when paging) the call list from a fetched page.
    pub fn absorb_page(
        &mut self,
        calls: Vec<CallRecord>,
        total: u64,
        stats: Option<GlobalStats>,
        append: bool,
    ) {
        if append {
            self.calls.extend(calls);
        } else {
            self.calls = calls;
        }
        self.total_calls = if append {
            self.total_calls.max(total)
        } else {
            total.max(self.calls.len() as u64)
        };
        if stats.is_some() {
            self.stats = stats;
        }
        self.has_more = (self.calls.len() as u64) < self.total_calls;
        self.offset = self.calls.len();
        self.fetch_error = None;
    }

    pub fn set_search_term(&mut self, term: &str) {
        self.search_term = term.trim().to_lowercase();
    }

    /// The filter+search projection the table renders from.
    pub fn filtered_calls(&self) -> Vec<&CallRecord> {
        self.filters.apply(&self.calls, &self.search_term)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: i64) -> CallRecord {
        serde_json::from_value(serde_json::json!({ "id": id })).unwrap()
    }

    #[test]
    fn test_absorb_replaces_then_appends() {
        let mut state = DashboardState::new(UserSettings::default());

        state.absorb_page(vec![call(1), call(2)], 3, None, false);
        assert_eq!(state.calls.len(), 2);
        assert_eq!(state.offset, 2);
        assert!(state.has_more);

        state.absorb_page(vec![call(3)], 3, None, true);
        assert_eq!(state.calls.len(), 3);
        assert!(!state.has_more);
    }

    #[test]
    fn test_absorb_clears_fetch_error() {
        let mut state = DashboardState::new(UserSettings::default());
        state.fetch_error = Some("boom".to_string());
        state.absorb_page(vec![call(1)], 1, None, false);
        assert!(state.fetch_error.is_none());
    }

    #[test]
    fn test_projection_is_deterministic() {
        let mut state = DashboardState::new(UserSettings::default());
        state.absorb_page(vec![call(1), call(2), call(3)], 3, None, false);

        let a: Vec<i64> = state.filtered_calls().iter().map(|c| c.id).collect();
        let b: Vec<i64> = state.filtered_calls().iter().map(|c| c.id).collect();
        assert_eq!(a, b);
        assert_eq!(a, vec![1, 2, 3]);
    }
}
