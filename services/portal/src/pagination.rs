//! Pagination and filter-state codec.
//!
//! Translates query parameters into typed filter state for pipeline
//! construction and renders page numbers back out as a bounded window with
//! ellipsis truncation for long ranges.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::pipeline::FilterableField;

/// Dropdown value meaning "All". A literal space, distinct from an absent
/// parameter, so a form round-trip can tell "cleared" from "never set".
pub const ALL_SENTINEL: &str = " ";

/// Decoded request state for a details view.
#[derive(Debug, Clone, Default)]
pub struct QueryState {
    pub page: u64,
    pub search: Option<String>,
    pub group_by: Option<String>,
    /// `(selector, value)` pairs for the active exact-match filters.
    pub filters: Vec<(String, String)>,
}

impl QueryState {
    /// Decodes raw query parameters. Missing or blank parameters mean "no
    /// filter"; the space sentinel likewise; `page` defaults to 1.
    pub fn decode(
        params: &BTreeMap<String, String>,
        filterable_fields: &[FilterableField],
    ) -> Self {
        let page = params
            .get("page")
            .and_then(|p| p.parse::<u64>().ok())
            .filter(|p| *p >= 1)
            .unwrap_or(1);
        let search = params
            .get("search")
            .map(String::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let group_by = params
            .get("groupby")
            .map(String::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let filters = filterable_fields
            .iter()
            .filter_map(|field| {
                let raw = params.get(&field.name)?;
                if raw.is_empty() || raw == ALL_SENTINEL {
                    return None;
                }
                let value = urlencoding::decode(raw)
                    .map(|v| v.into_owned())
                    .unwrap_or_else(|_| raw.clone());
                Some((field.selector.clone(), value))
            })
            .collect();
        Self {
            page,
            search,
            group_by,
            filters,
        }
    }

    pub fn is_filtered(&self) -> bool {
        !self.filters.is_empty() || self.search.is_some()
    }

    pub fn active_filter_count(&self) -> usize {
        self.filters.len() + usize::from(self.search.is_some())
    }
}

/// Encodes parameters back into a canonical query string (empty for no
/// parameters, otherwise `?`-prefixed and `&`-joined, both sides
/// percent-encoded).
pub fn to_query_string(params: &BTreeMap<String, String>) -> String {
    if params.is_empty() {
        return String::new();
    }
    let encoded: Vec<String> = params
        .iter()
        .map(|(key, value)| {
            format!(
                "{}={}",
                urlencoding::encode(key),
                urlencoding::encode(value)
            )
        })
        .collect();
    format!("?{}", encoded.join("&"))
}

fn page_href(path: &str, params: &BTreeMap<String, String>, page: u64) -> String {
    let mut params = params.clone();
    params.insert("page".to_string(), page.to_string());
    format!("{path}{}", to_query_string(&params))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum PageSlot {
    Number { number: u64, current: bool },
    Ellipsis { ellipsis: bool },
}

fn item(page: u64, current: u64) -> Option<PageSlot> {
    Some(PageSlot::Number {
        number: page,
        current: page == current,
    })
}

fn ellipsis() -> Option<PageSlot> {
    Some(PageSlot::Ellipsis { ellipsis: true })
}

/// Produces up to seven navigation slots: first page, second page or a
/// leading ellipsis, three pages centred on the current one (clamped),
/// second-to-last page or a trailing ellipsis, and the last page. Slots
/// that make no sense for a small `pages` count are omitted entirely; a
/// single page yields no slots at all.
pub fn page_window(page: u64, pages: u64) -> Vec<PageSlot> {
    let page = page.clamp(1, pages.max(1)) as i64;
    let pages = pages as i64;
    let clamped = |preferred: i64, floor: i64| -> Option<PageSlot> {
        let slot = preferred.max(floor);
        item(slot as u64, page as u64)
    };
    let slots: [Option<PageSlot>; 7] = [
        if pages > 1 {
            item(1, page as u64)
        } else {
            None
        },
        if pages > 7 && page > 4 {
            ellipsis()
        } else if pages >= 2 {
            item(2, page as u64)
        } else {
            None
        },
        if pages >= 3 {
            clamped((page - 1).min(pages - 4), 3)
        } else {
            None
        },
        if pages >= 4 {
            clamped(page.min(pages - 3), 4)
        } else {
            None
        },
        if pages >= 5 {
            clamped((page + 1).min(pages - 2), 5)
        } else {
            None
        },
        if pages > 7 && page <= pages - 4 {
            ellipsis()
        } else if pages >= 7 {
            item((pages - 1) as u64, page as u64)
        } else if pages == 6 {
            item(6, page as u64)
        } else {
            None
        },
        if pages >= 7 {
            item(pages as u64, page as u64)
        } else {
            None
        },
    ];
    slots.into_iter().flatten().collect()
}

/// UI-ready pagination block with clamped previous/next targets.
#[derive(Debug, Clone, Serialize)]
pub struct Pagination {
    pub previous: String,
    pub next: String,
    pub items: Vec<PageItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PageItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    pub current: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub ellipsis: bool,
}

pub fn paginate(
    path: &str,
    params: &BTreeMap<String, String>,
    page: u64,
    pages: u64,
) -> Pagination {
    let previous = page_href(path, params, page.saturating_sub(1).max(1));
    let next = page_href(path, params, (page + 1).min(pages.max(1)));
    let items = page_window(page, pages)
        .into_iter()
        .map(|slot| match slot {
            PageSlot::Number { number, current } => PageItem {
                number: Some(number),
                href: Some(page_href(path, params, number)),
                current,
                ellipsis: false,
            },
            PageSlot::Ellipsis { .. } => PageItem {
                number: None,
                href: None,
                current: false,
                ellipsis: true,
            },
        })
        .collect();
    Pagination {
        previous,
        next,
        items,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbers(slots: &[PageSlot]) -> Vec<i64> {
        slots
            .iter()
            .map(|slot| match slot {
                PageSlot::Number { number, .. } => *number as i64,
                PageSlot::Ellipsis { .. } => -1,
            })
            .collect()
    }

    #[test]
    fn single_page_has_no_items() {
        assert!(page_window(1, 1).is_empty());
        assert!(page_window(1, 0).is_empty());
    }

    #[test]
    fn small_ranges_list_every_page() {
        assert_eq!(numbers(&page_window(1, 2)), vec![1, 2]);
        assert_eq!(numbers(&page_window(2, 5)), vec![1, 2, 3, 4, 5]);
        assert_eq!(numbers(&page_window(3, 6)), vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(numbers(&page_window(4, 7)), vec![1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn long_range_truncates_with_ellipsis() {
        // 10 pages at page 1: leading pages, one ellipsis, last page.
        assert_eq!(numbers(&page_window(1, 10)), vec![1, 2, 3, 4, 5, -1, 10]);
        // Deep in the middle: ellipsis on both sides.
        assert_eq!(
            numbers(&page_window(10, 20)),
            vec![1, -1, 9, 10, 11, -1, 20]
        );
        // Near the end: trailing pages shown in full.
        assert_eq!(
            numbers(&page_window(19, 20)),
            vec![1, -1, 16, 17, 18, 19, 20]
        );
    }

    #[test]
    fn current_page_is_flagged() {
        let slots = page_window(3, 5);
        let current: Vec<u64> = slots
            .iter()
            .filter_map(|slot| match slot {
                PageSlot::Number { number, current: true } => Some(*number),
                _ => None,
            })
            .collect();
        assert_eq!(current, vec![3]);
    }

    #[test]
    fn previous_and_next_are_clamped() {
        let params = BTreeMap::new();
        let pagination = paginate("/view/x", &params, 1, 3);
        assert_eq!(pagination.previous, "/view/x?page=1");
        assert_eq!(pagination.next, "/view/x?page=2");
        let pagination = paginate("/view/x", &params, 3, 3);
        assert_eq!(pagination.next, "/view/x?page=3");
    }

    #[test]
    fn decode_handles_sentinel_and_defaults() {
        let fields = vec![
            FilterableField::new("Team", "accountDetails.team"),
            FilterableField::new("Kind", "kind"),
        ];
        let mut params = BTreeMap::new();
        params.insert("Team".to_string(), ALL_SENTINEL.to_string());
        params.insert("Kind".to_string(), "even%20odd".to_string());
        params.insert("search".to_string(), String::new());
        params.insert("page".to_string(), "oops".to_string());
        let state = QueryState::decode(&params, &fields);
        assert_eq!(state.page, 1);
        assert_eq!(state.search, None);
        assert_eq!(
            state.filters,
            vec![("kind".to_string(), "even odd".to_string())]
        );
        assert_eq!(state.active_filter_count(), 1);
    }

    #[test]
    fn decode_reads_group_by() {
        let mut params = BTreeMap::new();
        params.insert("groupby".to_string(), "tenant".to_string());
        let state = QueryState::decode(&params, &[]);
        assert_eq!(state.group_by.as_deref(), Some("tenant"));

        params.insert("groupby".to_string(), String::new());
        let state = QueryState::decode(&params, &[]);
        assert_eq!(state.group_by, None);
    }

    #[test]
    fn query_string_round_trip() {
        assert_eq!(to_query_string(&BTreeMap::new()), "");
        let mut params = BTreeMap::new();
        params.insert("Team".to_string(), "alpha team".to_string());
        params.insert("page".to_string(), "2".to_string());
        assert_eq!(to_query_string(&params), "?Team=alpha%20team&page=2");
    }
}
