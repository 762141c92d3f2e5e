//! Query parameters for the collections data plane.

use serde::Deserialize;
use utoipa::IntoParams;

use crate::collections::{filter::parse_filter, sql::parse_sort, ListOptions, DEFAULT_PER_PAGE};
use crate::errors::{Error, Result};

#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    /// 1-based page number (default: 1)
    pub page: Option<i64>,
    /// Page size (default: 30)
    pub per_page: Option<i64>,
    /// Comma list of columns, `-` prefix for descending
    pub sort: Option<String>,
    /// Filter expression, e.g. `status = "open" AND votes > 3`
    pub filter: Option<String>,
    /// Case-insensitive substring search across text columns
    pub search: Option<String>,
    /// Comma list of relationship fields to attach
    pub expand: Option<String>,
}

impl ListParams {
    pub fn into_options(self) -> Result<ListOptions> {
        let filter = match self.filter.as_deref().map(str::trim) {
            Some("") | None => None,
            Some(text) => Some(parse_filter(text).map_err(|e| Error::BadRequest {
                message: format!("invalid filter: {e}"),
                field: e.column,
            })?),
        };
        Ok(ListOptions {
            page: self.page.unwrap_or(1),
            per_page: self.per_page.unwrap_or(DEFAULT_PER_PAGE),
            sort: self.sort.as_deref().map(parse_sort).unwrap_or_default(),
            filter,
            search: self.search.filter(|s| !s.trim().is_empty()),
            expand: parse_expand(self.expand.as_deref()),
        })
    }
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct GetParams {
    /// Comma list of relationship fields to attach
    pub expand: Option<String>,
}

impl GetParams {
    pub fn expand_list(&self) -> Vec<String> {
        parse_expand(self.expand.as_deref())
    }
}

pub fn parse_expand(input: Option<&str>) -> Vec<String> {
    input
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Batch request body.
#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct BatchRequest {
    pub operations: Vec<crate::collections::BatchOperation>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_in_page_and_per_page() {
        let opts = ListParams::default().into_options().unwrap();
        assert_eq!(opts.page, 1);
        assert_eq!(opts.per_page, DEFAULT_PER_PAGE);
        assert!(opts.filter.is_none());
        assert!(opts.sort.is_empty());
        assert!(opts.expand.is_empty());
    }

    #[test]
    fn filter_errors_surface_the_offending_column() {
        let params = ListParams {
            filter: Some("count >".to_string()),
            ..ListParams::default()
        };
        let err = params.into_options().unwrap_err();
        match err {
            Error::BadRequest { field, message } => {
                assert_eq!(field.as_deref(), Some("count"));
                assert!(message.contains("offset"));
            }
            other => panic!("expected BadRequest, got {other:?}"),
        }
    }

    #[test]
    fn expand_lists_split_and_trim() {
        assert_eq!(parse_expand(Some("author, tags ,")), vec!["author", "tags"]);
        assert!(parse_expand(None).is_empty());
        assert!(parse_expand(Some("  ")).is_empty());
    }

    #[test]
    fn blank_filter_and_search_are_ignored() {
        let params = ListParams {
            filter: Some("  ".to_string()),
            search: Some("".to_string()),
            ..ListParams::default()
        };
        let opts = params.into_options().unwrap();
        assert!(opts.filter.is_none());
        assert!(opts.search.is_none());
    }
}
