//! Shared pagination types for admin list endpoints.
//!
//! Admin endpoints use offset pagination with `skip` and `limit`; the
//! collections data plane has its own `page`/`perPage` envelope.

use serde::Deserialize;
use serde_with::{serde_as, DisplayFromStr};
use utoipa::{IntoParams, ToSchema};

/// Default number of items to return per page.
pub const DEFAULT_LIMIT: i64 = 50;

/// Maximum number of items that can be requested per page.
pub const MAX_LIMIT: i64 = 200;

#[serde_as]
#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
pub struct Pagination {
    /// Number of items to skip (default: 0)
    #[param(default = 0, minimum = 0)]
    #[serde_as(as = "Option<DisplayFromStr>")]
    pub skip: Option<i64>,

    /// Maximum number of items to return (default: 50, max: 200)
    #[param(default = 50, minimum = 1, maximum = 200)]
    #[serde_as(as = "Option<DisplayFromStr>")]
    pub limit: Option<i64>,
}

impl Pagination {
    #[inline]
    pub fn skip(&self) -> i64 {
        self.skip.unwrap_or(0).max(0)
    }

    #[inline]
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_clamp_to_bounds() {
        let p = Pagination {
            skip: Some(-3),
            limit: Some(0),
        };
        assert_eq!(p.skip(), 0);
        assert_eq!(p.limit(), 1);

        let p = Pagination {
            skip: None,
            limit: Some(10_000),
        };
        assert_eq!(p.limit(), MAX_LIMIT);

        let p = Pagination::default();
        assert_eq!(p.limit(), DEFAULT_LIMIT);
    }
}
