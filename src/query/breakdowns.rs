use crate::query::windows::Window;
use crate::storage::store::format_ts;
use duckdb::Connection;

/// A breakdown row: dimension value + count.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct BreakdownRow {
    pub value: String,
    pub unique_visitors: u64,
    pub page_views: u64,
}

/// Available breakdown dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    SearchEngine,
    Keyword,
    BaseReferrer,
    Browser,
    Os,
    Language,
    Region,
    Isp,
    ScreenSize,
}

impl Dimension {
    const fn column_name(self) -> &'static str {
        match self {
            Self::SearchEngine => "search_engine",
            Self::Keyword => "keyword",
            Self::BaseReferrer => "base_referrer",
            Self::Browser => "browser",
            Self::Os => "os",
            Self::Language => "language",
            Self::Region => "region",
            Self::Isp => "isp",
            Self::ScreenSize => "screen_size",
        }
    }

    /// Parse the path segment used by the breakdown endpoint.
    pub fn from_path(segment: &str) -> Option<Self> {
        Some(match segment {
            "search_engine" | "search-engine" => Self::SearchEngine,
            "keyword" => Self::Keyword,
            "base_referrer" | "referrer" => Self::BaseReferrer,
            "browser" => Self::Browser,
            "os" => Self::Os,
            "language" => Self::Language,
            "region" => Self::Region,
            "isp" => Self::Isp,
            "screen_size" | "screen" => Self::ScreenSize,
            _ => return None,
        })
    }
}

/// Group a website's visits in `window` by one dimension, busiest first.
pub fn query_breakdown(
    conn: &Connection,
    website_id: i64,
    window: Window,
    dimension: Dimension,
    limit: usize,
) -> Result<Vec<BreakdownRow>, duckdb::Error> {
    let col = dimension.column_name();

    // Using format! for column name is safe here since it comes from a fixed enum
    let sql = format!(
        "SELECT COALESCE(NULLIF({col}, ''), '(unknown)') AS dim_value,
                COUNT(DISTINCT ip) AS unique_visitors,
                CAST(SUM(hit_count) AS BIGINT) AS page_views
         FROM visits
         WHERE website_id = ? AND first_seen >= CAST(? AS TIMESTAMP) AND first_seen < CAST(? AS TIMESTAMP)
         GROUP BY dim_value
         ORDER BY unique_visitors DESC, page_views DESC, dim_value
         LIMIT ?"
    );

    let mut stmt = conn.prepare(&sql)?;
    let limit_i64 = i64::try_from(limit).unwrap_or(i64::MAX);
    let rows = stmt
        .query_map(
            duckdb::params![
                website_id,
                format_ts(window.start),
                format_ts(window.end),
                limit_i64
            ],
            |row| {
                Ok(BreakdownRow {
                    value: row.get(0)?,
                    unique_visitors: row.get(1)?,
                    page_views: row.get(2)?,
                })
            },
        )?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows)
}
