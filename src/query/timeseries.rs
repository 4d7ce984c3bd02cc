use chrono::{Duration, NaiveDate};
use duckdb::Connection;
use std::collections::HashMap;

/// Traffic of a single calendar day, across all websites.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DailyTotals {
    pub date: String,
    pub unique_ips: u64,
    pub page_views: u64,
}

/// One entry per calendar day for the trailing `days` days ending on `today`.
///
/// Days without any record are reported with zero counts, oldest first.
pub fn query_system_trend(
    conn: &Connection,
    days: u32,
    today: NaiveDate,
) -> Result<Vec<DailyTotals>, duckdb::Error> {
    if days == 0 {
        return Ok(Vec::new());
    }
    let first = today - Duration::days(i64::from(days) - 1);

    let mut stmt = conn.prepare(
        "SELECT CAST(day AS VARCHAR) AS bucket,
                COUNT(DISTINCT ip) AS unique_ips,
                CAST(COALESCE(SUM(hit_count), 0) AS BIGINT) AS page_views
         FROM visits
         WHERE day >= CAST(? AS DATE) AND day <= CAST(? AS DATE)
         GROUP BY day",
    )?;
    let mut by_day: HashMap<String, (u64, u64)> = HashMap::new();
    let rows = stmt.query_map(
        duckdb::params![first.to_string(), today.to_string()],
        |row| Ok((row.get::<_, String>(0)?, row.get(1)?, row.get(2)?)),
    )?;
    for row in rows {
        let (bucket, unique_ips, page_views) = row?;
        by_day.insert(bucket, (unique_ips, page_views));
    }

    Ok(first
        .iter_days()
        .take(days as usize)
        .map(|day| {
            let date = day.to_string();
            let (unique_ips, page_views) = by_day.get(&date).copied().unwrap_or((0, 0));
            DailyTotals {
                date,
                unique_ips,
                page_views,
            }
        })
        .collect())
}
