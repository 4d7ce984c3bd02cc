use crate::query::windows::{days_elapsed, online_since, Averages, Window, Windows, ONLINE_MINUTES};
use crate::storage::store::format_ts;
use chrono::NaiveDateTime;
use duckdb::Connection;

/// Unique visitors and page views within one window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct WindowCounts {
    pub unique_visitors: u64,
    pub page_views: u64,
}

/// Distinct IPs seen within the last 1, 5 and 15 minutes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct OnlineCounts {
    pub last_1_min: u64,
    pub last_5_min: u64,
    pub last_15_min: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct AverageStats {
    pub unique_visitors: Averages,
    pub page_views: Averages,
}

/// Windowed statistics for one website, computed fresh on every call.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct WindowStats {
    pub website_id: i64,
    pub generated_at: String,
    pub days_since_start: i64,
    pub today: WindowCounts,
    pub yesterday: WindowCounts,
    pub this_week: WindowCounts,
    pub last_week: WindowCounts,
    pub this_month: WindowCounts,
    pub total: WindowCounts,
    pub online: OnlineCounts,
    /// Today's visitors on the first day of their streak.
    pub new_visitors: u64,
    /// Today's visitors who also came yesterday.
    pub returning_visitors: u64,
    pub averages: AverageStats,
}

/// Compute all windows for a website. `now` and `tracking_start` are local
/// wall-clock times in the same offset the visit days were cut in.
pub fn query_window_stats(
    conn: &Connection,
    website_id: i64,
    tracking_start: NaiveDateTime,
    now: NaiveDateTime,
) -> Result<WindowStats, duckdb::Error> {
    let windows = Windows::at(now, tracking_start);

    let total = query_window_counts(conn, website_id, windows.total)?;
    let (new_visitors, returning_visitors) = query_new_vs_returning(conn, website_id, windows.today)?;

    let [one, five, fifteen] = ONLINE_MINUTES;
    let online = OnlineCounts {
        last_1_min: query_online(conn, website_id, now, one)?,
        last_5_min: query_online(conn, website_id, now, five)?,
        last_15_min: query_online(conn, website_id, now, fifteen)?,
    };

    let days = days_elapsed(tracking_start, now);

    Ok(WindowStats {
        website_id,
        generated_at: format_ts(now),
        days_since_start: days,
        today: query_window_counts(conn, website_id, windows.today)?,
        yesterday: query_window_counts(conn, website_id, windows.yesterday)?,
        this_week: query_window_counts(conn, website_id, windows.this_week)?,
        last_week: query_window_counts(conn, website_id, windows.last_week)?,
        this_month: query_window_counts(conn, website_id, windows.this_month)?,
        total,
        online,
        new_visitors,
        returning_visitors,
        averages: AverageStats {
            unique_visitors: Averages::over(total.unique_visitors, days),
            page_views: Averages::over(total.page_views, days),
        },
    })
}

/// Distinct IPs and summed hits for records first seen inside `window`.
pub fn query_window_counts(
    conn: &Connection,
    website_id: i64,
    window: Window,
) -> Result<WindowCounts, duckdb::Error> {
    let mut stmt = conn.prepare(
        "SELECT COUNT(DISTINCT ip), CAST(COALESCE(SUM(hit_count), 0) AS BIGINT) FROM visits
         WHERE website_id = ? AND first_seen >= CAST(? AS TIMESTAMP) AND first_seen < CAST(? AS TIMESTAMP)",
    )?;
    stmt.query_row(
        duckdb::params![website_id, format_ts(window.start), format_ts(window.end)],
        |row| {
            Ok(WindowCounts {
                unique_visitors: row.get(0)?,
                page_views: row.get(1)?,
            })
        },
    )
}

/// Count distinct IPs whose last hit falls in `[now - minutes, now]`.
pub fn query_online(
    conn: &Connection,
    website_id: i64,
    now: NaiveDateTime,
    minutes: i64,
) -> Result<u64, duckdb::Error> {
    let mut stmt = conn.prepare(
        "SELECT COUNT(DISTINCT ip) FROM visits
         WHERE website_id = ? AND last_seen >= CAST(? AS TIMESTAMP) AND last_seen <= CAST(? AS TIMESTAMP)",
    )?;
    stmt.query_row(
        duckdb::params![
            website_id,
            format_ts(online_since(now, minutes)),
            format_ts(now)
        ],
        |row| row.get(0),
    )
}

fn query_new_vs_returning(
    conn: &Connection,
    website_id: i64,
    today: Window,
) -> Result<(u64, u64), duckdb::Error> {
    let mut stmt = conn.prepare(
        "SELECT COUNT(*) FILTER (WHERE revisit_streak = 1),
                COUNT(*) FILTER (WHERE revisit_streak > 1)
         FROM visits
         WHERE website_id = ? AND first_seen >= CAST(? AS TIMESTAMP) AND first_seen < CAST(? AS TIMESTAMP)",
    )?;
    stmt.query_row(
        duckdb::params![website_id, format_ts(today.start), format_ts(today.end)],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
}

/// Traffic across every website, today and all time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct SystemSummary {
    pub today: WindowCounts,
    pub total: WindowCounts,
}

pub fn query_system_summary(
    conn: &Connection,
    now: NaiveDateTime,
) -> Result<SystemSummary, duckdb::Error> {
    let windows = Windows::at(now, now);

    let mut stmt = conn.prepare(
        "SELECT COUNT(DISTINCT ip), CAST(COALESCE(SUM(hit_count), 0) AS BIGINT) FROM visits
         WHERE first_seen >= CAST(? AS TIMESTAMP) AND first_seen < CAST(? AS TIMESTAMP)",
    )?;
    let today = stmt.query_row(
        duckdb::params![format_ts(windows.today.start), format_ts(windows.today.end)],
        |row| {
            Ok(WindowCounts {
                unique_visitors: row.get(0)?,
                page_views: row.get(1)?,
            })
        },
    )?;

    let mut stmt = conn.prepare(
        "SELECT COUNT(DISTINCT ip), CAST(COALESCE(SUM(hit_count), 0) AS BIGINT) FROM visits
         WHERE first_seen < CAST(? AS TIMESTAMP)",
    )?;
    let total = stmt.query_row(duckdb::params![format_ts(now)], |row| {
        Ok(WindowCounts {
            unique_visitors: row.get(0)?,
            page_views: row.get(1)?,
        })
    })?;

    Ok(SystemSummary { today, total })
}
