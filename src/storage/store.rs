use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Utc};
use duckdb::types::Type;
use duckdb::{Connection, Row};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// Format used to bind timestamps as query parameters.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Format used to read back `strftime(col, '%Y-%m-%d %H:%M:%S.%f')` output.
const TIMESTAMP_PARSE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Convert an instant to wall-clock time in the configured offset.
///
/// All stored timestamps and day boundaries use this local time.
pub fn to_local(now: DateTime<Utc>, offset: FixedOffset) -> NaiveDateTime {
    now.with_timezone(&offset).naive_local()
}

pub fn format_ts(ts: NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

fn ts_column(row: &Row<'_>, idx: usize) -> Result<NaiveDateTime, duckdb::Error> {
    let raw: String = row.get(idx)?;
    NaiveDateTime::parse_from_str(&raw, TIMESTAMP_PARSE_FORMAT)
        .map_err(|e| duckdb::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn date_column(row: &Row<'_>, idx: usize) -> Result<NaiveDate, duckdb::Error> {
    let raw: String = row.get(idx)?;
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
        .map_err(|e| duckdb::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// A tracked website as seen by the ingestion and statistics paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Website {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub owner_id: i64,
    pub is_public: bool,
    /// Creation time; the start of the "total" window.
    pub start_time: NaiveDateTime,
}

/// Unique key of a visit record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VisitKey {
    pub website_id: i64,
    pub ip: String,
    pub day: NaiveDate,
}

/// One visitor IP's activity on one website during one calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VisitRecord {
    pub website_id: i64,
    pub ip: String,
    pub day: NaiveDate,
    pub first_seen: NaiveDateTime,
    pub last_seen: NaiveDateTime,
    pub hit_count: u64,
    pub referrer: String,
    pub base_referrer: Option<String>,
    pub search_engine: Option<String>,
    pub keyword: Option<String>,
    pub location: String,
    pub screen_color: i32,
    pub screen_size: String,
    pub browser: String,
    pub os: String,
    pub language: String,
    pub region: Option<String>,
    pub isp: Option<String>,
    pub revisit_streak: u32,
}

impl VisitRecord {
    pub fn key(&self) -> VisitKey {
        VisitKey {
            website_id: self.website_id,
            ip: self.ip.clone(),
            day: self.day,
        }
    }
}

/// DuckDB-backed store for websites and visit records.
///
/// Each method takes the connection lock for a single statement. The keyed
/// write primitives (`record_hit`, `insert_visit`) are individually atomic;
/// composing them into a find-or-create is the recorder's job.
#[derive(Clone)]
pub struct VisitStore {
    conn: Arc<Mutex<Connection>>,
}

impl VisitStore {
    pub const fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Open a database file (or an in-memory database when `path` is `None`)
    /// and bring its schema up to date.
    pub fn open(path: Option<&Path>) -> Result<Self, duckdb::Error> {
        let conn = match path {
            Some(p) => Connection::open(p)?,
            None => Connection::open_in_memory()?,
        };
        crate::storage::migrations::run_migrations(&conn)?;
        Ok(Self::new(Arc::new(Mutex::new(conn))))
    }

    /// Returns a reference to the DuckDB connection for query access.
    pub const fn conn(&self) -> &Arc<Mutex<Connection>> {
        &self.conn
    }

    /// Insert or refresh a website row.
    pub fn register_website(&self, website: &Website) -> Result<(), duckdb::Error> {
        self.conn.lock().execute(
            "INSERT INTO websites (id, name, url, owner_id, is_public, start_time)
             VALUES (?, ?, ?, ?, ?, CAST(? AS TIMESTAMP))
             ON CONFLICT (id) DO UPDATE SET
                name = excluded.name,
                url = excluded.url,
                owner_id = excluded.owner_id,
                is_public = excluded.is_public,
                start_time = excluded.start_time",
            duckdb::params![
                website.id,
                website.name,
                website.url,
                website.owner_id,
                website.is_public,
                format_ts(website.start_time),
            ],
        )?;
        Ok(())
    }

    pub fn find_website(&self, id: i64) -> Result<Option<Website>, duckdb::Error> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, name, url, owner_id, is_public, strftime(start_time, '%Y-%m-%d %H:%M:%S.%f')
             FROM websites WHERE id = ?",
        )?;
        let mut rows = stmt.query(duckdb::params![id])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        Ok(Some(Website {
            id: row.get(0)?,
            name: row.get(1)?,
            url: row.get(2)?,
            owner_id: row.get(3)?,
            is_public: row.get(4)?,
            start_time: ts_column(row, 5)?,
        }))
    }

    pub fn find_visit(&self, key: &VisitKey) -> Result<Option<VisitRecord>, duckdb::Error> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT website_id, ip, CAST(day AS VARCHAR),
                    strftime(first_seen, '%Y-%m-%d %H:%M:%S.%f'),
                    strftime(last_seen, '%Y-%m-%d %H:%M:%S.%f'),
                    hit_count, referrer, base_referrer, search_engine, keyword,
                    location, screen_color, screen_size, browser, os, language,
                    region, isp, revisit_streak
             FROM visits
             WHERE website_id = ? AND ip = ? AND day = CAST(? AS DATE)",
        )?;
        let mut rows = stmt.query(duckdb::params![
            key.website_id,
            key.ip,
            key.day.to_string()
        ])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        Ok(Some(VisitRecord {
            website_id: row.get(0)?,
            ip: row.get(1)?,
            day: date_column(row, 2)?,
            first_seen: ts_column(row, 3)?,
            last_seen: ts_column(row, 4)?,
            hit_count: row.get(5)?,
            referrer: row.get(6)?,
            base_referrer: row.get(7)?,
            search_engine: row.get(8)?,
            keyword: row.get(9)?,
            location: row.get(10)?,
            screen_color: row.get(11)?,
            screen_size: row.get(12)?,
            browser: row.get(13)?,
            os: row.get(14)?,
            language: row.get(15)?,
            region: row.get(16)?,
            isp: row.get(17)?,
            revisit_streak: row.get(18)?,
        }))
    }

    /// Count one more hit on an existing record and advance its last-seen time.
    ///
    /// Returns `false` when no record exists for `key`. Last-seen never moves
    /// backwards if hits arrive out of order.
    pub fn record_hit(&self, key: &VisitKey, seen_at: NaiveDateTime) -> Result<bool, duckdb::Error> {
        let updated = self.conn.lock().execute(
            "UPDATE visits
             SET hit_count = hit_count + 1,
                 last_seen = GREATEST(last_seen, CAST(? AS TIMESTAMP))
             WHERE website_id = ? AND ip = ? AND day = CAST(? AS DATE)",
            duckdb::params![
                format_ts(seen_at),
                key.website_id,
                key.ip,
                key.day.to_string()
            ],
        )?;
        Ok(updated > 0)
    }

    /// Insert a new record unless one already exists for its key.
    ///
    /// Returns `false` if the key was already taken, which means a concurrent
    /// beacon created the row first.
    pub fn insert_visit(&self, record: &VisitRecord) -> Result<bool, duckdb::Error> {
        let inserted = self.conn.lock().execute(
            "INSERT INTO visits (website_id, ip, day, first_seen, last_seen, hit_count,
                referrer, base_referrer, search_engine, keyword, location, screen_color,
                screen_size, browser, os, language, region, isp, revisit_streak)
             VALUES (?, ?, CAST(? AS DATE), CAST(? AS TIMESTAMP), CAST(? AS TIMESTAMP), ?,
                ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (website_id, ip, day) DO NOTHING",
            duckdb::params![
                record.website_id,
                record.ip,
                record.day.to_string(),
                format_ts(record.first_seen),
                format_ts(record.last_seen),
                i64::try_from(record.hit_count).unwrap_or(i64::MAX),
                record.referrer,
                record.base_referrer,
                record.search_engine,
                record.keyword,
                record.location,
                record.screen_color,
                record.screen_size,
                record.browser,
                record.os,
                record.language,
                record.region,
                record.isp,
                i64::from(record.revisit_streak),
            ],
        )?;
        Ok(inserted > 0)
    }

    /// Revisit streak of the record for `(website_id, ip)` on `day`, if any.
    pub fn streak_on(
        &self,
        website_id: i64,
        ip: &str,
        day: NaiveDate,
    ) -> Result<Option<u32>, duckdb::Error> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT revisit_streak FROM visits
             WHERE website_id = ? AND ip = ? AND day = CAST(? AS DATE)",
        )?;
        let mut rows = stmt.query(duckdb::params![website_id, ip, day.to_string()])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    /// Number of stored visit records for a website.
    pub fn visit_count(&self, website_id: i64) -> Result<u64, duckdb::Error> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT COUNT(*) FROM visits WHERE website_id = ?")?;
        stmt.query_row(duckdb::params![website_id], |row| row.get(0))
    }
}
