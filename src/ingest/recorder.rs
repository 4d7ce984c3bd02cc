use crate::ingest::classify::classify;
use crate::ingest::reference::ReferenceData;
use crate::ingest::referrer::attribute;
use crate::storage::store::{to_local, VisitKey, VisitRecord, VisitStore};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Utc};
use std::net::IpAddr;
use std::sync::Arc;

/// How many times a beacon may lose the insert race before giving up.
const MAX_ATTEMPTS: u32 = 3;

const MAX_URL_LEN: usize = 2048;
const MAX_FIELD_LEN: usize = 256;

/// A single inbound pageview, as reported by the tracking pixel.
#[derive(Debug, Clone, Default)]
pub struct Beacon {
    pub website_id: i64,
    pub ip: String,
    pub referrer: String,
    pub location: String,
    pub screen_color: String,
    pub screen_size: String,
    pub user_agent: String,
    pub language: String,
}

/// What a successfully recorded beacon did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// First beacon for this (website, IP, day).
    NewVisit { revisit_streak: u32 },
    /// Same-day repeat; the existing record was bumped.
    RepeatHit,
}

#[derive(Debug)]
pub enum RecordError {
    InvalidInput(String),
    NotFound(i64),
    Storage(duckdb::Error),
    Contended { attempts: u32 },
}

impl std::fmt::Display for RecordError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidInput(msg) => write!(f, "Invalid input: {msg}"),
            Self::NotFound(id) => write!(f, "Unknown website: {id}"),
            Self::Storage(e) => write!(f, "Storage error: {e}"),
            Self::Contended { attempts } => {
                write!(f, "Visit record still contended after {attempts} attempts")
            }
        }
    }
}

impl std::error::Error for RecordError {}

impl From<duckdb::Error> for RecordError {
    fn from(e: duckdb::Error) -> Self {
        Self::Storage(e)
    }
}

/// Turns beacons into visit records.
///
/// The `(website, ip, day)` primary key is the only serialization point. A
/// beacon first tries to bump an existing record; if there is none it builds
/// a fresh one and inserts it with conflict detection. Losing that insert to
/// a concurrent beacon sends it back to the bump path.
pub struct VisitRecorder {
    store: VisitStore,
    reference: Arc<ReferenceData>,
    offset: FixedOffset,
}

impl VisitRecorder {
    pub const fn new(store: VisitStore, reference: Arc<ReferenceData>, offset: FixedOffset) -> Self {
        Self {
            store,
            reference,
            offset,
        }
    }

    pub const fn store(&self) -> &VisitStore {
        &self.store
    }

    pub fn reference(&self) -> &ReferenceData {
        &self.reference
    }

    pub const fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn record_visit(
        &self,
        beacon: &Beacon,
        now: DateTime<Utc>,
    ) -> Result<RecordOutcome, RecordError> {
        if self.store.find_website(beacon.website_id)?.is_none() {
            return Err(RecordError::NotFound(beacon.website_id));
        }

        let addr: IpAddr = beacon
            .ip
            .trim()
            .parse()
            .map_err(|_| RecordError::InvalidInput(format!("unparseable IP '{}'", beacon.ip)))?;

        let seen_at = to_local(now, self.offset);
        let key = VisitKey {
            website_id: beacon.website_id,
            ip: addr.to_string(),
            day: seen_at.date(),
        };

        self.write_visit(&key, seen_at, || self.new_record(beacon, &key, addr, seen_at))
    }

    /// Bump the record for `key`, or insert the record produced by `build`.
    ///
    /// `build` runs at most once; a record that lost the insert race is kept
    /// for the next attempt in case the competing row disappears again.
    pub(crate) fn write_visit<F>(
        &self,
        key: &VisitKey,
        seen_at: NaiveDateTime,
        mut build: F,
    ) -> Result<RecordOutcome, RecordError>
    where
        F: FnMut() -> Result<VisitRecord, RecordError>,
    {
        let mut pending: Option<VisitRecord> = None;
        for attempt in 1..=MAX_ATTEMPTS {
            if self.store.record_hit(key, seen_at)? {
                return Ok(RecordOutcome::RepeatHit);
            }

            let record = match pending.take() {
                Some(record) => record,
                None => build()?,
            };
            if self.store.insert_visit(&record)? {
                tracing::debug!(
                    website_id = key.website_id,
                    day = %key.day,
                    revisit_streak = record.revisit_streak,
                    "New visit recorded"
                );
                return Ok(RecordOutcome::NewVisit {
                    revisit_streak: record.revisit_streak,
                });
            }

            tracing::debug!(
                website_id = key.website_id,
                attempt,
                "Lost insert race, retrying as repeat hit"
            );
            pending = Some(record);
        }

        tracing::warn!(
            website_id = key.website_id,
            attempts = MAX_ATTEMPTS,
            "Visit record still contended"
        );
        Err(RecordError::Contended {
            attempts: MAX_ATTEMPTS,
        })
    }

    fn new_record(
        &self,
        beacon: &Beacon,
        key: &VisitKey,
        addr: IpAddr,
        seen_at: NaiveDateTime,
    ) -> Result<VisitRecord, RecordError> {
        let revisit_streak = self.streak_for(key.website_id, &key.ip, key.day)?;

        let referrer = sanitize_string(&beacon.referrer, MAX_URL_LEN);
        let attribution = attribute(&referrer, &self.reference.rules());
        let buckets = classify(&beacon.user_agent, &beacon.language);
        let geo = self.reference.geo().lookup(addr);

        Ok(VisitRecord {
            website_id: key.website_id,
            ip: key.ip.clone(),
            day: key.day,
            first_seen: seen_at,
            last_seen: seen_at,
            hit_count: 1,
            referrer,
            base_referrer: attribution.base_referrer,
            search_engine: attribution.search_engine,
            keyword: attribution
                .keyword
                .map(|k| sanitize_string(&k, MAX_FIELD_LEN)),
            location: sanitize_string(&beacon.location, MAX_URL_LEN),
            screen_color: parse_screen_color(&beacon.screen_color),
            screen_size: sanitize_string(&beacon.screen_size, MAX_FIELD_LEN),
            browser: buckets.browser.to_string(),
            os: buckets.os.to_string(),
            language: buckets.language.to_string(),
            region: geo.region,
            isp: geo.isp,
            revisit_streak,
        })
    }

    /// Streak continues only from a record on the immediately preceding day.
    fn streak_for(&self, website_id: i64, ip: &str, day: NaiveDate) -> Result<u32, RecordError> {
        let Some(previous_day) = day.pred_opt() else {
            return Ok(1);
        };
        let previous = self.store.streak_on(website_id, ip, previous_day)?;
        Ok(previous.map_or(1, |streak| streak.saturating_add(1)))
    }
}

fn parse_screen_color(raw: &str) -> i32 {
    raw.trim().parse().unwrap_or(0)
}

/// Sanitize a string by truncating to max length and removing control characters.
pub fn sanitize_string(input: &str, max_len: usize) -> String {
    input
        .chars()
        .filter(|c| !c.is_control())
        .take(max_len)
        .collect()
}
