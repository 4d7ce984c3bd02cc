use duckdb::Connection;

/// SQL statement to create the websites table.
///
/// Website management lives elsewhere; this table only mirrors what the
/// ingestion and statistics paths need to look up.
pub const CREATE_WEBSITES_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS websites (
    id          BIGINT PRIMARY KEY,
    name        VARCHAR NOT NULL,
    url         VARCHAR NOT NULL,
    owner_id    BIGINT NOT NULL,
    is_public   BOOLEAN NOT NULL DEFAULT FALSE,
    start_time  TIMESTAMP NOT NULL
)
";

/// SQL statement to create the visits table.
///
/// One row per (website, visitor IP, calendar day). The primary key is the
/// uniqueness guarantee the ingestion path relies on.
pub const CREATE_VISITS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS visits (
    website_id      BIGINT NOT NULL,
    ip              VARCHAR NOT NULL,
    day             DATE NOT NULL,
    first_seen      TIMESTAMP NOT NULL,
    last_seen       TIMESTAMP NOT NULL,
    hit_count       BIGINT NOT NULL DEFAULT 1,
    referrer        VARCHAR NOT NULL DEFAULT '',
    base_referrer   VARCHAR,
    search_engine   VARCHAR,
    keyword         VARCHAR,
    location        VARCHAR NOT NULL DEFAULT '',
    screen_color    INTEGER NOT NULL DEFAULT 0,
    screen_size     VARCHAR NOT NULL DEFAULT '',
    browser         VARCHAR NOT NULL,
    os              VARCHAR NOT NULL,
    language        VARCHAR NOT NULL,
    region          VARCHAR,
    isp             VARCHAR,
    revisit_streak  INTEGER NOT NULL DEFAULT 1,
    PRIMARY KEY (website_id, ip, day)
)
";

/// Initialize the database schema.
pub fn init_schema(conn: &Connection) -> Result<(), duckdb::Error> {
    conn.execute_batch(CREATE_WEBSITES_TABLE)?;
    conn.execute_batch(CREATE_VISITS_TABLE)?;
    Ok(())
}
