use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;

/// One row of the IP range table: `[start, end]` inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeoRange {
    pub start: u32,
    pub end: u32,
    pub region: String,
    pub isp: String,
}

impl GeoRange {
    pub fn new(start: u32, end: u32, region: &str, isp: &str) -> Self {
        Self {
            start,
            end,
            region: region.to_string(),
            isp: isp.to_string(),
        }
    }

    const fn contains(&self, ip: u32) -> bool {
        self.start <= ip && ip <= self.end
    }
}

/// Region and ISP resolved for an address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeoInfo {
    pub region: Option<String>,
    pub isp: Option<String>,
}

/// In-memory IP range table.
///
/// Rows keep the order they were loaded in. When the table is sorted by
/// `start` with no overlapping rows, lookups use binary search; otherwise they
/// scan linearly and the first row containing the address wins. Both paths
/// return the same row for non-overlapping data.
#[derive(Debug, Clone, Default)]
pub struct GeoTable {
    ranges: Vec<GeoRange>,
    disjoint_sorted: bool,
}

impl GeoTable {
    /// Build a table from rows in table order. Rows with `start > end` are dropped.
    pub fn new(ranges: Vec<GeoRange>) -> Self {
        let before = ranges.len();
        let ranges: Vec<GeoRange> = ranges.into_iter().filter(|r| r.start <= r.end).collect();
        if ranges.len() != before {
            tracing::warn!(
                dropped = before - ranges.len(),
                "Dropped geo ranges with start > end"
            );
        }
        let disjoint_sorted = ranges.windows(2).all(|w| w[0].end < w[1].start);
        if !disjoint_sorted {
            tracing::warn!(
                rows = ranges.len(),
                "Geo range table is unsorted or overlapping; using first-match linear scan"
            );
        }
        Self {
            ranges,
            disjoint_sorted,
        }
    }

    /// Load a range table from a CSV file, falling back to an empty table.
    ///
    /// A missing path, unreadable file or malformed row leaves geolocation
    /// disabled; every lookup then resolves to nothing.
    pub fn open(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };
        if !path.exists() {
            tracing::warn!(path = %path.display(), "Geo range table not found, geolocation disabled");
            return Self::default();
        }
        match Self::from_csv(path) {
            Ok(table) => {
                tracing::info!(path = %path.display(), rows = table.len(), "Geo range table loaded");
                table
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to load geo range table, geolocation disabled");
                Self::default()
            }
        }
    }

    /// Parse a CSV range table with a `start,end,region,isp` header.
    ///
    /// `start` and `end` are either dotted IPv4 addresses or their integer form.
    pub fn from_csv(path: &Path) -> Result<Self, GeoLoadError> {
        let file = std::fs::File::open(path).map_err(GeoLoadError::Io)?;
        Self::from_reader(std::io::BufReader::new(file))
    }

    pub fn from_reader<R: std::io::Read>(reader: R) -> Result<Self, GeoLoadError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut ranges = Vec::new();
        for (row_idx, result) in csv_reader.deserialize::<CsvGeoRow>().enumerate() {
            // 1-based, header on line 1
            let line = row_idx + 2;
            let row = result.map_err(GeoLoadError::Csv)?;
            let start = parse_ip_value(&row.start).ok_or_else(|| GeoLoadError::InvalidRow {
                line,
                reason: format!("invalid start address '{}'", row.start),
            })?;
            let end = parse_ip_value(&row.end).ok_or_else(|| GeoLoadError::InvalidRow {
                line,
                reason: format!("invalid end address '{}'", row.end),
            })?;
            if start > end {
                return Err(GeoLoadError::InvalidRow {
                    line,
                    reason: format!("start {start} is after end {end}"),
                });
            }
            ranges.push(GeoRange {
                start,
                end,
                region: row.region,
                isp: row.isp,
            });
        }
        Ok(Self::new(ranges))
    }

    /// Find the row containing `ip`.
    pub fn resolve(&self, ip: u32) -> Option<&GeoRange> {
        if self.disjoint_sorted {
            let idx = self.ranges.partition_point(|r| r.end < ip);
            self.ranges.get(idx).filter(|r| r.contains(ip))
        } else {
            self.ranges.iter().find(|r| r.contains(ip))
        }
    }

    /// Resolve an already-parsed address. IPv6 is never resolved.
    pub fn lookup(&self, addr: IpAddr) -> GeoInfo {
        let IpAddr::V4(v4) = addr else {
            return GeoInfo::default();
        };
        self.resolve(u32::from(v4))
            .map(|r| GeoInfo {
                region: Some(r.region.clone()).filter(|s| !s.is_empty()),
                isp: Some(r.isp.clone()).filter(|s| !s.is_empty()),
            })
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct CsvGeoRow {
    start: String,
    end: String,
    #[serde(default)]
    region: String,
    #[serde(default)]
    isp: String,
}

/// Parse either a dotted IPv4 address or a plain integer into its 32-bit form.
fn parse_ip_value(value: &str) -> Option<u32> {
    value
        .parse::<Ipv4Addr>()
        .map(u32::from)
        .ok()
        .or_else(|| value.parse::<u32>().ok())
}

#[derive(Debug)]
pub enum GeoLoadError {
    Io(std::io::Error),
    Csv(csv::Error),
    InvalidRow { line: usize, reason: String },
}

impl std::fmt::Display for GeoLoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Csv(e) => write!(f, "CSV error: {e}"),
            Self::InvalidRow { line, reason } => write!(f, "Invalid row at line {line}: {reason}"),
        }
    }
}

impl std::error::Error for GeoLoadError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> u32 {
        u32::from(s.parse::<Ipv4Addr>().unwrap())
    }

    fn sample_table() -> GeoTable {
        GeoTable::new(vec![
            GeoRange::new(ip("1.0.0.0"), ip("1.0.0.255"), "Queensland", "APNIC"),
            GeoRange::new(ip("1.0.1.0"), ip("1.0.3.255"), "Fujian", "China Telecom"),
            GeoRange::new(ip("8.8.8.0"), ip("8.8.8.255"), "California", "Google"),
        ])
    }

    #[test]
    fn test_resolve_inside_range() {
        let table = sample_table();
        let row = table.resolve(ip("1.0.2.17")).unwrap();
        assert_eq!(row.region, "Fujian");
        assert_eq!(row.isp, "China Telecom");
    }

    #[test]
    fn test_resolve_bounds_inclusive() {
        let table = sample_table();
        assert_eq!(table.resolve(ip("8.8.8.0")).unwrap().isp, "Google");
        assert_eq!(table.resolve(ip("8.8.8.255")).unwrap().isp, "Google");
        assert!(table.resolve(ip("8.8.9.0")).is_none());
    }

    #[test]
    fn test_resolve_gap_and_extremes() {
        let table = sample_table();
        assert!(table.resolve(ip("2.0.0.1")).is_none());
        assert!(table.resolve(0).is_none());
        assert!(table.resolve(u32::MAX).is_none());
    }

    #[test]
    fn test_overlapping_rows_first_in_table_order_wins() {
        let table = GeoTable::new(vec![
            GeoRange::new(ip("10.0.0.0"), ip("10.255.255.255"), "Wide", "A"),
            GeoRange::new(ip("10.1.0.0"), ip("10.1.255.255"), "Narrow", "B"),
        ]);
        assert_eq!(table.resolve(ip("10.1.2.3")).unwrap().region, "Wide");
    }

    #[test]
    fn test_unsorted_table_still_resolves() {
        let table = GeoTable::new(vec![
            GeoRange::new(ip("8.8.8.0"), ip("8.8.8.255"), "California", "Google"),
            GeoRange::new(ip("1.0.0.0"), ip("1.0.0.255"), "Queensland", "APNIC"),
        ]);
        assert_eq!(table.resolve(ip("1.0.0.9")).unwrap().region, "Queensland");
    }

    #[test]
    fn test_inverted_rows_dropped() {
        let table = GeoTable::new(vec![GeoRange::new(10, 5, "Bad", "Bad")]);
        assert!(table.is_empty());
    }

    #[test]
    fn test_lookup_ipv6_unresolved() {
        let table = sample_table();
        let info = table.lookup("2001:db8::1".parse().unwrap());
        assert_eq!(info, GeoInfo::default());
    }

    #[test]
    fn test_lookup_ipv4() {
        let table = sample_table();
        let info = table.lookup("8.8.8.8".parse().unwrap());
        assert_eq!(info.region.as_deref(), Some("California"));
        assert_eq!(info.isp.as_deref(), Some("Google"));
    }

    #[test]
    fn test_from_reader_mixed_formats() {
        let data = "start,end,region,isp\n1.0.0.0,1.0.0.255,Queensland,APNIC\n134744064,134744319,California,Google\n";
        let table = GeoTable::from_reader(data.as_bytes()).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.resolve(ip("8.8.8.8")).unwrap().region, "California");
    }

    #[test]
    fn test_from_reader_rejects_bad_address() {
        let data = "start,end,region,isp\n1.0.0.0,not-an-ip,X,Y\n";
        let err = GeoTable::from_reader(data.as_bytes()).unwrap_err();
        assert!(matches!(err, GeoLoadError::InvalidRow { line: 2, .. }));
    }

    #[test]
    fn test_from_reader_rejects_inverted_row() {
        let data = "start,end,region,isp\n1.0.0.255,1.0.0.0,X,Y\n";
        assert!(GeoTable::from_reader(data.as_bytes()).is_err());
    }

    #[test]
    fn test_open_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ranges.csv");
        std::fs::write(&path, "start,end,region,isp\n8.8.8.0,8.8.8.255,California,Google\n")
            .unwrap();
        let table = GeoTable::open(Some(&path));
        assert!(!table.is_empty());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_open_missing_file_disabled() {
        let table = GeoTable::open(Some(Path::new("/nonexistent/ranges.csv")));
        assert!(table.is_empty());
        assert!(table.resolve(ip("8.8.8.8")).is_none());
    }

    #[test]
    fn test_open_without_path() {
        assert!(GeoTable::open(None).is_empty());
    }
}
