use crate::ingest::geo::GeoTable;
use crate::ingest::referrer::RuleSet;
use arc_swap::ArcSwap;
use std::sync::Arc;

/// Read-only reference tables shared by every ingestion call.
///
/// Each table is an immutable snapshot behind an `ArcSwap`: readers take a
/// cheap `Arc` without locking, and a reload swaps the whole table in one
/// store. A beacon in flight keeps the snapshot it started with.
pub struct ReferenceData {
    geo: ArcSwap<GeoTable>,
    rules: ArcSwap<RuleSet>,
}

impl ReferenceData {
    pub fn new(geo: GeoTable, rules: RuleSet) -> Self {
        Self {
            geo: ArcSwap::from_pointee(geo),
            rules: ArcSwap::from_pointee(rules),
        }
    }

    /// Current geo range table snapshot.
    pub fn geo(&self) -> Arc<GeoTable> {
        self.geo.load_full()
    }

    /// Current referrer rule snapshot.
    pub fn rules(&self) -> Arc<RuleSet> {
        self.rules.load_full()
    }

    pub fn replace_geo(&self, geo: GeoTable) {
        tracing::info!(rows = geo.len(), "Geo range table replaced");
        self.geo.store(Arc::new(geo));
    }

    pub fn replace_rules(&self, rules: RuleSet) {
        tracing::info!(rules = rules.len(), "Referrer rules replaced");
        self.rules.store(Arc::new(rules));
    }
}

impl Default for ReferenceData {
    fn default() -> Self {
        Self::new(GeoTable::default(), RuleSet::new(RuleSet::default_rules()))
    }
}
