pub mod breakdowns;
pub mod metrics;
pub mod timeseries;
pub mod windows;
