pub mod classify;
pub mod geo;
pub mod handler;
pub mod recorder;
pub mod reference;
pub mod referrer;
