//! Thin HTTP layer over the dispatch pipeline: tag listing, subscribe /
//! unsubscribe / sync requests, and a health check.

pub mod routes;
pub mod state;
