pub mod backend;
pub mod booking_flow;
pub mod query_cache;
