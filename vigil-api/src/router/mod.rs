pub mod analysis;
pub mod collector;
pub mod monitoring;
pub mod routes;
