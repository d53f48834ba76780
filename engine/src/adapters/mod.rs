//! Driving adapters over the supervisor facade

pub mod http;
