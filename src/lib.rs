// src/lib.rs

//! xspider Library
//!
//! Follow-graph crawling from seed accounts with credential and proxy
//! rotation, and hidden-influencer ranking over the collected graph.

pub mod error;
pub mod graph;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;
