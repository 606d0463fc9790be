//! `dspider`: a distributed web-scraping platform for recruitment/job-board data sources.
//!
//! See `SPEC_FULL.md` for the full module/operation specification this crate implements.

pub mod broker;
pub mod browser;
pub mod config;
pub mod context;
pub mod cookie;
pub mod document_store;
pub mod error;
pub mod extract;
pub mod http_fetcher;
pub mod master;
pub mod models;
pub mod object_store;
pub mod worker;
