//! Integration tests for Ripple-Frontier

mod crawl_tests;
mod pipeline_tests;
mod sqlite_tests;
