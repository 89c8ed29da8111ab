//! Aggregates nmap, nikto, whatweb and curl output for a target, turns it
//! into weighted findings and a vulnerability stage, and writes a report.

pub mod cli;
pub mod config;
pub mod core;
pub mod engine;
pub mod exit;
pub mod headers;
pub mod logging;
pub mod platform;
pub mod registry;
pub mod report;
pub mod rules;
pub mod scanlog;
pub mod scanners;
pub mod scoring;
pub mod ui;
