//! Utility modules for the scanner

pub mod target_parser;

pub use target_parser::{expand_hosts, parse_port_range, parse_target};
