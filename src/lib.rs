pub mod aggregate;
pub mod browse;
pub mod builder;
pub mod cli;
pub mod config;
pub mod db;
pub mod detect;
pub mod diff;
pub mod error;
pub mod ingest;
pub mod jobs;
pub mod model;
pub mod parsers;
pub mod store;
pub mod tree;
