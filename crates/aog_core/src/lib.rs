pub mod analytics;
pub mod db;
pub mod domain;
pub mod error;
pub mod history;
pub mod legacy;
pub mod metrics;
pub mod repo;
pub mod service;
pub mod timeline;
pub mod workflow;
