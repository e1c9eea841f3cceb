pub mod config;
pub mod domain;
pub mod error;
pub mod ini;
pub mod logging;
pub mod output;
pub mod refresh;
pub mod scan;
pub mod store;
pub mod task;
pub mod zenodo;
