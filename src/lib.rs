pub mod api;
pub mod cache;
pub mod config;
pub mod contracts;
pub mod database;
pub mod erasure;
pub mod error;
pub mod files;
pub mod history;
pub mod hostdb;
pub mod ledger;
pub mod logging;
pub mod maintenance;
pub mod monitor;
pub mod persist;
pub mod ratelimit;
pub mod renewal;
pub mod renter;
pub mod repair;
pub mod retry;
pub mod settings;
pub mod stopper;
pub mod test_utils;
pub mod transport;
pub mod types;
pub mod wallet;
