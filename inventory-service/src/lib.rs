pub mod api;
pub mod chaos;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod ledger;
pub mod models;
pub mod product_client;
pub mod reconciler;
pub mod schema;
