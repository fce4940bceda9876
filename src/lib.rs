pub mod categorize;
pub mod config;
pub mod db;
pub mod gmail;
pub mod ledger;
pub mod normalize;
pub mod output;
pub mod parsing;
pub mod server;
pub mod sync;
