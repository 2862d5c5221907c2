pub mod db;
pub mod error;
mod migrations;
pub mod prepare;
pub mod providers;
pub mod state;
pub mod types;
