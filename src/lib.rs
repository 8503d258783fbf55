pub mod collab;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod protocol;
pub mod rooms;
pub mod routes;
pub mod services;
pub mod state;
