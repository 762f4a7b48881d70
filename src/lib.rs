pub mod api;
pub mod bulk;
pub mod config;
pub mod keygen;
pub mod models;
pub mod pipeline;
pub mod redirect;
pub mod server;
pub mod storage;
