pub mod config;
pub mod docs;
pub mod error;
pub mod response;

pub mod auth;
pub mod file_processing;
pub mod handlers;
pub mod jobs;
pub mod models;
pub mod routes;
pub mod scanner;
pub mod storage;
