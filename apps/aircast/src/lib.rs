pub mod config;
pub mod controller;
pub mod engine;
pub mod media;
pub mod protocol;
pub mod relay;
