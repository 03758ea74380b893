// Thin HTTP host over the pipeline API

pub mod api;
pub mod server;
