pub mod api;
pub mod config;
pub mod events;
pub mod hooks;
pub mod hub;
pub mod inject;
pub mod protocol;
pub mod queue;
pub mod registry;
pub mod relay;
pub mod replay_buffer;
pub mod tool_format;
pub mod transcript;
pub mod types;
