pub mod app;
pub mod attachments;
pub mod chat_stream;
pub mod config;
pub mod conversation;
pub mod event;
pub mod export;
pub mod gate;
pub mod mention;
pub mod message;
pub mod mode;
pub mod reducer;
pub mod session;
pub mod sse;
