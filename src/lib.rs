pub mod actor;
pub mod bot;
pub mod command;
pub mod commands;
pub mod config;
pub mod entity;
pub mod permission;
pub mod player;
pub mod queue;
pub mod resolver;
pub mod sink;
pub mod source;
pub mod transport;
