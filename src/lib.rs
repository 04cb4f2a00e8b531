//! Trust and access-control core of the meeting-room booking backend:
//! bearer tokens, password reset tokens and per-client admission control.

pub mod app;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod health;
pub mod mail;
pub mod ratelimit;
pub mod reset;
pub mod state;
