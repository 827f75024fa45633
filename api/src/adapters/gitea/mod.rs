//! Gitea adapter

pub mod client;

pub use client::GiteaClientImpl;
