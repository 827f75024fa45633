//! Kubernetes adapter

pub mod client;
pub mod route;

pub use client::KubeClusterClient;
