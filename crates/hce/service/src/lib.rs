//! Card emulation service
//!
//! This crate wires the resolver, routing and dispatch crates together:
//! - Resolution lock domain with published snapshots ([`ResolutionEngine`])
//! - Dispatch lock domain and collaborator calls ([`HceService`])
//! - Settings persistence ([`SettingsStore`])
//! - Tokio event loop and collapsing rebuild worker ([`runtime`])

pub mod collaborators;
pub mod config;
pub mod engine;
pub mod error;
pub mod manifest;
pub mod mocks;
pub mod runtime;
pub mod service;
pub mod store;

pub use collaborators::{
    DeviceStateProvider, DisambiguationUi, EngineListener, HandlerDirectory, HandlerTransport,
    LoggingListener, ReaderLink,
};
pub use config::ServiceConfig;
pub use engine::{RebuildReport, ResolutionEngine};
pub use error::{ServiceError, ServiceResult};
pub use manifest::{read_trace, HandlerManifest, ManifestPreferences};
pub use mocks::{MockCollaborators, Prompt, TransportCall};
pub use runtime::{RuntimeHandle, ServiceEvent};
pub use service::{
    timer_request, Collaborators, HceService, PendingNotice, PreferenceChange, TimerRequest,
};
pub use store::{InMemoryStore, JsonFileStore, Settings, SettingsStore};
