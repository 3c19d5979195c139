//! Deferred deletion of superseded artifacts, reconciled with asynchronous renditions.
//!
//! Per artifact: `NoPendingWork -> Flagged(expected) -> {Cleared, DeferredPayloadStored}
//! -> NoPendingWork`. State lives in a [`warden_db::CleanupStateStore`] so completion
//! callbacks handled by another process see the same record.

pub mod collaborators;
pub mod scheduler;

pub use collaborators::{
    CleanupDispatcher, DispatchReport, RenditionProbe, StorageCleanupDispatcher,
    StorageRenditionProbe,
};
pub use scheduler::{CleanupAction, CleanupScheduler, CleanupWorker, SweepReport};
