//! Test doubles and fixtures for accredflow pipelines.
//!
//! This module provides:
//! - A scripted analytical engine that writes stage outputs to a store
//! - A notification channel that records publishes and injects failures
//! - An object store wrapper that injects storage faults
//! - Facility record fixtures

mod fixtures;
mod mocks;

pub use fixtures::{facility_json, fixture_as_of, sample_batch, SAMPLE_TIERS};
pub use mocks::{FaultyStore, RecordingChannel, ScriptStep, ScriptedEngine};
