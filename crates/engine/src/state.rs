//! Per-target build state

use kiln_graph::Label;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

/// Where a target is in its build.
///
/// `Unresolved → Pending → Building → {Succeeded | Failed | CacheHit}`. A
/// target whose dependency fails goes straight from `Unresolved` to
/// `Failed`; a cancelled build may fail targets from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum BuildState {
    /// Waiting for dependencies
    Unresolved = 0,
    /// Ready and queued
    Pending = 1,
    /// Claimed by a worker
    Building = 2,
    /// Built by running its action
    Succeeded = 3,
    /// Not built
    Failed = 4,
    /// Served from the cache
    CacheHit = 5,
}

impl BuildState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Unresolved,
            1 => Self::Pending,
            2 => Self::Building,
            3 => Self::Succeeded,
            5 => Self::CacheHit,
            _ => Self::Failed,
        }
    }

    /// Whether no further transition can happen.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::CacheHit)
    }

    /// Whether the target's outputs are available.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Succeeded | Self::CacheHit)
    }
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unresolved => "unresolved",
            Self::Pending => "pending",
            Self::Building => "building",
            Self::Succeeded => "built",
            Self::Failed => "failed",
            Self::CacheHit => "cached",
        })
    }
}

/// A [`BuildState`] shared between workers.
#[derive(Debug)]
pub(crate) struct AtomicState(AtomicU8);

impl AtomicState {
    pub(crate) const fn new() -> Self {
        Self(AtomicU8::new(BuildState::Unresolved as u8))
    }

    pub(crate) fn load(&self) -> BuildState {
        BuildState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move from `from` to `to`; false if another thread got there first.
    pub(crate) fn transition(&self, from: BuildState, to: BuildState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Move to `to` from any non-terminal state.
    pub(crate) fn fail_if_unfinished(&self) -> bool {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (!BuildState::from_u8(current).is_terminal()).then_some(BuildState::Failed as u8)
            })
            .is_ok()
    }
}

/// Why a target ended in [`BuildState::Failed`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "detail")]
pub enum FailureReason {
    /// The action failed
    Action(String),
    /// The action exceeded its timeout
    TimedOut(#[serde(with = "kiln_cache::serde_secs")] Duration),
    /// A dependency failed
    DependencyFailed(Label),
    /// The build was cancelled or aborted before the target finished
    Cancelled,
    /// The target's inputs could not be fingerprinted
    Fingerprint(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Action(message) => write!(f, "{message}"),
            Self::TimedOut(limit) => write!(f, "timed out after {}s", limit.as_secs_f64()),
            Self::DependencyFailed(label) => write!(f, "dependency {label} failed"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::Fingerprint(message) => write!(f, "cannot fingerprint inputs: {message}"),
        }
    }
}
