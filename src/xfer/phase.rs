//! Transfer phases
//!
//! Phases only move forward. The per-item phases form a loop that repeats
//! once per collected item; they share one rank so the observed rank
//! sequence of a transfer never decreases. Any phase may jump straight to
//! [`XferPhase::Completed`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Phase of a transfer, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum XferPhase {
    /// Nothing done yet
    #[default]
    Initial,
    /// Expanding sources into the full item list
    Collecting,
    /// Verifying target directories and free space
    CheckingDestination,
    /// Totals known, about to process items
    ReadyToGo,
    /// Opening the current source
    OpenSource,
    /// Opening or creating the current target
    OpenTarget,
    /// Copying bytes of the current file
    Copying,
    /// Renaming the current item in place
    Moving,
    /// Removing the current item
    Deleting,
    /// Current item done (or skipped)
    FileCompleted,
    /// Removing moved sources, closing up
    Cleanup,
    /// Terminal phase, reached on success, error or cancel
    Completed,
}

impl XferPhase {
    /// Position in the phase order; per-item phases share a rank
    pub fn rank(self) -> u8 {
        match self {
            Self::Initial => 0,
            Self::Collecting => 1,
            Self::CheckingDestination => 2,
            Self::ReadyToGo => 3,
            Self::OpenSource
            | Self::OpenTarget
            | Self::Copying
            | Self::Moving
            | Self::Deleting
            | Self::FileCompleted => 4,
            Self::Cleanup => 5,
            Self::Completed => 6,
        }
    }

    /// Whether this phase belongs to the per-item loop
    pub fn is_per_item(self) -> bool {
        self.rank() == 4
    }

    /// Whether `next` is a legal successor of `self`
    pub fn can_advance_to(self, next: XferPhase) -> bool {
        use XferPhase::*;

        if next == Completed {
            return self != Completed;
        }
        match (self, next) {
            (Initial, Collecting) => true,
            (Collecting, CheckingDestination) => true,
            (CheckingDestination, ReadyToGo) => true,
            (ReadyToGo | FileCompleted, OpenSource | Moving | Deleting) => true,
            // Rename failed; fall back to copying
            (Moving, OpenSource) => true,
            (OpenSource, OpenTarget | FileCompleted) => true,
            (OpenTarget, Copying | FileCompleted) => true,
            (Copying | Moving | Deleting, FileCompleted) => true,
            (ReadyToGo | FileCompleted, Cleanup) => true,
            _ => false,
        }
    }
}

impl fmt::Display for XferPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initial => "initial",
            Self::Collecting => "collecting",
            Self::CheckingDestination => "checking destination",
            Self::ReadyToGo => "ready",
            Self::OpenSource => "opening source",
            Self::OpenTarget => "opening target",
            Self::Copying => "copying",
            Self::Moving => "moving",
            Self::Deleting => "deleting",
            Self::FileCompleted => "file completed",
            Self::Cleanup => "cleaning up",
            Self::Completed => "completed",
        };
        f.write_str(name)
    }
}
