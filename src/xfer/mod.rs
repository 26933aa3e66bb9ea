//! Copy, move and delete transfers
//!
//! A transfer is one engine job that drives [`XferPhase`] from `Initial` to
//! `Completed`, reporting each step to a UI callback and asking a policy
//! callback when an item fails or a target already exists.

mod collect;
mod options;
mod phase;
mod progress;
mod transfer;

pub use collect::XferItem;
pub use options::{ErrorMode, OverwriteMode, ProgressAction, XferDecision, XferOptions, XferRequest};
pub use phase::XferPhase;
pub use progress::{progress_channel, PolicyCallback, ProgressCallback, XferProgressInfo, XferStatus};
pub(crate) use transfer::{validate, XferJob};
