//! # weld
//!
//! Decision engine for just-in-time kernel fusion.
//!
//! While a queue is in fusion mode, submitted kernels are captured as
//! [`KernelRecord`]s instead of being executed. Completing the session decides
//! whether the recorded kernels can be merged into one launch and how buffers
//! shared between them are promoted into on-chip memory:
//!
//! - [`fusion::validate`] checks the launch geometry (rank, global extent,
//!   local extent).
//! - [`fusion::resolve`] folds the per-buffer promotion requests in
//!   submission order into one [`InternalizationOutcome`] per buffer.
//! - [`Reporter`] emits one [`Warning`] per fallback.
//! - [`FusionSession`] owns the lifecycle, [`FusionQueue`] drives an
//!   [`Executor`] with the resulting [`FusionDecision`].
//!
//! Every fallback is a performance downgrade only: an aborted fusion runs the
//! kernels one by one and a rejected promotion keeps the buffer in global
//! memory, so results never change.

macro_rules! rvec {
    () => {
        $crate::RVec::new()
    };
    ($($x:expr),+ $(,)?) => {
        $crate::RVec::from_iter([$($x),+])
    };
}

mod config;
mod diagnostics;
mod error;
pub mod fusion;
pub mod host;
mod kernel;
mod queue;
mod range;
mod session;

pub use config::*;
pub use diagnostics::*;
pub use error::*;
pub use fusion::{
    Feasibility, FusedPlan, FusionAbort, FusionCache, FusionDecision, Infeasibility,
    InternalizationOutcome, KernelPlan, OutcomeReason,
};
pub use kernel::*;
pub use queue::*;
pub use range::*;
pub use session::*;

pub type HashMap<K, V> = rustc_hash::FxHashMap<K, V>;

/// Short inline vector for per-kernel lists and range extents.
pub type RVec<T> = smallvec::SmallVec<[T; 4]>;
