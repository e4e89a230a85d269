//! Execution plans handed to the executor.

use super::{Infeasibility, InternalizationOutcome};
use crate::{BufferId, Internalization, KernelName, NdRange};
use derive_new::new;

/// One kernel launched on its own, or one stage of a fused launch.
#[derive(Debug, Clone, PartialEq, Eq, new)]
pub struct KernelPlan {
    pub kernel: KernelName,
    /// Submission position within the session.
    pub position: usize,
    pub nd_range: NdRange,
}

/// Several kernels launched as one.
///
/// Stages run in submission order for every work-item. Buffers listed in
/// `promoted` live in on-chip memory for the whole launch and are never
/// written back to global memory.
#[derive(Debug, Clone, PartialEq, Eq, new)]
pub struct FusedPlan {
    pub stages: Vec<KernelPlan>,
    /// Geometry of the fused launch: the first kernel's.
    pub nd_range: NdRange,
    pub promoted: Vec<(BufferId, Internalization)>,
    /// Insert a work-group barrier between stages.
    pub barriers: bool,
}

impl FusedPlan {
    pub fn promotion(&self, buffer: BufferId) -> Internalization {
        self.promoted
            .iter()
            .find(|(b, _)| *b == buffer)
            .map(|(_, level)| *level)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, new)]
pub struct FusionAbort {
    pub reason: Infeasibility,
    /// The reference kernel and the first kernel that violated `reason`.
    pub kernels: (KernelName, KernelName),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FusionDecision {
    Fused {
        plan: FusedPlan,
        outcomes: Vec<(BufferId, InternalizationOutcome)>,
    },
    /// Every kernel runs on its own, in submission order. `abort` is `None`
    /// only for an empty session.
    Unfused {
        plans: Vec<KernelPlan>,
        abort: Option<FusionAbort>,
        outcomes: Vec<(BufferId, InternalizationOutcome)>,
    },
}

impl FusionDecision {
    pub fn is_fused(&self) -> bool {
        matches!(self, FusionDecision::Fused { .. })
    }

    pub fn fused_plan(&self) -> Option<&FusedPlan> {
        match self {
            FusionDecision::Fused { plan, .. } => Some(plan),
            FusionDecision::Unfused { .. } => None,
        }
    }

    pub fn abort(&self) -> Option<&FusionAbort> {
        match self {
            FusionDecision::Fused { .. } => None,
            FusionDecision::Unfused { abort, .. } => abort.as_ref(),
        }
    }

    /// Per-buffer outcomes, in order of first use.
    pub fn outcomes(&self) -> &[(BufferId, InternalizationOutcome)] {
        match self {
            FusionDecision::Fused { outcomes, .. } | FusionDecision::Unfused { outcomes, .. } => {
                outcomes
            }
        }
    }

    pub fn outcome(&self, buffer: BufferId) -> Option<InternalizationOutcome> {
        self.outcomes()
            .iter()
            .find(|(b, _)| *b == buffer)
            .map(|(_, outcome)| *outcome)
    }

    /// Number of launches the executor will see.
    pub fn launch_count(&self) -> usize {
        match self {
            FusionDecision::Fused { .. } => 1,
            FusionDecision::Unfused { plans, .. } => plans.len(),
        }
    }
}
