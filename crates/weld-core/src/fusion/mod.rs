//! # Fusion analysis
//!
//! Decides, for the kernels recorded in one session, whether they share a
//! launch and which buffers are promoted.
//!
//! The analysis is positional: kernels are referred to by submission
//! position and buffers by [`BufferSlots`] ordinal (order of first use). This
//! keeps a [`Resolution`] independent of the concrete buffer handles, which
//! is what lets [`FusionCache`] replay it for a later session with the same
//! structure. [`Resolution::bind`] maps positions back to identities.
//!
//! Promotion warnings come first, in request order, followed by at most one
//! fusion-abort warning.

mod cache;
mod decision;
mod internalize;
mod validate;

pub use cache::*;
pub use decision::*;
pub use internalize::*;
pub use validate::*;

use crate::{
    BufferId, CompletionOptions, HashMap, Internalization, KernelName, KernelRecord, NdRange,
    RVec, Warning, WarningKind,
};

/// Buffers of a session, numbered in order of first use.
#[derive(Debug, Clone, Default)]
pub struct BufferSlots {
    buffers: Vec<BufferId>,
    index: HashMap<BufferId, usize>,
}

impl BufferSlots {
    pub fn of(records: &[KernelRecord]) -> Self {
        let mut slots = Self::default();
        for request in records.iter().flat_map(|r| r.requests()) {
            if !slots.index.contains_key(&request.buffer) {
                slots.index.insert(request.buffer, slots.buffers.len());
                slots.buffers.push(request.buffer);
            }
        }
        slots
    }

    pub fn slot(&self, buffer: BufferId) -> Option<usize> {
        self.index.get(&buffer).copied()
    }

    pub fn buffer(&self, slot: usize) -> Option<BufferId> {
        self.buffers.get(slot).copied()
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

/// A warning in positional form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Finding {
    pub kind: WarningKind,
    /// Submission positions of the kernels involved.
    pub kernels: RVec<usize>,
    pub slot: Option<usize>,
}

impl Finding {
    pub(crate) fn promotion(warning: PromotionWarning, kernels: RVec<usize>, slot: usize) -> Self {
        Self {
            kind: WarningKind::Promotion(warning),
            kernels,
            slot: Some(slot),
        }
    }

    pub(crate) fn aborted(reason: Infeasibility, offending: (usize, usize)) -> Self {
        Self {
            kind: WarningKind::FusionAborted(reason),
            kernels: rvec![offending.0, offending.1],
            slot: None,
        }
    }
}

/// Outcome of analysing one record sequence, in positional form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub feasibility: Feasibility,
    /// Final promotion per buffer slot.
    pub promotions: Vec<Promotion>,
    pub findings: Vec<Finding>,
}

/// Run the resolver and the validator over `records`.
///
/// A local promotion rejected for mismatching work-group sizes also makes
/// the fusion infeasible for local size, even when the geometry check alone
/// would have passed.
pub fn analyze(records: &[KernelRecord], slots: &BufferSlots) -> Resolution {
    let (promotions, mut findings) = resolve(records, slots);

    let mut feasibility = validate(records);
    if feasibility.is_fusible()
        && let Some(mismatch) = findings
            .iter()
            .find(|f| f.kind == WarningKind::Promotion(PromotionWarning::SizeMismatch))
    {
        let first = mismatch.kernels.first().copied().unwrap_or_default();
        let last = mismatch.kernels.last().copied().unwrap_or_default();
        feasibility = Feasibility::Infeasible {
            reason: Infeasibility::LocalSizeMismatch,
            offending: (first, last),
        };
    }

    if let Feasibility::Infeasible { reason, offending } = feasibility {
        findings.push(Finding::aborted(reason, offending));
    }
    log::debug!(
        "analysed {} kernels, {} buffers: {:?}",
        records.len(),
        slots.len(),
        feasibility
    );

    Resolution {
        feasibility,
        promotions,
        findings,
    }
}

impl Resolution {
    /// Map this resolution onto the identities of `records`.
    ///
    /// `records` must be structurally identical to the sequence this
    /// resolution was computed from.
    pub fn bind(
        &self,
        records: &[KernelRecord],
        slots: &BufferSlots,
        options: CompletionOptions,
    ) -> (FusionDecision, Vec<Warning>) {
        let name = |position: usize| -> Option<KernelName> {
            records.get(position).map(|r| r.name().clone())
        };

        let warnings = self
            .findings
            .iter()
            .map(|finding| {
                Warning::new(
                    finding.kind,
                    finding.kernels.iter().filter_map(|&p| name(p)).collect(),
                    finding.slot.and_then(|s| slots.buffer(s)),
                )
            })
            .collect();

        let plans = records.iter().enumerate().map(|(position, record)| {
            KernelPlan::new(record.name().clone(), position, record.nd_range().clone())
        });

        let decision = match (self.feasibility, records.first()) {
            (_, None) => FusionDecision::Unfused {
                plans: Vec::new(),
                abort: None,
                outcomes: Vec::new(),
            },
            (Feasibility::Fusible, Some(reference)) => {
                let outcomes = self.outcomes(slots, |p| p.outcome());
                let promoted = outcomes
                    .iter()
                    .filter(|(_, outcome)| outcome.level.is_promoted())
                    .map(|(buffer, outcome)| (*buffer, outcome.level))
                    .collect();
                FusionDecision::Fused {
                    plan: FusedPlan::new(
                        plans.collect(),
                        reference.nd_range().clone(),
                        promoted,
                        !options.no_barriers,
                    ),
                    outcomes,
                }
            }
            (Feasibility::Infeasible { reason, offending }, Some(_)) => FusionDecision::Unfused {
                plans: plans.collect(),
                abort: name(offending.0)
                    .zip(name(offending.1))
                    .map(|kernels| FusionAbort::new(reason, kernels)),
                outcomes: self.outcomes(slots, |p| InternalizationOutcome {
                    level: Internalization::None,
                    reason: OutcomeReason::FusionAborted,
                    downgraded_from: p.peak.is_promoted().then_some(p.peak),
                }),
            },
        };
        (decision, warnings)
    }

    fn outcomes(
        &self,
        slots: &BufferSlots,
        outcome: impl Fn(&Promotion) -> InternalizationOutcome,
    ) -> Vec<(BufferId, InternalizationOutcome)> {
        self.promotions
            .iter()
            .enumerate()
            .filter_map(|(slot, p)| slots.buffer(slot).map(|b| (b, outcome(p))))
            .collect()
    }
}

/// Structural key of a record sequence: everything the analysis reads, with
/// buffer handles replaced by their slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature(Vec<KernelShape>);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct KernelShape {
    name: KernelName,
    nd_range: NdRange,
    accesses: RVec<(usize, Internalization)>,
}

impl Signature {
    pub fn of(records: &[KernelRecord], slots: &BufferSlots) -> Self {
        Self(
            records
                .iter()
                .map(|record| KernelShape {
                    name: record.name().clone(),
                    nd_range: record.nd_range().clone(),
                    accesses: record
                        .requests()
                        .iter()
                        .filter_map(|r| slots.slot(r.buffer).map(|s| (s, r.level)))
                        .collect(),
                })
                .collect(),
        )
    }
}
