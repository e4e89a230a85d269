//! Promotion resolution for buffers shared across fused kernels.
//!
//! Each buffer's requests are folded in submission order with [`combine`].
//! The running decision only ever moves down the capability order of
//! [`Internalization`], so the first request bounds the outcome and later
//! requests can only downgrade it.
//!
//! | running \ incoming | None     | Local                          | Private            |
//! |--------------------|----------|--------------------------------|--------------------|
//! | None               | None     | None (conflict)                | None (conflict)    |
//! | Local              | None (conflict) | Local, or None on size mismatch | Local (downgrade) |
//! | Private            | None (conflict) | Local (downgrade)       | Private            |
//!
//! Any step that ends in `Local` also requires every contributing kernel to
//! have specified a work-group size; otherwise the buffer is not promoted.

use super::{BufferSlots, Finding};
use crate::{BufferPromotionRequest, Internalization, KernelRecord, Range};

/// Why a buffer ended up at its resolved level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeReason {
    /// No kernel asked for promotion.
    NotRequested,
    /// Every request agreed.
    Requested,
    /// A request for promotion met a request for none.
    Conflict,
    /// Local promotion without a work-group size.
    SizeMissing,
    /// Local promotion with differing work-group sizes.
    SizeMismatch,
    /// Private promotion reduced to local.
    Downgraded,
    /// The kernels were not fused, so nothing was promoted.
    FusionAborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DowngradeCause {
    /// An earlier accessor specified local promotion.
    PreviousLocal,
    /// The current accessor specified local promotion.
    ThisLocal,
}

/// Diagnostic produced by a single fold step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromotionWarning {
    Conflict { skipped: Internalization },
    SizeMissing,
    SizeMismatch,
    Downgrade(DowngradeCause),
}

impl PromotionWarning {
    pub fn message(&self) -> String {
        match self {
            PromotionWarning::Conflict { skipped } => format!(
                "Not performing specified {} promotion, due to previous mismatch or because \
                 previous accessor specified no promotion",
                skipped.as_str()
            ),
            PromotionWarning::SizeMissing => {
                "Work-group size for local promotion not specified, not performing internalization"
                    .to_string()
            }
            PromotionWarning::SizeMismatch => {
                "Not performing specified local promotion due to work-group size mismatch"
                    .to_string()
            }
            PromotionWarning::Downgrade(DowngradeCause::PreviousLocal) => {
                "Performing local internalization instead, because previous accessor specified \
                 local promotion"
                    .to_string()
            }
            PromotionWarning::Downgrade(DowngradeCause::ThisLocal) => {
                "Performing local internalization instead, because this accessor specified local \
                 promotion"
                    .to_string()
            }
        }
    }
}

/// Running per-buffer decision.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Promotion {
    pub level: Internalization,
    pub reason: OutcomeReason,
    /// Highest level any request asked for.
    pub peak: Internalization,
    /// Work-group size of the first contributing kernel.
    pub local_range: Option<Range>,
}

impl Promotion {
    /// Seed the fold from a buffer's first request.
    pub fn first(request: &BufferPromotionRequest) -> (Self, Option<PromotionWarning>) {
        let seed = |level, reason| Promotion {
            level,
            reason,
            peak: request.level,
            local_range: request.local_range.clone(),
        };
        match request.level {
            Internalization::None => (seed(Internalization::None, OutcomeReason::NotRequested), None),
            Internalization::Local if request.local_range.is_none() => (
                seed(Internalization::None, OutcomeReason::SizeMissing),
                Some(PromotionWarning::SizeMissing),
            ),
            level => (seed(level, OutcomeReason::Requested), None),
        }
    }

    fn demote(&self, reason: OutcomeReason, peak: Internalization) -> Self {
        Self {
            level: Internalization::None,
            reason,
            peak,
            local_range: self.local_range.clone(),
        }
    }

    fn settle(&self, level: Internalization, reason: OutcomeReason, peak: Internalization) -> Self {
        Self {
            level,
            reason,
            peak,
            local_range: self.local_range.clone(),
        }
    }

    /// The outcome reported to the caller, without fold state.
    pub fn outcome(&self) -> InternalizationOutcome {
        InternalizationOutcome {
            level: self.level,
            reason: self.reason,
            downgraded_from: (self.peak > self.level).then_some(self.peak),
        }
    }
}

/// Fold one incoming request into the running decision.
///
/// Pure: the running decision is taken by reference and a new one returned,
/// together with at most one warning.
pub fn combine(
    running: &Promotion,
    incoming: &BufferPromotionRequest,
) -> (Promotion, Option<PromotionWarning>) {
    use Internalization as I;

    let peak = running.peak.max(incoming.level);
    match (running.level, incoming.level) {
        (I::None, I::None) => (running.settle(I::None, running.reason, peak), None),
        (I::None, skipped) => (
            running.demote(OutcomeReason::Conflict, peak),
            Some(PromotionWarning::Conflict { skipped }),
        ),
        (skipped, I::None) => (
            running.demote(OutcomeReason::Conflict, peak),
            Some(PromotionWarning::Conflict { skipped }),
        ),
        (I::Private, I::Private) => (running.settle(I::Private, running.reason, peak), None),
        (current, requested) => {
            // Every remaining pairing resolves to local memory.
            let (Some(reference), Some(claimed)) = (&running.local_range, &incoming.local_range)
            else {
                return (
                    running.demote(OutcomeReason::SizeMissing, peak),
                    Some(PromotionWarning::SizeMissing),
                );
            };
            if reference != claimed {
                return (
                    running.demote(OutcomeReason::SizeMismatch, peak),
                    Some(PromotionWarning::SizeMismatch),
                );
            }
            match (current, requested) {
                (I::Local, I::Private) => (
                    running.settle(I::Local, OutcomeReason::Downgraded, peak),
                    Some(PromotionWarning::Downgrade(DowngradeCause::PreviousLocal)),
                ),
                (I::Private, I::Local) => (
                    running.settle(I::Local, OutcomeReason::Downgraded, peak),
                    Some(PromotionWarning::Downgrade(DowngradeCause::ThisLocal)),
                ),
                _ => (running.settle(I::Local, running.reason, peak), None),
            }
        }
    }
}

/// Resolved promotion for one buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InternalizationOutcome {
    pub level: Internalization,
    pub reason: OutcomeReason,
    /// Highest requested level, when the outcome is below it.
    pub downgraded_from: Option<Internalization>,
}

/// Fold every buffer's requests over `records`, in submission order.
///
/// Returns the final decision per buffer slot and the warnings, ordered by
/// the request that triggered them. Promotion warnings name the first
/// contributing kernel and the triggering kernel.
pub fn resolve(records: &[KernelRecord], slots: &BufferSlots) -> (Vec<Promotion>, Vec<Finding>) {
    let mut running: Vec<Option<(Promotion, usize)>> = vec![None; slots.len()];
    let mut findings = Vec::new();

    for (position, record) in records.iter().enumerate() {
        for request in record.requests() {
            let Some(slot) = slots.slot(request.buffer) else {
                continue;
            };
            let (next, warning, origin) = match &running[slot] {
                None => {
                    let (first, warning) = Promotion::first(request);
                    (first, warning, position)
                }
                Some((current, origin)) => {
                    let (next, warning) = combine(current, request);
                    (next, warning, *origin)
                }
            };
            log::trace!(
                "{:?} in {}: {:?} -> {:?}",
                request.buffer,
                record.name(),
                request.level,
                next.level
            );
            if let Some(warning) = warning {
                let kernels = if origin == position {
                    rvec![position]
                } else {
                    rvec![origin, position]
                };
                findings.push(Finding::promotion(warning, kernels, slot));
            }
            running[slot] = Some((next, origin));
        }
    }

    let promotions = running
        .into_iter()
        .map(|entry| {
            entry.map(|(promotion, _)| promotion).unwrap_or(Promotion {
                level: Internalization::None,
                reason: OutcomeReason::NotRequested,
                peak: Internalization::None,
                local_range: None,
            })
        })
        .collect();
    (promotions, findings)
}
