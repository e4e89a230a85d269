//! Launch-geometry constraints for fusion.

use crate::KernelRecord;

/// Why a set of kernels cannot share one launch.
///
/// Variants are listed in the order the checks run; the first violated
/// property is the one reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Infeasibility {
    DimensionMismatch,
    GlobalSizeMismatch,
    LocalSizeMismatch,
}

impl Infeasibility {
    pub fn message(&self) -> &'static str {
        match self {
            Infeasibility::DimensionMismatch => "Cannot fuse kernels with different dimensionality",
            Infeasibility::GlobalSizeMismatch => "Cannot fuse kernels with different global size",
            Infeasibility::LocalSizeMismatch => "Cannot fuse kernels with different local size",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feasibility {
    Fusible,
    Infeasible {
        reason: Infeasibility,
        /// Submission positions of the reference kernel and the first kernel
        /// violating `reason`.
        offending: (usize, usize),
    },
}

impl Feasibility {
    pub fn is_fusible(&self) -> bool {
        matches!(self, Feasibility::Fusible)
    }
}

/// Check whether `records` can execute as one launch.
///
/// Every kernel is compared against the first one. All kernels are checked
/// for rank before any is checked for global size, and so on, so the reported
/// reason follows the precedence of [`Infeasibility`] rather than submission
/// order.
///
/// The first kernel's local range is the reference: a later kernel that
/// specifies a local range must match it exactly, and an unspecified reference
/// never matches a specified one. Kernels that leave the local range
/// unspecified adopt the reference. This holds whether or not any buffer is
/// promoted: a session whose first kernel leaves the local range unspecified
/// and whose later kernel specifies one is never fused.
pub fn validate(records: &[KernelRecord]) -> Feasibility {
    let Some((reference, rest)) = records.split_first() else {
        return Feasibility::Fusible;
    };

    let first_violation = |reason: Infeasibility, violates: &dyn Fn(&KernelRecord) -> bool| {
        rest.iter()
            .position(violates)
            .map(|i| Feasibility::Infeasible {
                reason,
                offending: (0, i + 1),
            })
    };

    first_violation(Infeasibility::DimensionMismatch, &|r| {
        r.rank() != reference.rank()
    })
    .or_else(|| {
        first_violation(Infeasibility::GlobalSizeMismatch, &|r| {
            r.global().size() != reference.global().size()
        })
    })
    .or_else(|| {
        first_violation(Infeasibility::LocalSizeMismatch, &|r| {
            r.local().is_some() && r.local() != reference.local()
        })
    })
    .unwrap_or(Feasibility::Fusible)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NdRange, Range};

    fn kernel(name: &str, global: &[usize], local: Option<&[usize]>) -> KernelRecord {
        let global = Range::new(global).unwrap();
        let nd = match local {
            Some(local) => NdRange::new(global, Range::new(local).unwrap()).unwrap(),
            None => NdRange::global_only(global),
        };
        KernelRecord::builder(name, nd).build()
    }

    #[test]
    fn test_empty_and_single_kernel_are_fusible() {
        assert_eq!(validate(&[]), Feasibility::Fusible);
        assert_eq!(
            validate(&[kernel("k", &[7], None)]),
            Feasibility::Fusible
        );
    }

    #[test]
    fn test_dimension_mismatch() {
        let records = [kernel("a", &[32, 16], Some(&[1, 8])), kernel("b", &[512], Some(&[8]))];
        assert_eq!(
            validate(&records),
            Feasibility::Infeasible {
                reason: Infeasibility::DimensionMismatch,
                offending: (0, 1)
            }
        );
    }

    #[test]
    fn test_global_size_mismatch() {
        let records = [kernel("a", &[256], Some(&[8])), kernel("b", &[512], Some(&[8]))];
        assert!(matches!(
            validate(&records),
            Feasibility::Infeasible {
                reason: Infeasibility::GlobalSizeMismatch,
                ..
            }
        ));
    }

    #[test]
    fn test_global_size_is_compared_flattened() {
        let records = [kernel("a", &[32, 16], None), kernel("b", &[16, 32], None)];
        assert_eq!(validate(&records), Feasibility::Fusible);
    }

    #[test]
    fn test_local_size_mismatch() {
        let records = [kernel("a", &[512], Some(&[16])), kernel("b", &[512], Some(&[8]))];
        assert!(matches!(
            validate(&records),
            Feasibility::Infeasible {
                reason: Infeasibility::LocalSizeMismatch,
                ..
            }
        ));
    }

    #[test]
    fn test_unspecified_local_sizes() {
        let none = [kernel("a", &[512], None), kernel("b", &[512], None)];
        assert_eq!(validate(&none), Feasibility::Fusible);

        let trailing = [kernel("a", &[512], Some(&[8])), kernel("b", &[512], None)];
        assert_eq!(validate(&trailing), Feasibility::Fusible);

        let leading = [kernel("a", &[512], None), kernel("b", &[512], Some(&[8]))];
        assert!(leading.iter().all(|r| r.requests().is_empty()));
        assert_eq!(
            validate(&leading),
            Feasibility::Infeasible {
                reason: Infeasibility::LocalSizeMismatch,
                offending: (0, 1)
            }
        );
    }

    #[test]
    fn test_largest_global_size_compares_without_overflow() {
        let records = [
            kernel("a", &[usize::MAX / 2, 2], None),
            kernel("b", &[4, 4], None),
        ];
        assert_eq!(
            validate(&records),
            Feasibility::Infeasible {
                reason: Infeasibility::GlobalSizeMismatch,
                offending: (0, 1)
            }
        );
    }

    #[test]
    fn test_precedence_over_submission_order() {
        // Kernel 1 breaks the global size, kernel 2 the rank: rank wins.
        let records = [
            kernel("a", &[512], None),
            kernel("b", &[256], None),
            kernel("c", &[16, 32], None),
        ];
        assert_eq!(
            validate(&records),
            Feasibility::Infeasible {
                reason: Infeasibility::DimensionMismatch,
                offending: (0, 2)
            }
        );
    }
}
