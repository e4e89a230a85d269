use crate::{RVec, RangeError};
use std::slice::Iter;

/// Extent of a kernel launch in one to three dimensions.
///
/// Every extent is non-zero; an unspecified work-group size is modelled as
/// `Option<Range>::None` on [`NdRange`], never as a zero extent.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Range(RVec<usize>);

impl Range {
    pub const MAX_RANK: usize = 3;

    pub fn new(extents: &[usize]) -> Result<Self, RangeError> {
        if extents.is_empty() || extents.len() > Self::MAX_RANK {
            return Err(RangeError::InvalidRank(extents.len()));
        }
        if let Some(dim) = extents.iter().position(|&e| e == 0) {
            return Err(RangeError::ZeroExtent {
                dim,
                extents: extents.to_vec(),
            });
        }
        if extents.iter().try_fold(1usize, |acc, &e| acc.checked_mul(e)).is_none() {
            return Err(RangeError::TooLarge {
                extents: extents.to_vec(),
            });
        }
        Ok(Self(extents.iter().copied().collect()))
    }

    /// One-dimensional range. Fails only for a zero extent.
    pub fn linear(extent: usize) -> Result<Self, RangeError> {
        Self::new(&[extent])
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Flattened number of work-items. Never overflows: [`Range::new`]
    /// rejects extents whose product does not fit in `usize`.
    pub fn size(&self) -> usize {
        self.0.iter().product()
    }

    pub fn get(&self, dim: usize) -> Option<usize> {
        self.0.get(dim).copied()
    }

    pub fn iter(&self) -> Iter<'_, usize> {
        self.0.iter()
    }

    /// Row-major linear index of `coords` inside this range.
    pub fn linearize(&self, coords: &[usize]) -> usize {
        coords
            .iter()
            .zip(self.0.iter())
            .fold(0, |acc, (&c, &extent)| acc * extent + c)
    }

    /// Inverse of [`Range::linearize`].
    pub fn delinearize(&self, mut linear: usize) -> RVec<usize> {
        let mut coords = RVec::from_elem(0, self.rank());
        for (dim, &extent) in self.0.iter().enumerate().rev() {
            coords[dim] = linear % extent;
            linear /= extent;
        }
        coords
    }
}

impl std::fmt::Debug for Range {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

impl std::fmt::Display for Range {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, extent) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{extent}")?;
        }
        write!(f, "}}")
    }
}

/// Launch geometry of a kernel: a global range and an optional work-group
/// (local) range of the same rank.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NdRange {
    global: Range,
    local: Option<Range>,
}

impl NdRange {
    pub fn new(global: Range, local: Range) -> Result<Self, RangeError> {
        if global.rank() != local.rank() {
            return Err(RangeError::RankMismatch {
                global: global.rank(),
                local: local.rank(),
            });
        }
        for (dim, (&g, &l)) in global.iter().zip(local.iter()).enumerate() {
            if g % l != 0 {
                return Err(RangeError::NotDivisible {
                    dim,
                    global: g,
                    local: l,
                });
            }
        }
        Ok(Self {
            global,
            local: Some(local),
        })
    }

    /// A launch that leaves the work-group size to the runtime.
    pub fn global_only(global: Range) -> Self {
        Self {
            global,
            local: None,
        }
    }

    pub fn rank(&self) -> usize {
        self.global.rank()
    }

    pub fn global(&self) -> &Range {
        &self.global
    }

    pub fn local(&self) -> Option<&Range> {
        self.local.as_ref()
    }

    /// Work-items grouped by work-group, as global linear ids.
    ///
    /// Groups and the items inside each group are visited in row-major
    /// order. Without a local range the whole launch is one group.
    pub fn work_groups(&self) -> Vec<Vec<usize>> {
        let Some(local) = &self.local else {
            return vec![(0..self.global.size()).collect()];
        };
        let counts: RVec<usize> = self
            .global
            .iter()
            .zip(local.iter())
            .map(|(&g, &l)| g / l)
            .collect();
        // Both ranges were validated on construction, so `counts` is a valid range.
        let grid = Range(counts);

        (0..grid.size())
            .map(|group| {
                let group_coords = grid.delinearize(group);
                (0..local.size())
                    .map(|item| {
                        let local_coords = local.delinearize(item);
                        let global_coords: RVec<usize> = group_coords
                            .iter()
                            .zip(local_coords.iter())
                            .zip(local.iter())
                            .map(|((&g, &l), &extent)| g * extent + l)
                            .collect();
                        self.global.linearize(&global_coords)
                    })
                    .collect()
            })
            .collect()
    }
}
