//! Grid enumeration: the full Cartesian product of a list of parameter spaces.

use sweep_types::{ParameterCombination, ParameterSpace, SweepResult};

/// Exhaustive enumerator over discrete parameter combinations.
///
/// Order is lexicographic over declaration order: the first space is the
/// outermost loop and the last space varies fastest.
#[derive(Debug, Clone)]
pub struct GridEnumerator {
    spaces: Vec<ParameterSpace>,
    /// Number of grid values per space. Values themselves are computed on
    /// demand, so memory stays flat however large the grid is.
    counts: Vec<usize>,
    cursor: usize,
}

impl GridEnumerator {
    /// Validate every space and count its values.
    pub fn new(spaces: Vec<ParameterSpace>) -> SweepResult<Self> {
        for space in &spaces {
            space.validate()?;
        }
        let counts = spaces.iter().map(ParameterSpace::value_count).collect();
        Ok(Self {
            spaces,
            counts,
            cursor: 0,
        })
    }

    pub fn spaces(&self) -> &[ParameterSpace] {
        &self.spaces
    }

    /// Total number of grid points, saturating at `usize::MAX`. Zero spaces
    /// yield one empty combination.
    pub fn len(&self) -> usize {
        self.counts
            .iter()
            .fold(1usize, |acc, count| acc.saturating_mul(*count))
    }

    /// Never true for a validated grid: every space has at least one value.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lazy iterator over every combination, from the start.
    pub fn iter(&self) -> GridIter<'_> {
        GridIter {
            grid: self,
            next_index: 0,
            end: self.len(),
        }
    }

    /// The `index`-th combination in enumeration order.
    pub fn combination_at(&self, index: usize) -> Option<ParameterCombination> {
        if index >= self.len() {
            return None;
        }

        // Decode `index` as a mixed-radix number, last axis least significant.
        let mut digits = vec![0usize; self.counts.len()];
        let mut rest = index;
        for (slot, count) in digits.iter_mut().zip(&self.counts).rev() {
            *slot = rest % count;
            rest /= count;
        }

        let mut combo = ParameterCombination::with_capacity(self.spaces.len());
        for (space, digit) in self.spaces.iter().zip(digits) {
            combo.insert(space.name.clone(), space.value_at(digit));
        }
        Some(combo)
    }

    /// Hand out the next `count` combinations, advancing an internal cursor.
    pub fn suggest(&mut self, count: usize) -> Vec<ParameterCombination> {
        let end = self.cursor.saturating_add(count).min(self.len());
        let batch = GridIter {
            grid: self,
            next_index: self.cursor,
            end,
        }
        .collect();
        self.cursor = end;
        batch
    }

    /// Combinations not yet handed out by [`GridEnumerator::suggest`].
    pub fn remaining(&self) -> usize {
        self.len() - self.cursor
    }
}

/// Lazy, exact-size iterator over a [`GridEnumerator`].
#[derive(Debug, Clone)]
pub struct GridIter<'a> {
    grid: &'a GridEnumerator,
    next_index: usize,
    end: usize,
}

impl Iterator for GridIter<'_> {
    type Item = ParameterCombination;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_index >= self.end {
            return None;
        }
        let combo = self.grid.combination_at(self.next_index);
        self.next_index += 1;
        combo
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.end - self.next_index;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for GridIter<'_> {}
