//! Dirty-bit dependency table for the EP engine.
//!
//! Every derived quantity lists the inputs it is computed from. A setter
//! invalidates one input, which marks all of its dependents dirty; a
//! getter recomputes a dirty quantity and marks it clean.

/// Mutable inputs of the EP engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    /// Total variance v.
    Variance,
    /// Variance ratio delta.
    Delta,
    /// Whitened effect sizes.
    Beta,
    /// Site natural parameters.
    Sites,
}

/// Quantities derived from the inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Derived {
    /// Prior mean `M beta`.
    Mean,
    /// Rank-r factorization of the site precisions (A, C, L, q).
    Factor,
    /// Converged EP approximation (sites, cavity, joint, tilted moments).
    Posterior,
    /// Evidence terms.
    Evidence,
}

impl Derived {
    const ALL: [Derived; 4] = [
        Derived::Mean,
        Derived::Factor,
        Derived::Posterior,
        Derived::Evidence,
    ];

    fn index(self) -> usize {
        self as usize
    }

    /// Whether this quantity must be recomputed when `input` changes.
    pub fn depends_on(self, input: Input) -> bool {
        match self {
            Derived::Mean => matches!(input, Input::Beta),
            Derived::Factor => matches!(input, Input::Variance | Input::Delta | Input::Sites),
            Derived::Posterior => matches!(input, Input::Variance | Input::Delta | Input::Beta),
            Derived::Evidence => true,
        }
    }
}

/// Dirty flags for every derived quantity. Everything starts dirty.
#[derive(Debug, Clone)]
pub struct DirtyTable {
    dirty: [bool; 4],
}

impl Default for DirtyTable {
    fn default() -> Self {
        Self { dirty: [true; 4] }
    }
}

impl DirtyTable {
    /// Mark every dependent of `input` dirty.
    pub fn invalidate(&mut self, input: Input) {
        for d in Derived::ALL {
            if d.depends_on(input) {
                self.dirty[d.index()] = true;
            }
        }
    }

    /// Mark everything dirty.
    pub fn invalidate_all(&mut self) {
        self.dirty = [true; 4];
    }

    pub fn is_dirty(&self, derived: Derived) -> bool {
        self.dirty[derived.index()]
    }

    pub fn mark_clean(&mut self, derived: Derived) {
        self.dirty[derived.index()] = false;
    }
}
