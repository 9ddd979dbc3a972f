/// Per-frame budget for main-thread tile work.
///
/// Budgets are expressed in abstract work units (one unit per fetch started
/// or per texture upload) rather than wall-clock time, so a frame's tile work
/// is bounded and replayable regardless of how fast the network answers.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FrameBudget {
    limit: u32,
    remaining_units: u32,
}

impl FrameBudget {
    pub fn new(units: u32) -> Self {
        Self {
            limit: units,
            remaining_units: units,
        }
    }

    /// A practically-unbounded budget (still deterministic).
    pub fn unlimited() -> Self {
        Self::new(u32::MAX)
    }

    pub fn remaining_units(&self) -> u32 {
        self.remaining_units
    }

    /// Units consumed since construction or the last `reset`.
    pub fn spent_units(&self) -> u32 {
        self.limit - self.remaining_units
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining_units == 0
    }

    /// Refill to the original limit at the start of a frame.
    pub fn reset(&mut self) {
        self.remaining_units = self.limit;
    }

    /// Attempts to consume `units` from the budget.
    ///
    /// Returns `true` if the budget had enough remaining units; on `false`
    /// nothing is consumed.
    pub fn try_consume(&mut self, units: u32) -> bool {
        if self.remaining_units < units {
            return false;
        }
        self.remaining_units -= units;
        true
    }
}

impl Default for FrameBudget {
    fn default() -> Self {
        Self::unlimited()
    }
}
