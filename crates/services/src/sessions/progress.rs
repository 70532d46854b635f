/// Aggregated view of form progress, useful for UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormProgress {
    /// Position-based percentage of the current question; may move backwards
    /// when branching loops.
    pub percent: u8,
    pub answered: usize,
    pub total: usize,
    pub is_complete: bool,
}
