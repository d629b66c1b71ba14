use std::fmt;

/// Names a basic block while code is being rearranged
///
/// Labels are handed out in increasing order, so sorting by label recovers the order in which
/// blocks were discovered.
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct SynLabel(usize);

impl SynLabel {
    /// Method entry
    pub const START: SynLabel = SynLabel(0);
}

impl fmt::Debug for SynLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "l{}", self.0)
    }
}

/// Source of labels that have not been used yet
pub trait LabelGenerator<Label> {
    fn fresh_label(&mut self) -> Label;
}

/// Hands out [`SynLabel`]s counting up from some starting point
///
/// A clone continues from the same point, so it repeats the labels of the original.
#[derive(Clone, Debug)]
pub struct SynLabelGenerator {
    next: usize,
}

impl SynLabelGenerator {
    pub fn new(start: SynLabel) -> SynLabelGenerator {
        SynLabelGenerator { next: start.0 }
    }
}

impl LabelGenerator<SynLabel> for SynLabelGenerator {
    fn fresh_label(&mut self) -> SynLabel {
        let label = SynLabel(self.next);
        self.next += 1;
        label
    }
}
