use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Named toggles versioning instruction and memory semantics.
///
/// The active set is part of the invocation input: two validators replaying
/// the same slot must run with identical sets or their Effects diverge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Feature {
    /// Leave an unmapped frame-sized window between consecutive stack
    /// frames; accesses into a gap fault.
    StackFrameGaps,
    /// `callx` through the frame pointer register faults instead of
    /// dereferencing it.
    RejectCallxR10,
    /// Interpreter loads and stores enforce natural alignment.
    StrictAlignment,
}

impl Feature {
    pub const ALL: [Feature; 3] = [
        Feature::StackFrameGaps,
        Feature::RejectCallxR10,
        Feature::StrictAlignment,
    ];

    /// Stable external name, as carried by invocation inputs.
    pub fn name(self) -> &'static str {
        match self {
            Feature::StackFrameGaps => "stack-frame-gaps",
            Feature::RejectCallxR10 => "reject-callx-r10",
            Feature::StrictAlignment => "strict-alignment",
        }
    }

    pub fn from_name(name: &str) -> Option<Feature> {
        Feature::ALL.iter().copied().find(|f| f.name() == name)
    }
}

/// The set of active features for one invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSet {
    active: BTreeSet<Feature>,
}

impl FeatureSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Self {
            active: Feature::ALL.iter().copied().collect(),
        }
    }

    pub fn activate(&mut self, feature: Feature) {
        self.active.insert(feature);
    }

    pub fn is_active(&self, feature: Feature) -> bool {
        self.active.contains(&feature)
    }
}
