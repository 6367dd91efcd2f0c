use crate::error::Result;
use crate::hash::{deep_hash, Fingerprint};
use serde::Serialize;

/// Whether a tracked entity still matches its baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingState {
    Clean,
    Dirty,
}

/// An entity handed out at query time together with the fingerprint taken
/// right after it was fetched.
#[derive(Debug, Clone)]
pub struct Tracked<T> {
    entity: T,
    baseline: Fingerprint,
}

impl<T: Serialize> Tracked<T> {
    /// Snapshot `entity` as its own baseline.
    pub fn new(entity: T) -> Result<Self> {
        let baseline = deep_hash(&entity)?;
        Ok(Self { entity, baseline })
    }

    pub fn entity(&self) -> &T {
        &self.entity
    }

    pub fn entity_mut(&mut self) -> &mut T {
        &mut self.entity
    }

    pub fn baseline(&self) -> Fingerprint {
        self.baseline
    }

    /// Recompute the fingerprint and compare it with the baseline. A dirty
    /// entity stays dirty until [`Tracked::rebaseline`] is called.
    pub fn state(&self) -> Result<TrackingState> {
        if deep_hash(&self.entity)? == self.baseline {
            Ok(TrackingState::Clean)
        } else {
            Ok(TrackingState::Dirty)
        }
    }

    /// Accept the current field values as the new baseline, e.g. after the
    /// entity has been written back.
    pub fn rebaseline(&mut self) -> Result<()> {
        self.baseline = deep_hash(&self.entity)?;
        Ok(())
    }

    pub fn into_inner(self) -> T {
        self.entity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize, Clone)]
    struct Note {
        #[serde(rename = "_id")]
        id: String,
        text: String,
    }

    #[test]
    fn test_clean_until_mutated() {
        let mut tracked = Tracked::new(Note {
            id: "n1".into(),
            text: "draft".into(),
        })
        .unwrap();
        assert_eq!(tracked.state().unwrap(), TrackingState::Clean);

        tracked.entity_mut().text = "final".into();
        assert_eq!(tracked.state().unwrap(), TrackingState::Dirty);
    }

    #[test]
    fn test_reverting_a_change_is_clean_again() {
        let mut tracked = Tracked::new(Note {
            id: "n1".into(),
            text: "draft".into(),
        })
        .unwrap();
        tracked.entity_mut().text = "final".into();
        tracked.entity_mut().text = "draft".into();
        assert_eq!(tracked.state().unwrap(), TrackingState::Clean);
    }

    #[test]
    fn test_rebaseline() {
        let mut tracked = Tracked::new(Note {
            id: "n1".into(),
            text: "draft".into(),
        })
        .unwrap();
        let original = tracked.baseline();

        tracked.entity_mut().text = "final".into();
        tracked.rebaseline().unwrap();

        assert_ne!(tracked.baseline(), original);
        assert_eq!(tracked.state().unwrap(), TrackingState::Clean);
        assert_eq!(tracked.into_inner().text, "final");
    }
}
