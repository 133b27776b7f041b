use std::fmt;

/// Replication role of an object in this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ObjectMode {
    /// Not attached to any replication session.
    #[default]
    Standalone,
    Authority,
    ObserverReplicated,
    ObserverOwned,
}

impl ObjectMode {
    pub fn can_transition_to(self, next: ObjectMode) -> bool {
        matches!(
            (self, next),
            (ObjectMode::Standalone, ObjectMode::Authority)
                | (ObjectMode::Standalone, ObjectMode::ObserverReplicated)
                | (ObjectMode::Standalone, ObjectMode::ObserverOwned)
                | (_, ObjectMode::Standalone)
        )
    }

    pub fn is_observer(self) -> bool {
        matches!(self, ObjectMode::ObserverReplicated | ObjectMode::ObserverOwned)
    }
}

impl fmt::Display for ObjectMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObjectMode::Standalone => "standalone",
            ObjectMode::Authority => "authority",
            ObjectMode::ObserverReplicated => "replicated",
            ObjectMode::ObserverOwned => "owned",
        };
        f.write_str(name)
    }
}
