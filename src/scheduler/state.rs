use serde::{Deserialize, Serialize};

/// Lifecycle of a job.
///
/// ```text
/// Initialized --run (permit acquired)--> Started
/// Started     --benchmark completes----> Finished
/// Started     --benchmark fails--------> Error
/// ```
///
/// The persisted form is the lowercase name, never the ordinal. Unknown names
/// fail to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Initialized,
    Started,
    Finished,
    Error,
}

impl JobState {
    pub const ALL: [JobState; 4] = [
        JobState::Initialized,
        JobState::Started,
        JobState::Finished,
        JobState::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Initialized => "initialized",
            JobState::Started => "started",
            JobState::Finished => "finished",
            JobState::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Finished | JobState::Error)
    }

    /// Whether `self -> next` is an edge of the lifecycle.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Initialized, JobState::Started)
                | (JobState::Started, JobState::Finished)
                | (JobState::Started, JobState::Error)
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| format!("{s} is not a valid job state"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_state_has_a_distinct_name() {
        let names: std::collections::HashSet<_> =
            JobState::ALL.iter().map(JobState::as_str).collect();
        assert_eq!(names.len(), JobState::ALL.len());
    }

    #[test]
    fn serde_uses_symbolic_names() {
        for state in JobState::ALL {
            let encoded = serde_json::to_string(&state).unwrap();
            assert_eq!(encoded, format!("\"{}\"", state.as_str()));
            let decoded: JobState = serde_json::from_str(&encoded).unwrap();
            assert_eq!(decoded, state);
        }
    }

    #[test]
    fn unknown_names_and_ordinals_are_rejected() {
        assert!(serde_json::from_str::<JobState>("\"running\"").is_err());
        assert!(serde_json::from_str::<JobState>("1").is_err());
        assert!("Started".parse::<JobState>().is_err());
        assert_eq!("started".parse::<JobState>().unwrap(), JobState::Started);
    }

    #[test]
    fn transitions_only_move_forward() {
        use JobState::*;
        assert!(Initialized.can_transition_to(Started));
        assert!(Started.can_transition_to(Finished));
        assert!(Started.can_transition_to(Error));

        assert!(!Initialized.can_transition_to(Finished));
        assert!(!Started.can_transition_to(Initialized));
        for terminal in [Finished, Error] {
            assert!(terminal.is_terminal());
            for next in JobState::ALL {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }
}
