use serde::{Deserialize, Serialize};

// `Issue`, `Center` and `Schedule` are wizard steps 1 to 3.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FlowStage {
    Closed,
    Issue,
    Center,
    Schedule,
    Submitting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowEvent {
    Open,
    Advance,
    Retreat,
    Submit,
    SubmitSucceeded,
    SubmitFailed,
    Close,
}

impl FlowStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowStage::Closed => "closed",
            FlowStage::Issue => "issue",
            FlowStage::Center => "center",
            FlowStage::Schedule => "schedule",
            FlowStage::Submitting => "submitting",
        }
    }

    pub fn step(&self) -> Option<u8> {
        match self {
            FlowStage::Issue => Some(1),
            FlowStage::Center => Some(2),
            FlowStage::Schedule | FlowStage::Submitting => Some(3),
            FlowStage::Closed => None,
        }
    }

    // Field guards are checked by the controller before Advance or Submit.
    // None means the event is illegal in this stage.
    pub fn on(self, event: FlowEvent) -> Option<FlowStage> {
        use FlowEvent::*;
        use FlowStage::*;

        match (self, event) {
            (_, Open) => Some(Issue),
            (_, Close) => Some(Closed),

            (Issue, Advance) => Some(Center),
            (Center, Advance) => Some(Schedule),
            (Schedule, Advance) => Some(Schedule),

            (Issue, Retreat) => Some(Closed),
            (Center, Retreat) => Some(Issue),
            (Schedule, Retreat) => Some(Center),

            (Schedule, Submit) => Some(Submitting),
            (Submitting, SubmitSucceeded) => Some(Closed),
            (Submitting, SubmitFailed) => Some(Schedule),

            _ => None,
        }
    }
}
