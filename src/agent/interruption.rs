//! Barge-in detection from active-speaker updates.

use super::state::TurnState;

/// Decides whether the designated user talking over the agent should
/// abandon the turn in flight.
#[derive(Debug, Clone)]
pub struct InterruptionMonitor {
    user_id: String,
}

impl InterruptionMonitor {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self { user_id: user_id.into() }
    }

    pub fn should_interrupt(&self, speakers: &[String], turn: TurnState) -> bool {
        turn == TurnState::Processing && speakers.iter().any(|speaker| speaker == &self.user_id)
    }
}
