use crate::errors::EvalError;
use crate::model::{Profile, Scenario, TestSlot};

/// Expands scenarios x profiles x repetitions into the scheduling order.
/// Scenario-major: every profile and repetition for scenario i precedes any
/// slot for scenario i+1, so "scenario N fully evaluated" is a meaningful
/// milestone and the set of partially-evaluated scenarios stays small.
pub fn build_matrix(
    scenarios: &[Scenario],
    profiles: &[Profile],
    repetitions: u32,
) -> Result<Vec<TestSlot>, EvalError> {
    if scenarios.is_empty() {
        return Err(EvalError::NoScenarios);
    }
    if profiles.is_empty() {
        return Err(EvalError::NoProfiles);
    }
    let mut slots =
        Vec::with_capacity(scenarios.len() * profiles.len() * repetitions as usize);
    for scenario_idx in 0..scenarios.len() {
        for profile_idx in 0..profiles.len() {
            for repetition in 0..repetitions {
                slots.push(TestSlot {
                    profile_idx,
                    scenario_idx,
                    repetition,
                });
            }
        }
    }
    Ok(slots)
}

/// Resume variant: schedules exactly the repetition indices that do not yet
/// have a successful row, preserving scenario-major order. Indexing by
/// repetition (rather than counting successes) keeps resume idempotent when a
/// lower index failed while a higher one succeeded: only the failed index is
/// redone, never the finished one.
pub fn build_remaining(
    scenarios: &[Scenario],
    profiles: &[Profile],
    requested: u32,
    succeeded: impl Fn(&Profile, &Scenario, u32) -> bool,
) -> Vec<TestSlot> {
    let mut slots = Vec::new();
    for (scenario_idx, scenario) in scenarios.iter().enumerate() {
        for (profile_idx, profile) in profiles.iter().enumerate() {
            for repetition in 0..requested {
                if !succeeded(profile, scenario, repetition) {
                    slots.push(TestSlot {
                        profile_idx,
                        scenario_idx,
                        repetition,
                    });
                }
            }
        }
    }
    slots
}
