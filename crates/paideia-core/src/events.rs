use std::sync::Mutex;

use serde::Serialize;

/// Structured progress record, not a formatted console line. The CLI owns
/// rendering; tests install a collector.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum RunEvent {
    RunStarted {
        run_id: String,
        total_tests: u32,
        resumed: bool,
    },
    TestStarted {
        scenario_id: String,
        profile_name: String,
        repetition: u32,
    },
    TestCompleted {
        scenario_id: String,
        profile_name: String,
        repetition: u32,
        score: Option<f64>,
        latency_ms: Option<u64>,
    },
    TestErrored {
        scenario_id: String,
        profile_name: String,
        repetition: u32,
        error: String,
    },
    ScenarioCompleted {
        scenario_id: String,
        done: u32,
        total: u32,
    },
    RunCompleted {
        run_id: String,
        succeeded: u32,
        failed: u32,
    },
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: RunEvent);
}

pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: RunEvent) {}
}

/// Buffers every event for later assertions.
#[derive(Default)]
pub struct CollectSink {
    events: Mutex<Vec<RunEvent>>,
}

impl CollectSink {
    pub fn snapshot(&self) -> Vec<RunEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSink for CollectSink {
    fn emit(&self, event: RunEvent) {
        self.events.lock().unwrap().push(event);
    }
}
