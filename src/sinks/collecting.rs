use crate::engine::events::JudgeEvent;
use crate::engine::sink::EventSink;

/// An in-memory event sink used to collect engine events
/// during a single submission.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: Vec<JudgeEvent>,
}

impl CollectingEventSink {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// Borrow all collected events.
    pub fn events(&self) -> &[JudgeEvent] {
        &self.events
    }

    /// Consume the sink and return the collected events.
    pub fn into_events(self) -> Vec<JudgeEvent> {
        self.events
    }
}

impl EventSink for CollectingEventSink {
    fn emit(&mut self, event: JudgeEvent) {
        self.events.push(event);
    }
}
