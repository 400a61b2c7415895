use crate::engine::events::JudgeEvent;

pub trait EventSink: Send {
    fn emit(&mut self, event: JudgeEvent);
}

/// Sink that drops every event, for callers that only want the verdict.
#[derive(Debug, Default)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&mut self, _event: JudgeEvent) {}
}
