//! EventEmitter - synchronous delivery to a single consumer

use std::sync::Arc;

use super::AgentEvent;

/// Callback signature for event consumers
pub type EventCallback = Arc<dyn Fn(AgentEvent) + Send + Sync>;

/// Delivers events to an optional callback; discards otherwise.
///
/// Events within one loop are totally ordered and delivered on the thread
/// that produced them. Emitters shared across parallel workers must be
/// cloned per worker (they are, via `Arc`).
#[derive(Clone, Default)]
pub struct EventEmitter {
    callback: Option<EventCallback>,
}

impl EventEmitter {
    /// Emitter that discards every event
    pub fn disabled() -> Self {
        Self { callback: None }
    }

    /// Emitter delivering to `callback`
    pub fn new(callback: impl Fn(AgentEvent) + Send + Sync + 'static) -> Self {
        Self {
            callback: Some(Arc::new(callback)),
        }
    }

    /// Deliver one event synchronously, or discard if no consumer is set
    pub fn emit(&self, event: AgentEvent) {
        if let Some(cb) = &self.callback {
            cb(event);
        }
    }

    /// Whether a consumer is attached
    pub fn is_enabled(&self) -> bool {
        self.callback.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_emit_delivers_in_caller_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let emitter = EventEmitter::new(move |e| seen2.lock().unwrap().push(e.kind().to_string()));

        emitter.emit(AgentEvent::AssistantResponseStart { iteration: 1 });
        emitter.emit(AgentEvent::AssistantDelta { text: "a".into() });
        emitter.emit(AgentEvent::AssistantMessage { content: "a".into() });

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["AssistantResponseStart", "AssistantDelta", "AssistantMessage"]
        );
    }

    #[test]
    fn test_disabled_emitter_discards() {
        let emitter = EventEmitter::disabled();
        assert!(!emitter.is_enabled());
        emitter.emit(AgentEvent::AssistantDelta { text: "x".into() });
    }
}
