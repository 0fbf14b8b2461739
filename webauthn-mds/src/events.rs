//! Observation of notable events, such as a metadata source being loaded.

use std::fmt;

/// Receives events of type `E`. Dispatch must not fail and should not block.
pub trait EventDispatcher<E>: fmt::Debug + Send + Sync {
    /// Deliver an event.
    fn dispatch(&self, event: &E);
}

/// An [EventDispatcher] that discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventDispatcher;

impl<E> EventDispatcher<E> for NullEventDispatcher {
    fn dispatch(&self, _event: &E) {}
}

/// Events emitted by the metadata services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataEvent {
    /// A source was loaded.
    Loaded {
        /// Where the source was loaded from.
        source: String,
        /// Number of statements now available.
        statements: usize,
        /// Number of entries left out as malformed.
        skipped: usize,
    },
    /// A source failed to load.
    LoadFailed {
        /// Where the source was loaded from.
        source: String,
        /// The failure.
        reason: String,
    },
    /// A statement was requested and found.
    StatementFound {
        /// The AAGUID of the statement.
        aaguid: String,
    },
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records every event it receives.
    #[derive(Debug, Default)]
    pub(crate) struct RecordingDispatcher {
        pub events: Mutex<Vec<MetadataEvent>>,
    }

    impl EventDispatcher<MetadataEvent> for RecordingDispatcher {
        fn dispatch(&self, event: &MetadataEvent) {
            if let Ok(mut events) = self.events.lock() {
                events.push(event.clone());
            }
        }
    }

    #[test]
    fn null_dispatcher_accepts_anything() {
        let d = NullEventDispatcher;
        d.dispatch(&MetadataEvent::StatementFound {
            aaguid: "x".to_string(),
        });
        d.dispatch(&42u32);
    }
}
