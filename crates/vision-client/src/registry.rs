//! Category-keyed handler registry.
//!
//! At most one handler exists per category. Registering again replaces the
//! previous handler; unregistering removes it. Frames for categories with no
//! handler are dropped.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};

use vision_core::{Action, Delivery, Envelope, EnvelopeError};

/// A handler invoked with each delivery for its category.
pub type Handler = Box<dyn FnMut(Delivery) + Send + 'static>;

/// What happened to an inbound frame.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// A handler was invoked.
    Delivered {
        /// Frame category.
        category: String,
        /// Frame action.
        action: Action,
    },
    /// No handler is registered for the category.
    NoHandler {
        /// Frame category.
        category: String,
    },
    /// The action has no dispatch effect.
    Ignored {
        /// Frame category.
        category: String,
        /// Frame action.
        action: Action,
    },
    /// The handler panicked; the registry keeps it.
    HandlerPanicked {
        /// Frame category.
        category: String,
    },
    /// The frame could not be decoded.
    Malformed(EnvelopeError),
}

/// Category → handler map.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Handler>,
}

impl HandlerRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `handler` for `category`. Returns `true` if a previous handler
    /// was replaced.
    pub fn register(&mut self, category: impl Into<String>, handler: Handler) -> bool {
        self.handlers.insert(category.into(), handler).is_some()
    }

    /// Remove the handler for `category`. Returns `true` if one existed.
    pub fn unregister(&mut self, category: &str) -> bool {
        self.handlers.remove(category).is_some()
    }

    /// Whether `category` has a handler.
    pub fn contains(&self, category: &str) -> bool {
        self.handlers.contains_key(category)
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Decode `frame` and route it to its category's handler.
    ///
    /// The handler is looked up before the payload is interpreted, so a
    /// frame for an unregistered category is dropped even when its payload
    /// is invalid.
    pub fn dispatch(&mut self, frame: &str) -> DispatchOutcome {
        let envelope = match Envelope::decode(frame) {
            Ok(envelope) => envelope,
            Err(e) => return DispatchOutcome::Malformed(e),
        };
        let category = envelope.category.clone();
        let action = envelope.action.clone();

        let Some(handler) = self.handlers.get_mut(&category) else {
            return DispatchOutcome::NoHandler { category };
        };

        match envelope.into_delivery() {
            Ok(Some(delivery)) => {
                if catch_unwind(AssertUnwindSafe(|| handler(delivery))).is_err() {
                    return DispatchOutcome::HandlerPanicked { category };
                }
                DispatchOutcome::Delivered { category, action }
            }
            Ok(None) => DispatchOutcome::Ignored { category, action },
            Err(e) => DispatchOutcome::Malformed(e),
        }
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("categories", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
