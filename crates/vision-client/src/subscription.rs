//! Scoped handler registration.

use serde::Serialize;

use crate::manager::ConnectionManager;

/// Keeps a handler registered until dropped.
///
/// Dropping the guard unregisters whatever handler is installed for the
/// category at that point, including one installed later by another caller.
#[derive(Debug)]
pub struct Subscription {
    manager: ConnectionManager,
    category: String,
}

impl Subscription {
    pub(crate) fn new(manager: ConnectionManager, category: String) -> Self {
        Self { manager, category }
    }

    /// The subscribed category.
    pub fn category(&self) -> &str {
        &self.category
    }

    /// Send through the underlying manager.
    pub fn send<T: Serialize + ?Sized>(&self, data: &T) {
        self.manager.send(data);
    }

    /// Unregister now.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.manager.unregister_callback(self.category.as_str());
    }
}
