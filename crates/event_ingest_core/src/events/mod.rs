pub mod client_tracking;

pub use client_tracking::ClientTrackingEvent;

use crate::registry::EventRegistry;

/// Registry with every event kind this crate knows about.
pub fn default_registry() -> EventRegistry {
    let mut registry = EventRegistry::new();
    client_tracking::register(&mut registry);
    registry
}
