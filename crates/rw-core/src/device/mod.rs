//! Device agents, the device manager and the state transition table.

mod agent;
mod manager;
mod transitions;

pub use agent::{DeviceAgent, TransitionHook};
pub use manager::DeviceManager;
pub use transitions::{DeviceRole, StatePattern, Transition, TransitionHandler, TransitionMap};

/// Generates a 12 hex digit entity id.
pub fn create_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(12);
    id
}
