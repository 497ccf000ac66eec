// HTTP API routes
//
// Each submodule handles one resource with its own AppState; all of them
// share the same RegistryService.

pub mod agents;
pub mod capabilities;
pub mod common;
pub mod health;
pub mod heartbeat;

// Re-export common types
pub use common::ErrorResponse;
