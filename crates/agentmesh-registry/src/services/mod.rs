// Services layer
// Services own validation, retries and resolution; API handlers only map results to HTTP

pub mod registry;

pub use registry::{
    AgentFilter, AgentSummary, HeartbeatStatus, RegistrationOutcome, RegistryError,
    RegistryResult, RegistryService,
};
