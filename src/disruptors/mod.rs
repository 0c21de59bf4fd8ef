//! Disruptors
//!
//! Inject faults in Kubernetes pods through an agent attached to each target
//! as an ephemeral container:
//! - HTTP and gRPC error/delay injection through the agent's proxy
//! - Network packet drops

mod commands;
mod controller;
mod error;
mod pod_disruptor;
mod visitor;

pub use commands::{
    cleanup_command, grpc_command, http_command, network_command, FaultOptions, GrpcFault,
    HttpFault, NetworkFault, AGENT_BINARY, DEFAULT_PROXY_PORT,
};
pub use controller::{AgentController, InjectTimeout, DEFAULT_INJECT_TIMEOUT};
pub use error::{DisruptorError, DisruptorResult};
pub use pod_disruptor::{PodDisruptor, PodDisruptorOptions};
pub use visitor::{CommandVisitor, VisitCommands, Visitor};
