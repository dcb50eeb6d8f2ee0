//! Core domain types shared by every component: agents, jobs, and the
//! wire envelope the agent protocol is built on.

pub mod agent;
pub mod envelope;
pub mod job;

pub use agent::{Agent, AgentCapabilities, AgentSocket, AgentState, AgentView};
pub use envelope::{
    AgentEnvelope, AgentErrorPayload, AgentMessageType, AssignAckPayload, AssignStartPayload,
    HelloAuth, HelloOkPayload, HelloPayload, JobStopPayload, JobUpdatePayload, MuteOrPauseAckPayload,
    MutePayload, OrchestratorMessageType, PausePayload, RebootPayload,
};
pub use job::{
    BroadcastHandles, InlineConfig, JobError, JobHealth, JobStatus, RestartPolicy,
    StreamMetadata, StreamingJob,
};
