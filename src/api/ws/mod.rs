//! WebSocket handlers: the authenticated `/agent` protocol (§4.1), the
//! internal `/ui` fanout, and the public `/status-ws` projection (§4.7).

pub mod agent;
pub mod status;
pub mod ui;
