//! HTTP + WebSocket surface (§6): router assembly, error adapter, agent
//! network trust middleware, and the `/agent`, `/ui`, `/status-ws` websocket
//! handlers.

pub mod error;
pub mod middleware;
pub mod openapi;
pub mod routes;
pub mod server;
pub mod ws;

pub use server::ApiServer;
