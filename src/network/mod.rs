//! Network Layer
//!
//! WebSocket transport for the server and the client. Connection tasks
//! never touch the world; they hand decoded events to the simulation task.

pub mod client;
pub mod protocol;
pub mod server;
pub mod session;

pub use client::{ClientConfig, ClientHandle, ConnectionState, GameClient};
pub use protocol::{ClientMessage, ServerMessage, WorldSnapshot};
pub use server::{GameServer, GameServerError, ServerConfig};
pub use session::{SessionError, SimHandle, Simulation};
