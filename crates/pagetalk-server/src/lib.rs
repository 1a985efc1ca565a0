//! actix-web transport over the conversation core.

pub mod handlers;
pub mod logging;
pub mod server;
pub mod state;

pub use server::{configure, run_server};
pub use state::AppState;
