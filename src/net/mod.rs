pub mod agent;
pub mod error;
pub mod exchange;
pub mod listener;
pub mod request;

pub use agent::{AgentFactory, ConnectionAgent, SessionContext};
pub use error::NetError;
pub use exchange::{run_exchange, LineSender};
pub use listener::ListenerService;
pub use request::{LogErrorHandler, OneShotAgent, RequestErrorHandler};
