//! League client integration: session discovery, the event connection, and
//! the feature handlers that react to it.

pub mod api;
pub mod champ_select;
pub mod connection;
pub mod connector;
pub mod delay;
pub mod event;
pub mod handler;
pub mod lockfile;
pub mod presence;
pub mod ready_check;

#[cfg(test)]
pub(crate) mod testing;

pub use champ_select::ChampSelectHandler;
pub use connector::{Connector, ConnectorState, WebSocketConnect};
pub use handler::FeatureHandler;
pub use lockfile::LockfileResolver;
pub use presence::WindowClassPresence;
pub use ready_check::ReadyCheckHandler;
