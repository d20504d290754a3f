//! Node service: configuration and the running stack.

mod config;
#[allow(clippy::module_inception)]
mod node;

pub use config::{NodeConfig, NodeConfigBuilder};
pub use node::{Node, NodeEvent};
