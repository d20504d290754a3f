//! Node configuration.

use std::time::Duration;

use crate::core::constants::{
    ADVERTISEMENT_DELAY, ADVERTISEMENT_INTERVAL, DEFAULT_PACKET_TTL, EVENT_CAPACITY, HELLO_DELAY,
    HELLO_INTERVAL, KNOWN_NODE_DECAY, KNOWN_NODE_DECAY_DELAY, KNOWN_NODE_TTL, MAC_QUEUE_CAPACITY,
    ROUTE_TICK, ROUTE_TTL_INTERVALS, SEQUENCE_EXPIRY,
};
use crate::core::{Address, BROADCAST_ADDRESS, MAX_ADDRESS, NodeError};
use crate::link::Backoff;
use crate::transport::TransportConfig;

/// Settings for one node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Initial address. A random one is picked when unset.
    pub address: Option<Address>,

    /// HELLO beacon period.
    pub hello_interval: Duration,

    /// Delay before the first HELLO.
    pub hello_delay: Duration,

    /// How long beacon sequences are remembered.
    pub sequence_expiry: Duration,

    /// Distance-vector advertisement period.
    pub advertisement_interval: Duration,

    /// Delay before the first advertisement.
    pub advertisement_delay: Duration,

    /// Route aging tick.
    pub route_tick: Duration,

    /// Hop budget of originated transport frames.
    pub packet_ttl: u8,

    /// Liveness counter given to a node on each beacon.
    pub known_node_ttl: u32,

    /// Liveness decay period.
    pub known_node_decay: Duration,

    /// Delay before the first liveness decay.
    pub known_node_decay_delay: Duration,

    /// Transport timers and window.
    pub transport: TransportConfig,

    /// CSMA/CA backoff.
    pub backoff: Backoff,

    /// Medium access send queue capacity. Frames submitted while it is
    /// full are dropped with a warning.
    pub mac_queue_capacity: usize,

    /// Event channel capacity.
    pub event_capacity: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            address: None,
            hello_interval: HELLO_INTERVAL,
            hello_delay: HELLO_DELAY,
            sequence_expiry: SEQUENCE_EXPIRY,
            advertisement_interval: ADVERTISEMENT_INTERVAL,
            advertisement_delay: ADVERTISEMENT_DELAY,
            route_tick: ROUTE_TICK,
            packet_ttl: DEFAULT_PACKET_TTL,
            known_node_ttl: KNOWN_NODE_TTL,
            known_node_decay: KNOWN_NODE_DECAY,
            known_node_decay_delay: KNOWN_NODE_DECAY_DELAY,
            transport: TransportConfig::default(),
            backoff: Backoff::default(),
            mac_queue_capacity: MAC_QUEUE_CAPACITY,
            event_capacity: EVENT_CAPACITY,
        }
    }
}

impl NodeConfig {
    /// Route lifetime in ticks: four advertisement intervals.
    pub fn route_ttl(&self) -> u32 {
        let tick = self.route_tick.as_nanos().max(1);
        let ticks = u128::from(ROUTE_TTL_INTERVALS) * self.advertisement_interval.as_nanos() / tick;
        u32::try_from(ticks).unwrap_or(u32::MAX)
    }

    /// Check the settings for values the node cannot run with.
    pub fn validate(&self) -> Result<(), NodeError> {
        if let Some(address) = self.address {
            if address > MAX_ADDRESS || address == BROADCAST_ADDRESS {
                return Err(NodeError::Config(format!(
                    "address {address} is not assignable"
                )));
            }
        }
        let periods = [
            ("hello interval", self.hello_interval),
            ("advertisement interval", self.advertisement_interval),
            ("route tick", self.route_tick),
            ("known node decay", self.known_node_decay),
            ("retransmit base", self.transport.retransmit_base),
        ];
        if let Some((name, _)) = periods.iter().find(|(_, period)| period.is_zero()) {
            return Err(NodeError::Config(format!("{name} must be non-zero")));
        }
        if self.route_ttl() == 0 {
            return Err(NodeError::Config(
                "advertisement interval shorter than a route tick".into(),
            ));
        }
        if self.packet_ttl == 0 || self.packet_ttl > 15 {
            return Err(NodeError::Config(format!(
                "packet ttl {} does not fit in 4 bits",
                self.packet_ttl
            )));
        }
        Ok(())
    }
}

/// Builder for a [`NodeConfig`].
#[derive(Debug, Default)]
pub struct NodeConfigBuilder {
    config: NodeConfig,
}

impl NodeConfigBuilder {
    /// Start from the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fix the initial address.
    pub fn address(mut self, address: Address) -> Self {
        self.config.address = Some(address);
        self
    }

    /// Set the HELLO period.
    pub fn hello_interval(mut self, interval: Duration) -> Self {
        self.config.hello_interval = interval;
        self
    }

    /// Set the delay before the first HELLO.
    pub fn hello_delay(mut self, delay: Duration) -> Self {
        self.config.hello_delay = delay;
        self
    }

    /// Set how long beacon sequences are remembered.
    pub fn sequence_expiry(mut self, expiry: Duration) -> Self {
        self.config.sequence_expiry = expiry;
        self
    }

    /// Set the advertisement period.
    pub fn advertisement_interval(mut self, interval: Duration) -> Self {
        self.config.advertisement_interval = interval;
        self
    }

    /// Set the delay before the first advertisement.
    pub fn advertisement_delay(mut self, delay: Duration) -> Self {
        self.config.advertisement_delay = delay;
        self
    }

    /// Set the route aging tick.
    pub fn route_tick(mut self, tick: Duration) -> Self {
        self.config.route_tick = tick;
        self
    }

    /// Set the hop budget of originated frames.
    pub fn packet_ttl(mut self, ttl: u8) -> Self {
        self.config.packet_ttl = ttl;
        self
    }

    /// Set the known-node liveness counter.
    pub fn known_node_ttl(mut self, ttl: u32) -> Self {
        self.config.known_node_ttl = ttl;
        self
    }

    /// Set the liveness decay period.
    pub fn known_node_decay(mut self, period: Duration) -> Self {
        self.config.known_node_decay = period;
        self
    }

    /// Set the transport settings.
    pub fn transport(mut self, transport: TransportConfig) -> Self {
        self.config.transport = transport;
        self
    }

    /// Set the CSMA/CA backoff.
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.config.backoff = backoff;
        self
    }

    /// Set the send queue capacity.
    pub fn mac_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.mac_queue_capacity = capacity;
        self
    }

    /// Set the event channel capacity.
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    /// Validate and return the configuration.
    pub fn build(self) -> Result<NodeConfig, NodeError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
