//! A running node: every layer wired together over one channel.

use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use super::config::NodeConfig;
use crate::codec::{AddressHeader, DynamicAddressingHeader};
use crate::core::{Address, MessageSink, NodeError};
use crate::link::{FrameTag, LinkChannels, LinkFrame, Mac};
use crate::network::{
    AddressingOutcome, DynamicAddressing, NodeDirectory, PacketOutcome, RouteEntry, Router,
    random_address,
};
use crate::transport::{ConnectionId, ConnectionRole, TransportEngine};

/// Events reported by a running node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    /// A complete message arrived.
    MessageReceived {
        /// Sender address.
        source: Address,
        /// Message text.
        text: String,
    },
    /// The local address was contested and changed.
    AddressChanged {
        /// Previous address.
        old: Address,
        /// New address.
        new: Address,
    },
    /// The channel accepted the connection.
    LinkReady,
    /// The channel went away; the node no longer receives.
    LinkClosed {
        /// Why.
        reason: String,
    },
}

/// Forwards reassembled messages into the event channel.
struct EventSink {
    events: mpsc::Sender<NodeEvent>,
}

impl MessageSink for EventSink {
    fn deliver_message(&self, text: String, source: Address) {
        emit(&self.events, NodeEvent::MessageReceived { source, text });
    }
}

fn emit(events: &mpsc::Sender<NodeEvent>, event: NodeEvent) {
    match events.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(event)) => warn!(?event, "event queue full, dropping"),
        Err(mpsc::error::TrySendError::Closed(_)) => trace!("no event listener"),
    }
}

type Transport = TransportEngine<Router, EventSink>;

/// One node of the mesh.
///
/// # Example
///
/// ```rust,no_run
/// use meshchat::link::ChannelSocket;
/// use meshchat::node::{Node, NodeConfig, NodeEvent};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let addr = "127.0.0.1:8954".parse()?;
/// let (_socket, link) = ChannelSocket::connect(addr, 1000, "token").await?;
/// let (node, mut events) = Node::start(NodeConfig::default(), link)?;
///
/// node.send_message("hello everyone", meshchat::BROADCAST_ADDRESS)?;
/// while let Some(event) = events.recv().await {
///     if let NodeEvent::MessageReceived { source, text } = event {
///         println!("Message from {source}: {text}");
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct Node {
    router: Arc<Router>,
    transport: Transport,
    tasks: Vec<JoinHandle<()>>,
}

impl Node {
    /// Build every layer over `link` and start the background tasks.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        config: NodeConfig,
        link: LinkChannels,
    ) -> Result<(Self, mpsc::Receiver<NodeEvent>), NodeError> {
        config.validate()?;
        let LinkChannels { outbound, inbound } = link;
        let address = config.address.unwrap_or_else(|| random_address(&[]));

        let (mac, worker) = Mac::new(outbound, config.backoff.clone(), config.mac_queue_capacity);
        let directory = Arc::new(NodeDirectory::new(address, config.known_node_ttl));
        let router = Arc::new(Router::new(
            directory,
            mac.clone(),
            config.route_ttl(),
            config.packet_ttl,
        ));
        let addressing = Arc::new(DynamicAddressing::new(
            Arc::clone(&router),
            mac.clone(),
            config.sequence_expiry,
        ));
        let (event_tx, event_rx) = mpsc::channel(config.event_capacity.max(1));
        let sink = Arc::new(EventSink {
            events: event_tx.clone(),
        });
        let transport = TransportEngine::new(Arc::clone(&router), sink, config.transport.clone());

        let dispatcher = Dispatcher {
            mac,
            router: Arc::clone(&router),
            addressing: Arc::clone(&addressing),
            transport: transport.clone(),
            events: event_tx,
        };

        let mut tasks = vec![
            tokio::spawn(worker.run()),
            tokio::spawn(dispatcher.run(inbound)),
        ];

        tasks.push(spawn_periodic(config.hello_delay, config.hello_interval, {
            let addressing = Arc::clone(&addressing);
            move || {
                if let Err(e) = addressing.send_hello() {
                    warn!(error = %e, "hello skipped this round");
                }
            }
        }));
        tasks.push(spawn_periodic(
            config.advertisement_delay,
            config.advertisement_interval,
            {
                let router = Arc::clone(&router);
                move || router.advertise_or_log()
            },
        ));
        tasks.push(spawn_periodic(config.route_tick, config.route_tick, {
            let router = Arc::clone(&router);
            move || {
                router.tick();
            }
        }));
        tasks.push(spawn_periodic(
            config.known_node_decay_delay,
            config.known_node_decay,
            {
                let router = Arc::clone(&router);
                move || {
                    for address in router.directory().decay() {
                        info!(address, "node went silent");
                        router.forget_node(address);
                    }
                }
            },
        ));

        info!(address, route_ttl = config.route_ttl(), "node started");
        Ok((
            Self {
                router,
                transport,
                tasks,
            },
            event_rx,
        ))
    }

    /// Send `text` to `destination`, or to every known node for the
    /// broadcast address.
    pub fn send_message(
        &self,
        text: &str,
        destination: Address,
    ) -> Result<Vec<ConnectionId>, NodeError> {
        Ok(self.transport.send_message(text, destination)?)
    }

    /// Current local address.
    pub fn local_address(&self) -> Address {
        self.router.local_address()
    }

    /// Nodes heard from recently.
    pub fn known_nodes(&self) -> Vec<Address> {
        self.router.directory().known_nodes()
    }

    /// Known nodes that currently have a route.
    pub fn reachable_nodes(&self) -> Vec<Address> {
        self.router.reachable_nodes()
    }

    /// Snapshot of the route table.
    pub fn routes(&self) -> BTreeMap<Address, RouteEntry> {
        self.router.table().snapshot()
    }

    /// Route to `destination`, if any.
    pub fn route(&self, destination: Address) -> Option<RouteEntry> {
        self.router.route(destination)
    }

    /// Live transport connections.
    pub fn connections(&self) -> Vec<(ConnectionId, ConnectionRole, Address)> {
        self.transport.connections()
    }

    /// Stop every background task and drop all connections.
    pub fn shutdown(&mut self) {
        if self.tasks.is_empty() {
            return;
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.transport.shutdown();
        info!(address = self.local_address(), "node stopped");
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Run `tick` every `period`, starting after `delay`.
fn spawn_periodic<F>(delay: Duration, period: Duration, tick: F) -> JoinHandle<()>
where
    F: Fn() + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + delay, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            tick();
        }
    })
}

/// Routes inbound channel frames to the layer that owns them.
struct Dispatcher {
    mac: Mac,
    router: Arc<Router>,
    addressing: Arc<DynamicAddressing>,
    transport: Transport,
    events: mpsc::Sender<NodeEvent>,
}

impl Dispatcher {
    async fn run(self, mut inbound: mpsc::Receiver<LinkFrame>) {
        while let Some(frame) = inbound.recv().await {
            if let ControlFlow::Break(reason) = self.handle(frame) {
                info!(%reason, "channel closed");
                emit(&self.events, NodeEvent::LinkClosed { reason });
                return;
            }
        }
        debug!("inbound channel ended");
        emit(
            &self.events,
            NodeEvent::LinkClosed {
                reason: "channel disconnected".into(),
            },
        );
    }

    fn handle(&self, frame: LinkFrame) -> ControlFlow<String> {
        match frame {
            LinkFrame::Control(tag) => return self.on_control(tag),
            LinkFrame::Data(bytes) => self.on_long_frame(&bytes),
            LinkFrame::DataShort(bytes) => self.on_short_frame(&bytes),
        }
        ControlFlow::Continue(())
    }

    fn on_control(&self, tag: FrameTag) -> ControlFlow<String> {
        if let Some(free) = tag.medium_free() {
            self.mac.set_medium_free(free);
            return ControlFlow::Continue(());
        }
        match tag {
            FrameTag::Hello | FrameTag::TokenAccepted => {
                debug!(?tag, "channel ready");
                emit(&self.events, NodeEvent::LinkReady);
            }
            FrameTag::TokenRejected => return ControlFlow::Break("token rejected".into()),
            FrameTag::End => return ControlFlow::Break("channel ended".into()),
            other => warn!(tag = ?other, "unexpected control frame"),
        }
        ControlFlow::Continue(())
    }

    fn on_long_frame(&self, bytes: &[u8]) {
        let header = match AddressHeader::from_bytes(bytes) {
            Ok(header) => header,
            Err(e) => {
                warn!(error = %e, len = bytes.len(), "malformed long frame dropped");
                return;
            }
        };
        match self.router.on_packet(header) {
            Ok(PacketOutcome::Deliver { source, segment }) => {
                self.transport.on_segment(source, segment);
            }
            Ok(outcome) => trace!(?outcome, "long frame handled"),
            Err(e) => warn!(error = %e, "long frame not handled"),
        }
    }

    fn on_short_frame(&self, bytes: &[u8]) {
        let beacon = match DynamicAddressingHeader::from_bytes(bytes) {
            Ok(beacon) => beacon,
            Err(e) => {
                warn!(error = %e, len = bytes.len(), "malformed short frame dropped");
                return;
            }
        };
        if beacon.conflict && beacon.address != self.router.local_address() {
            self.router.remove_route(beacon.address);
        }
        match self.addressing.on_beacon(beacon) {
            Ok(AddressingOutcome::AddressChanged { old, new }) => {
                emit(&self.events, NodeEvent::AddressChanged { old, new });
            }
            Ok(outcome) => trace!(?outcome, address = beacon.address, "beacon handled"),
            Err(e) => warn!(error = %e, "beacon not handled"),
        }
    }
}
