//! Several nodes over an in-memory shared medium.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use meshchat::link::{Backoff, FrameTag, LinkChannels, LinkFrame};
use meshchat::{Address, Node, NodeConfig, NodeConfigBuilder, NodeEvent};
use tokio::sync::mpsc;

/// A broadcast channel where each node only hears its listed neighbors.
///
/// Every delivered frame is wrapped in BUSY and FREE so the receivers' MACs
/// see the medium in use.
struct Medium {
    channels: Vec<LinkChannels>,
    /// Long frames still to be dropped, per sending node.
    drops: Vec<Arc<AtomicUsize>>,
}

fn medium(neighbors: Vec<Vec<usize>>) -> Medium {
    let (hub_tx, mut hub_rx) = mpsc::channel::<(usize, LinkFrame)>(256);
    let mut deliver = Vec::new();
    let mut channels = Vec::new();
    let mut drops = Vec::new();

    for index in 0..neighbors.len() {
        let (out_tx, mut out_rx) = mpsc::channel::<LinkFrame>(64);
        let (in_tx, in_rx) = mpsc::channel::<LinkFrame>(256);
        let hub_tx = hub_tx.clone();
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if hub_tx.send((index, frame)).await.is_err() {
                    break;
                }
            }
        });
        deliver.push(in_tx);
        channels.push(LinkChannels::new(out_tx, in_rx));
        drops.push(Arc::new(AtomicUsize::new(0)));
    }

    let hub_drops = drops.clone();
    tokio::spawn(async move {
        while let Some((from, frame)) = hub_rx.recv().await {
            if matches!(frame, LinkFrame::Data(_)) {
                let pending = &hub_drops[from];
                if pending
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
                {
                    continue;
                }
            }
            for &to in &neighbors[from] {
                for f in [
                    LinkFrame::Control(FrameTag::Busy),
                    frame.clone(),
                    LinkFrame::Control(FrameTag::Free),
                ] {
                    let _ = deliver[to].send(f).await;
                }
            }
        }
    });

    Medium { channels, drops }
}

fn config(address: Address) -> NodeConfig {
    NodeConfigBuilder::new()
        .address(address)
        .backoff(Backoff {
            slot: Duration::from_millis(10),
            slots: 1..5,
        })
        .build()
        .unwrap()
}

async fn settle(what: &str, done: impl Fn() -> bool) {
    for _ in 0..120 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    panic!("{what} did not settle");
}

async fn next_message(events: &mut mpsc::Receiver<NodeEvent>) -> (Address, String) {
    let wait = async {
        loop {
            match events.recv().await {
                Some(NodeEvent::MessageReceived { source, text }) => return (source, text),
                Some(_) => continue,
                None => panic!("event channel closed"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(120), wait)
        .await
        .expect("message within timeout")
}

#[tokio::test(start_paused = true)]
async fn test_two_nodes_exchange_long_message() {
    let mut medium = medium(vec![vec![1], vec![0]]);
    let b_link = medium.channels.pop().unwrap();
    let a_link = medium.channels.pop().unwrap();
    let (a, _a_events) = Node::start(config(3), a_link).unwrap();
    let (b, mut b_events) = Node::start(config(9), b_link).unwrap();

    settle("discovery", || {
        a.reachable_nodes() == vec![9] && b.reachable_nodes() == vec![3]
    })
    .await;
    assert_eq!(a.route(9).unwrap().cost, 1);

    let text = "The quick brown fox jumps over the lazy dog, twice.";
    assert_eq!(a.send_message(text, 9).unwrap().len(), 1);
    assert_eq!(next_message(&mut b_events).await, (3, text.to_string()));

    settle("acknowledgment", || a.connections().is_empty()).await;
}

#[tokio::test(start_paused = true)]
async fn test_lost_chunk_is_retransmitted() {
    let mut medium = medium(vec![vec![1], vec![0]]);
    let b_link = medium.channels.pop().unwrap();
    let a_link = medium.channels.pop().unwrap();
    let (a, _a_events) = Node::start(config(3), a_link).unwrap();
    let (b, mut b_events) = Node::start(config(9), b_link).unwrap();
    settle("discovery", || {
        a.reachable_nodes() == vec![9] && b.reachable_nodes() == vec![3]
    })
    .await;

    medium.drops[0].store(1, Ordering::SeqCst);
    let sent_at = tokio::time::Instant::now();
    a.send_message("dropped once", 9).unwrap();

    assert_eq!(next_message(&mut b_events).await, (3, "dropped once".to_string()));
    assert!(sent_at.elapsed() >= Duration::from_secs(25));
    settle("acknowledgment", || a.connections().is_empty()).await;
}

#[tokio::test(start_paused = true)]
async fn test_message_crosses_relay() {
    // a - b - c, with a and c out of range of each other.
    let mut medium = medium(vec![vec![1], vec![0, 2], vec![1]]);
    let c_link = medium.channels.pop().unwrap();
    let b_link = medium.channels.pop().unwrap();
    let a_link = medium.channels.pop().unwrap();
    let (a, mut a_events) = Node::start(config(1), a_link).unwrap();
    let (_b, _b_events) = Node::start(config(2), b_link).unwrap();
    let (c, _c_events) = Node::start(config(4), c_link).unwrap();

    settle("routing", || {
        c.route(1).is_some_and(|r| r.next_hop == 2 && r.cost == 2) && a.route(4).is_some()
    })
    .await;
    settle("discovery", || c.known_nodes().contains(&1)).await;

    c.send_message("over the hill", 1).unwrap();
    assert_eq!(next_message(&mut a_events).await, (4, "over the hill".to_string()));
    settle("acknowledgment", || c.connections().is_empty()).await;
}

#[tokio::test(start_paused = true)]
async fn test_broadcast_reaches_every_known_node() {
    let mut medium = medium(vec![vec![1, 2], vec![0, 2], vec![0, 1]]);
    let c_link = medium.channels.pop().unwrap();
    let b_link = medium.channels.pop().unwrap();
    let a_link = medium.channels.pop().unwrap();
    let (a, _a_events) = Node::start(config(1), a_link).unwrap();
    let (_b, mut b_events) = Node::start(config(5), b_link).unwrap();
    let (_c, mut c_events) = Node::start(config(11), c_link).unwrap();

    settle("discovery", || a.reachable_nodes() == vec![5, 11]).await;
    assert_eq!(a.send_message("hello all", meshchat::BROADCAST_ADDRESS).unwrap().len(), 2);
    assert_eq!(next_message(&mut b_events).await, (1, "hello all".to_string()));
    assert_eq!(next_message(&mut c_events).await, (1, "hello all".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_address_is_resolved() {
    let mut medium = medium(vec![vec![1], vec![0]]);
    let y_link = medium.channels.pop().unwrap();
    let x_link = medium.channels.pop().unwrap();

    // Only x beacons, so y is the one that spots the clash.
    let (x, mut x_events) = Node::start(config(3), x_link).unwrap();
    let quiet = NodeConfig {
        hello_delay: Duration::from_secs(3600),
        ..config(3)
    };
    let (y, _y_events) = Node::start(quiet, y_link).unwrap();

    let changed = tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            match x_events.recv().await {
                Some(NodeEvent::AddressChanged { old, new }) => return (old, new),
                Some(_) => continue,
                None => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("address change within timeout");

    assert_eq!(changed.0, 3);
    assert_ne!(changed.1, 3);
    assert_ne!(changed.1, meshchat::BROADCAST_ADDRESS);
    assert_eq!(x.local_address(), changed.1);
    assert_eq!(y.local_address(), 3);
    assert!(x.route(changed.1).is_some_and(|r| r.self_route));
    assert!(x.route(3).is_none_or(|r| !r.self_route));
}
