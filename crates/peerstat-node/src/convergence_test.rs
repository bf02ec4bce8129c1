//! Multi-Node Gossip Convergence Tests
//!
//! Several nodes share one in-memory hub, act on their own dashboards, and
//! must end up with identical state without any coordinator.
//!
//! # The Tests
//!
//! 1. A comment typed on one node shows up on the other, and only the
//!    counters the author touched move
//! 2. Three nodes acting on different charts converge, then stop talking
//! 3. A late joiner is brought up to date by the greeting on connect
//! 4. Without greetings, a late joiner only learns state on the next change

use crate::dashboard::{
    COUNTS, ENTER_KEY, FUNNEL, PAGE_LOADS, SCROLLS, SPEED, STEP_CLICK, STEP_VIEW, SUBMITS,
    TEXTBOX_CLICKS, VIEWS,
};
use crate::mesh::MeshStats;
use crate::node::{Node, NodeConfig, NodeHandle, RenderFn};
use crate::transport::{MemoryTransport, PeerId};
use peerstat_metrics::{AggregateSnapshot, Rect, Viewport};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};

const DEADLINE: Duration = Duration::from_secs(5);
const POLL: Duration = Duration::from_millis(5);

struct TestNode {
    handle: NodeHandle,
    renders: Arc<AtomicUsize>,
}

fn spawn_node(hub: &MemoryTransport, id: PeerId, id_space: PeerId, greet: bool) -> TestNode {
    let config = NodeConfig {
        id_space,
        peer_id: Some(id),
        greet_new_peers: greet,
        ..NodeConfig::default()
    };
    let renders = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&renders);
    let render: RenderFn = Box::new(move |_| {
        counter.fetch_add(1, Ordering::Relaxed);
    });

    let (node, handle) = Node::new(config, Arc::new(hub.clone()), render).unwrap();
    tokio::spawn(node.run());
    TestNode { handle, renders }
}

async fn snapshot_until(
    handle: &NodeHandle,
    what: &str,
    done: impl Fn(&AggregateSnapshot) -> bool,
) -> AggregateSnapshot {
    timeout(DEADLINE, async {
        loop {
            let snapshot = handle.snapshot().await.unwrap();
            if done(&snapshot) {
                return snapshot;
            }
            sleep(POLL).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
}

async fn stats_until(handle: &NodeHandle, done: impl Fn(&MeshStats) -> bool) -> MeshStats {
    timeout(DEADLINE, async {
        loop {
            let stats = handle.stats().await.unwrap();
            if done(&stats) {
                return stats;
            }
            sleep(POLL).await;
        }
    })
    .await
    .expect("timed out waiting for connections")
}

async fn converged(nodes: &[TestNode]) -> AggregateSnapshot {
    timeout(DEADLINE, async {
        loop {
            let mut snapshots = Vec::with_capacity(nodes.len());
            for node in nodes {
                snapshots.push(node.handle.snapshot().await.unwrap());
            }
            if snapshots.windows(2).all(|pair| pair[0] == pair[1]) {
                return snapshots.swap_remove(0);
            }
            sleep(POLL).await;
        }
    })
    .await
    .expect("nodes did not converge")
}

fn count(snapshot: &AggregateSnapshot, store: &str, label: &str) -> u64 {
    snapshot.get(store).unwrap().data.get(label).copied().unwrap_or_default()
}

fn submit(handle: &NodeHandle, store: &str, text: &str) {
    handle.text_field_change(store, text).unwrap();
    handle.key_up(store, ENTER_KEY).unwrap();
}

fn view(handle: &NodeHandle, store: &str) {
    handle
        .visibility_check(store, Rect::new(0.0, 0.0, 10.0, 10.0), Viewport::new(100.0, 100.0))
        .unwrap();
}

#[tokio::test]
async fn comment_reaches_the_other_peer() {
    let hub = MemoryTransport::new();
    let a = spawn_node(&hub, 0, 2, true);
    let b = spawn_node(&hub, 1, 2, true);

    submit(&a.handle, VIEWS, "lala");

    let seen = snapshot_until(&b.handle, "the comment on B", |s| {
        s.get(VIEWS).unwrap().comments == ["lala".to_string()]
    })
    .await;

    // The author never viewed or focused anything.
    for store in [VIEWS, FUNNEL, COUNTS, SPEED] {
        assert_eq!(count(&seen, VIEWS, store), 0);
    }
    assert_eq!(count(&seen, FUNNEL, STEP_VIEW), 0);
    assert_eq!(count(&seen, FUNNEL, STEP_CLICK), 0);
    assert_eq!(count(&seen, COUNTS, SUBMITS), 1);
    assert_eq!(count(&seen, COUNTS, PAGE_LOADS), 1);
}

#[tokio::test]
async fn three_nodes_converge_then_go_quiet() {
    println!("\n=== 3-NODE GOSSIP CONVERGENCE ===");
    let hub = MemoryTransport::new();
    let nodes: Vec<_> = (0..3).map(|id| spawn_node(&hub, id, 3, true)).collect();

    nodes[0].handle.scroll().unwrap();
    nodes[0].handle.scroll().unwrap();
    submit(&nodes[1].handle, COUNTS, "only one author");
    view(&nodes[2].handle, SPEED);
    nodes[2].handle.focus(SPEED).unwrap();

    let state = converged(&nodes).await;
    println!("Converged: {:?}", state);

    assert_eq!(count(&state, COUNTS, SCROLLS), 2);
    assert_eq!(count(&state, COUNTS, SUBMITS), 1);
    assert_eq!(count(&state, COUNTS, TEXTBOX_CLICKS), 1);
    assert_eq!(count(&state, VIEWS, SPEED), 1);
    assert_eq!(count(&state, FUNNEL, STEP_VIEW), 1);
    assert_eq!(count(&state, FUNNEL, STEP_CLICK), 1);
    assert_eq!(state.get(SPEED).unwrap().data.len(), 1);
    assert_eq!(state.get(COUNTS).unwrap().comments, ["only one author".to_string()]);

    // Every payload triggers a render, so stable render counts mean no traffic.
    sleep(Duration::from_millis(100)).await;
    let before: Vec<_> = nodes.iter().map(|n| n.renders.load(Ordering::Relaxed)).collect();
    sleep(Duration::from_millis(200)).await;
    let after: Vec<_> = nodes.iter().map(|n| n.renders.load(Ordering::Relaxed)).collect();
    println!("Renders: {:?} -> {:?}", before, after);
    assert_eq!(before, after, "peers kept gossiping after converging");
}

#[tokio::test]
async fn late_joiner_is_greeted() {
    let hub = MemoryTransport::new();
    let a = spawn_node(&hub, 0, 2, true);
    a.handle.scroll().unwrap();
    submit(&a.handle, FUNNEL, "before you arrived");
    let expected = a.handle.snapshot().await.unwrap();

    let b = spawn_node(&hub, 1, 2, true);
    let seen = snapshot_until(&b.handle, "A's state on B", |s| *s == expected).await;
    assert_eq!(count(&seen, COUNTS, SCROLLS), 1);
}

#[tokio::test]
async fn without_greeting_state_waits_for_next_change() {
    let hub = MemoryTransport::new();
    let a = spawn_node(&hub, 0, 2, false);
    a.handle.scroll().unwrap();
    // A's dial to peer 1 happened before anyone listened there and never opens.
    stats_until(&a.handle, |s| s.connections == 2).await;

    let b = spawn_node(&hub, 1, 2, false);
    // Both ends of B's self-dial plus its dial to A, and A's end of that link.
    stats_until(&b.handle, |s| s.connections == 3).await;
    stats_until(&a.handle, |s| s.connections == 3).await;

    let quiet = b.handle.snapshot().await.unwrap();
    assert_eq!(count(&quiet, COUNTS, SCROLLS), 0);

    a.handle.scroll().unwrap();
    snapshot_until(&b.handle, "the second scroll on B", |s| {
        count(s, COUNTS, SCROLLS) == 2
    })
    .await;
}
