#![allow(dead_code)]

use qnetsim::World;
use qnetsim::config::{ConnectionConfig, SimulationConfig};
use qnetsim::events::{RecordingSink, SimContext};
use std::sync::Arc;
use std::time::Duration;

pub fn recording_world(name: &str) -> (World, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::new());
    let ctx = SimContext::new(SimulationConfig::default(), sink.clone());
    (World::new(name, ctx), sink)
}

pub fn link(latency_ms: f64, bandwidth_bps: f64, mtu: Option<usize>) -> ConnectionConfig {
    ConnectionConfig {
        latency_ms,
        bandwidth_bps,
        mtu,
        ..Default::default()
    }
}

/// Ticks every network by hand until `done` holds or `steps` run out.
pub async fn step_until(world: &World, steps: usize, done: impl Fn() -> bool) -> bool {
    for _ in 0..steps {
        world.tick_all();
        if done() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    done()
}

/// Lets the running tick loops work until `done` holds or `limit` passes.
pub async fn wait_until(limit: Duration, done: impl Fn() -> bool) -> bool {
    let step = Duration::from_millis(10);
    let mut waited = Duration::ZERO;
    while waited < limit {
        if done() {
            return true;
        }
        tokio::time::sleep(step).await;
        waited += step;
    }
    done()
}
