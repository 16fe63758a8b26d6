//! Randomized trigger storms across concurrent instances.
//!
//! These don't assert specific paths; they check the structural invariants
//! that must hold no matter how triggers interleave: the current state is
//! always a declared one, the recent-transition buffer never exceeds its
//! capacity, and the engine survives garbage triggers without poisoning any
//! instance.

use crate::{Engine, ModelConfig, RECENT_CAPACITY};

fn ring_machine() -> ModelConfig {
    serde_json::from_value(serde_json::json!({
        "initial": "s0",
        "states": [{"name": "s0"}, {"name": "s1"}, {"name": "s2"}, {"name": "s3"}],
        "transitions": [
            {"trigger": "step", "source": "s0", "dest": "s1"},
            {"trigger": "step", "source": "s1", "dest": "s2"},
            {"trigger": "step", "source": "s2", "dest": "s3"},
            {"trigger": "step", "source": "s3", "dest": "s0"},
            {"trigger": "back", "source": "*", "dest": "s0"},
        ],
    }))
    .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_trigger_storm_preserves_invariants() {
    let instance_count = 8;
    let triggers_per_task = 200;

    let engine = Engine::builder().build();
    let configs: Vec<(String, ModelConfig)> = (0..instance_count)
        .map(|n| (format!("machine_{n}"), ring_machine()))
        .collect();
    engine.reload(configs).await;

    let mut tasks = Vec::new();
    for task_id in 0..instance_count {
        let engine = engine.clone();
        tasks.push(tokio::spawn(async move {
            let mut rng = fastrand::Rng::with_seed(task_id as u64);
            for _ in 0..triggers_per_task {
                let entity_id = format!("machine_{}", rng.usize(0..instance_count));
                let trigger = match rng.usize(0..4) {
                    0 => "back",
                    1 | 2 => "step",
                    _ => "garbage",
                };
                engine.trigger(&entity_id, trigger).await.unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    for n in 0..instance_count {
        let snapshot = engine.snapshot(&format!("machine_{n}")).await.unwrap();
        assert!(
            snapshot.available_states.contains(&snapshot.current_state),
            "instance {n} ended in undeclared state {}",
            snapshot.current_state
        );
        assert!(snapshot.recent_transitions.len() <= RECENT_CAPACITY);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn interleaved_admin_ops_never_corrupt_state() {
    let engine = Engine::builder().build();
    engine
        .reload([("m".to_string(), ring_machine())])
        .await;

    let mut tasks = Vec::new();
    for task_id in 0..4u64 {
        let engine = engine.clone();
        tasks.push(tokio::spawn(async move {
            let mut rng = fastrand::Rng::with_seed(task_id);
            for _ in 0..100 {
                match rng.usize(0..3) {
                    0 => {
                        engine.trigger("m", "step").await.unwrap();
                    }
                    1 => {
                        engine.reset("m").await.unwrap();
                    }
                    _ => {
                        engine.set_state("m", "s2").await.unwrap();
                    }
                }
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let snapshot = engine.snapshot("m").await.unwrap();
    assert!(snapshot.available_states.contains(&snapshot.current_state));
}
