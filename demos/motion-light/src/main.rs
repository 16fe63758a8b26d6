//! # Motion Light Demo
//!
//! Drives a declarative motion-activated lamp end to end: motion turns the
//! lamp on, quiet dims it, and a 2-second timeout switches it off unless new
//! motion arrives first.

use anyhow::Result;
use async_trait::async_trait;
use carousel_core::{ActionDef, ActionDispatcher, Engine, ModelConfig};
use std::time::Duration;

// ============================================================================
// Dispatcher (pretend service calls)
// ============================================================================

struct PrintingDispatcher;

#[async_trait]
impl ActionDispatcher for PrintingDispatcher {
    async fn dispatch(&self, entity_id: &str, action: &ActionDef) -> Result<()> {
        println!("  [{entity_id}] calling {} with {}", action.service, action.data);
        Ok(())
    }
}

// ============================================================================
// Configuration (what a loader would hand the engine)
// ============================================================================

fn lamp_config() -> ModelConfig {
    serde_json::from_value(serde_json::json!({
        "initial": "off",
        "states": [
            {"name": "off", "description": "lamp is dark"},
            {"name": "on", "description": "lamp at full brightness"},
            {"name": "dimmed", "description": "lamp winding down"},
        ],
        "transitions": [
            {
                "trigger": "motion",
                "source": "*",
                "dest": "on",
                "actions": [
                    {"service": "light.turn_on", "data": {"brightness": 255}},
                ],
            },
            {
                "trigger": "no_motion",
                "source": "on",
                "dest": "dimmed",
                "timeout": {"seconds": 2.0, "dest": "off"},
                "actions": [
                    {"service": "light.turn_on", "data": {"brightness": 80}},
                ],
            },
            {
                "trigger": "timeout",
                "source": "dimmed",
                "dest": "off",
                "actions": [
                    {"service": "light.turn_off"},
                ],
            },
        ],
    }))
    .unwrap()
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let engine = Engine::builder().dispatcher(PrintingDispatcher).build();
    engine.reload([("hallway_lamp".to_string(), lamp_config())]).await;

    // Print every lifecycle event as it happens.
    let mut events = engine.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            println!("  event: {}", serde_json::to_string(&event).unwrap());
        }
    });

    println!("Someone walks by...");
    engine.trigger("hallway_lamp", "motion").await?;

    println!("Hallway goes quiet...");
    engine.trigger("hallway_lamp", "no_motion").await?;

    println!("Waiting for the timeout to switch the lamp off...");
    tokio::time::sleep(Duration::from_millis(2500)).await;

    let snapshot = engine.snapshot("hallway_lamp").await?;
    println!(
        "Final state: {} ({})",
        snapshot.current_state, snapshot.current_state_description
    );
    println!("Recent transitions:");
    for record in &snapshot.recent_transitions {
        println!("  {} --{}--> {}", record.from, record.trigger, record.to);
    }

    Ok(())
}
