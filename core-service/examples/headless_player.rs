//! Drive the engine without a UI.
//!
//! Uses the embedded store and a simulated device that reports each load
//! ready immediately. Run with `cargo run -p core-service --example headless_player`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::playback::{DeviceEvent, LoadRequest, MediaDevice};
use core_library::models::{Context, NewItem};
use core_runtime::events::EventStream;
use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
use core_runtime::{CoreConfig, CoreEvent, EventBus};
use core_service::Command;
use tokio::sync::mpsc;

struct SimulatedDevice {
    position: Mutex<f64>,
    events: mpsc::UnboundedSender<DeviceEvent>,
}

#[async_trait]
impl MediaDevice for SimulatedDevice {
    async fn load(&self, request: LoadRequest) -> BridgeResult<()> {
        *self.position.lock().unwrap() = request.start_position;
        let _ = self.events.send(DeviceEvent::Ready {
            token: request.token,
            duration_seconds: Some(180.0),
        });
        Ok(())
    }

    async fn play(&self) -> BridgeResult<()> {
        Ok(())
    }

    async fn pause(&self) -> BridgeResult<()> {
        Ok(())
    }

    async fn seek(&self, position_seconds: f64) -> BridgeResult<()> {
        *self.position.lock().unwrap() = position_seconds;
        Ok(())
    }

    async fn set_volume(&self, _volume: f32) -> BridgeResult<()> {
        Ok(())
    }

    async fn current_time(&self) -> BridgeResult<f64> {
        Ok(*self.position.lock().unwrap())
    }

    async fn duration(&self) -> BridgeResult<Option<f64>> {
        Ok(Some(180.0))
    }

    async fn unload(&self) -> BridgeResult<()> {
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging(LoggingConfig::default().with_format(LogFormat::Compact))?;

    let (tx, device_events) = mpsc::unbounded_channel();
    let device = Arc::new(SimulatedDevice {
        position: Mutex::new(0.0),
        events: tx,
    });

    let config = CoreConfig::default();
    let bus = EventBus::new(config.event_buffer_size);
    let mut events = EventStream::new(bus.subscribe());
    let player = core_service::bootstrap(config, device, device_events, bus).await?;

    let (commands, rx) = mpsc::channel(16);
    let engine = tokio::spawn(player.run(rx));

    commands
        .send(Command::UploadItems {
            context: Context::Ungrouped,
            items: vec![
                NewItem::from_bytes("intro.mp3", vec![0u8; 1024]),
                NewItem::from_bytes("chapter-01.mp3", vec![1u8; 2048]),
            ],
        })
        .await?;
    commands.send(Command::Play).await?;
    commands.send(Command::SkipForward).await?;
    commands.send(Command::Next).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    commands.send(Command::Shutdown).await?;
    engine.await??;

    for event in events.drain() {
        match event {
            CoreEvent::Notification(n) => println!("notification: {}", n.message),
            other => println!("{:?}", other),
        }
    }
    Ok(())
}
