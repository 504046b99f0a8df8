use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use colored::Colorize;
use echo_core::engines::{DynEngine, TcpEchoConfig, TcpEchoEngine, UdpEchoConfig, UdpEchoEngine};
use echo_core::{events, port, EchoTask, EngineEvent, Transport};
use tracing::info;

use crate::ui;

pub async fn execute(
    port_text: &str,
    transport: Transport,
    bind: IpAddr,
    grace: Duration,
    capacity: usize,
    json: bool,
) -> Result<i32> {
    // Invalid input is refused right here; nothing reaches the event
    // stream for it.
    let port = match port::require(port_text) {
        Ok(port) => port,
        Err(err) => {
            ui::print_error(&err.to_string());
            return Ok(2);
        }
    };

    let engine: DynEngine = match transport {
        Transport::Tcp => Arc::new(TcpEchoEngine::new(TcpEchoConfig {
            bind_ip: bind,
            drain_grace: grace,
            ..Default::default()
        })),
        Transport::Udp => Arc::new(UdpEchoEngine::new(UdpEchoConfig { bind_ip: bind })),
    };

    let (sink, mut stream) = events::channel(capacity);
    let task = Arc::new(EchoTask::new(engine, port, sink));
    task.start()?;
    info!(%transport, port, "echo task launched");

    // Ctrl-C is the stop affordance; the render loop below keeps running
    // until the task's completion signal comes through.
    let stopper = task.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stopper.stop();
        }
    });

    // The single consumer: every line below renders on this task, never on
    // a network worker.
    let mut failed = false;
    while let Some(event) = stream.recv().await {
        if json {
            println!("{}", serde_json::to_string(&event)?);
        }
        match event {
            EngineEvent::TaskStarted => {
                if !json {
                    ui::print_info(&format!("{transport} echo task started, Ctrl-C to stop"));
                }
            }
            EngineEvent::Log(log) => {
                if !json {
                    println!(
                        "{} {}",
                        log.timestamp.format("%H:%M:%S%.3f").to_string().dimmed(),
                        log.text
                    );
                }
            }
            EngineEvent::TaskEnded { error } => {
                if let Some(error) = error {
                    failed = true;
                    if !json {
                        ui::print_error(&error);
                    }
                } else if !json {
                    ui::print_success("server terminated cleanly");
                }
                break;
            }
        }
    }

    task.join().await;
    Ok(if failed { 1 } else { 0 })
}
