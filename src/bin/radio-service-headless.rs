// Headless variant: prints every session event as a JSON line
use anyhow::Result;
use clap::Parser;
use log::info;
use radio_service::notification::{ChannelListener, LogListener};
use radio_service::{build_service, start_stream, Cli};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let config = cli.service_config();

    let mut service = build_service(&config)?;
    let (listener, mut events) = ChannelListener::new();
    service.add_listener(Arc::new(listener));
    service.add_listener(Arc::new(LogListener));
    let handle = service.spawn();

    if let Err(e) = start_stream(&handle, &config, &cli).await {
        let _ = handle.shutdown().await;
        return Err(e);
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => println!("{}", serde_json::to_string(&event)?),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
        }
    }

    handle.shutdown().await?;
    Ok(())
}
