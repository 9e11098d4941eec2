use anyhow::Context;
use crabcam_bridge::{
    BridgeConfig, EventPump, GatewayClient, MediaProducer, MountpointPorts, PumpExit,
    SignalingRelay,
};
use std::env;
use std::path::PathBuf;

/// Stand-in producer that reports what the video pipeline would do.
struct LoggingProducer;

impl MediaProducer for LoggingProducer {
    fn configure(&mut self, ports: MountpointPorts) {
        log::info!(
            "Media producer configured: video={:?} video_control={:?} data={:?}",
            ports.video,
            ports.video_control,
            ports.data
        );
    }

    fn set_streaming(&mut self, enabled: bool) {
        if enabled {
            log::info!("Viewer connected, resuming frame push");
        } else {
            log::info!("No viewer, pausing frame push");
        }
    }
}

struct LoggingRelay;

impl SignalingRelay for LoggingRelay {
    fn forward(&mut self, message: &str) {
        log::debug!("Relay <- gateway: {}", message);
    }
}

struct Args {
    config: PathBuf,
    check: bool,
}

fn parse_args() -> anyhow::Result<Args> {
    let args: Vec<String> = env::args().collect();
    let mut parsed = Args {
        config: BridgeConfig::default_path(),
        check: false,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                let path = args.get(i).context("--config needs a path")?;
                parsed.config = PathBuf::from(path);
            }
            "--check" => parsed.check = true,
            "-h" | "--help" => {
                println!("Usage: crabcam-bridge [--config <path>] [--check]");
                std::process::exit(0);
            }
            other => anyhow::bail!("Unknown argument: {}", other),
        }
        i += 1;
    }
    Ok(parsed)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    crabcam_bridge::init_logging();
    let args = parse_args()?;

    let config = BridgeConfig::load_layered(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {}", e))?;

    if args.check {
        println!("{:#?}", config);
        return Ok(());
    }

    let (params, timings) = config.connection_params();
    let mut client =
        GatewayClient::new(params, timings).with_stream_settings(config.stream_settings());
    let mut events = client
        .take_events()
        .context("gateway event channel already taken")?;

    let ports = client.start().await.context("starting gateway client")?;
    log::info!("Mountpoint ready: {:?}", ports);

    let mut pump = EventPump::new(LoggingProducer, LoggingRelay);
    pump.configure(ports);

    tokio::select! {
        exit = pump.run(&mut events) => match exit {
            PumpExit::Disconnected => log::warn!("Gateway link lost, shutting down"),
            PumpExit::ChannelClosed => log::info!("Event channel closed"),
        },
        _ = tokio::signal::ctrl_c() => log::info!("Interrupted, shutting down"),
    }

    let stats = client.stats();
    client.stop().await;
    log::info!(
        "Forwarded {} of {} gateway messages ({} malformed, {} request timeouts)",
        stats.messages_forwarded,
        stats.messages_received,
        stats.messages_malformed,
        stats.requests_timed_out
    );
    Ok(())
}
