use std::time::Duration;

use clap::{Parser, Subcommand};

use vox_broker::BrokerConfig;
use vox_telemetry::{init_telemetry, TelemetryConfig};
use vox_worker::{EchoPipeline, WorkerConfig};

#[derive(Parser)]
#[command(name = "vox", about = "Streaming speech-recognition session broker")]
struct Cli {
    /// Emit JSON logs instead of the human-readable format.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the session broker.
    Broker {
        #[arg(short, long, default_value_t = 8888)]
        port: u16,
        /// Seconds of client silence before EOS is synthesized.
        #[arg(long, default_value_t = 10)]
        silence_timeout: u64,
        /// Seconds an in-call session may idle between utterances.
        #[arg(long, default_value_t = 60)]
        call_timeout: u64,
    },
    /// Run a decoding worker against a broker.
    ///
    /// Ships with the loopback echo pipeline; real deployments embed
    /// `vox-worker` with their own `DecoderPipeline` implementation.
    Worker {
        /// Broker worker endpoint.
        #[arg(
            short,
            long,
            default_value = "ws://localhost:8888/worker/ws/speech"
        )]
        uri: String,
        /// Seconds between reconnection attempts.
        #[arg(long, default_value_t = 5)]
        connect_backoff: u64,
        /// Seconds of decoder silence before the utterance is cancelled.
        #[arg(long, default_value_t = 10)]
        silence_timeout: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_telemetry(TelemetryConfig {
        json: cli.json_logs,
        ..Default::default()
    });

    match cli.command {
        Command::Broker {
            port,
            silence_timeout,
            call_timeout,
        } => {
            let config = BrokerConfig {
                port,
                silence_timeout: Duration::from_secs(silence_timeout),
                call_timeout: Duration::from_secs(call_timeout),
                ..Default::default()
            };
            let handle = vox_broker::start(config).await?;
            tracing::info!(port = handle.port, "Broker ready");

            tokio::signal::ctrl_c().await?;
            tracing::info!("Shutting down");
            handle.shutdown();
        }
        Command::Worker {
            uri,
            connect_backoff,
            silence_timeout,
        } => {
            let config = WorkerConfig {
                broker_uri: uri,
                connect_backoff: Duration::from_secs(connect_backoff),
                silence_timeout: Duration::from_secs(silence_timeout),
                ..Default::default()
            };
            tracing::info!(uri = %config.broker_uri, "Starting worker");
            vox_worker::link::run(config, EchoPipeline::new).await;
        }
    }

    Ok(())
}
