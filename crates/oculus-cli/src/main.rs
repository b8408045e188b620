//! Oculus CLI tools: session links, relay diagnostics, loopback demo.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use oculus_common::{parse_share_url, OculusConfig, PeerIdentity, SessionId};
use oculus_host::{BroadcastState, Broadcaster, ChannelControlSink, HostContext};
use oculus_media::{DummyCapture, QualityPreset};
use oculus_peer::{
    HttpIceFetcher, IceFetcher, LoopbackNetwork, StaticIceFetcher, TokioScheduler,
};
use oculus_viewer::{HeadlessPlayback, ViewState, Viewer, ViewerContext};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::info;

const DEMO_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "oculus")]
#[command(about = "Oculus screen-broadcast tools")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Mint a new session and print its host identity and share link
    Session {
        /// Base URL of the viewer app
        #[arg(long, env = "OCULUS_VIEWER_BASE_URL")]
        viewer_base_url: Option<String>,

        /// Inspect an existing share link instead of minting a session
        #[arg(long)]
        link: Option<String>,
    },

    /// Fetch relay credentials and print the ICE server list
    Ice {
        /// Relay credential endpoint
        #[arg(long, env = "OCULUS_TURN_URL")]
        turn_url: Option<String>,
    },

    /// Run a broadcaster and viewers in-process over the loopback transport
    Demo {
        /// Number of viewers to join
        #[arg(short, long, default_value_t = 2)]
        viewers: usize,

        /// Quality preset (1080p, 720p, 480p, 360p)
        #[arg(short, long, default_value = "720p")]
        quality: QualityPreset,

        /// Capture without tab audio
        #[arg(long)]
        no_audio: bool,

        /// Seconds to stay live once every viewer is streaming
        #[arg(long, default_value_t = 1)]
        hold: u64,
    },

    /// Show version information
    Version,
}

fn main() -> Result<()> {
    oculus_common::init_tracing();

    let args = Args::parse();
    let mut config = OculusConfig::from_env()?;

    match args.command {
        Command::Session {
            viewer_base_url,
            link,
        } => {
            if let Some(url) = viewer_base_url {
                config.viewer_base_url = url;
                config.validate()?;
            }
            let session_id = match link {
                Some(link) => parse_share_url(&link)?,
                None => SessionId::mint(),
            };
            println!("Session:    {}", session_id);
            println!("Host ID:    {}", PeerIdentity::host(&session_id));
            println!("Share link: {}", config.share_url(&session_id));
        }
        Command::Ice { turn_url } => {
            if let Some(url) = turn_url {
                config.turn_endpoint = Some(url);
                config.validate()?;
            }
            let fetcher = HttpIceFetcher::new(config.turn_url(), config.ice_fetch_timeout());
            println!("Fetching ICE servers from {}...", fetcher.endpoint());

            let servers = runtime()?.block_on(async {
                fetcher.fetch(&CancellationToken::new()).await.servers()
            });
            let servers = servers.unwrap_or_default();
            if servers.is_empty() {
                println!("No ICE servers returned");
            } else {
                println!("{}", serde_json::to_string_pretty(&servers)?);
            }
        }
        Command::Demo {
            viewers,
            quality,
            no_audio,
            hold,
        } => {
            config.default_quality = quality.to_string();
            runtime()?.block_on(demo(config, viewers, !no_audio, Duration::from_secs(hold)))?;
        }
        Command::Version => {
            println!("oculus {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?)
}

async fn demo(config: OculusConfig, viewers: usize, audio: bool, hold: Duration) -> Result<()> {
    let net = LoopbackNetwork::new();
    let session_id = SessionId::mint();
    let (control, mut control_rx) = ChannelControlSink::new();

    let (broadcaster, host) = Broadcaster::new(
        session_id,
        config.clone(),
        HostContext {
            transport: Arc::new(net.clone()),
            ice: Arc::new(StaticIceFetcher::default()),
            scheduler: Arc::new(TokioScheduler),
            control: Arc::new(control),
        },
        Arc::new(DummyCapture::granting(audio)),
    );
    let host_task = tokio::spawn(broadcaster.run());

    let live = timeout(
        DEMO_TIMEOUT,
        host.wait_for(|s| matches!(s.state, BroadcastState::Live | BroadcastState::Error)),
    )
    .await
    .context("broadcast did not go live")?
    .context("broadcaster exited early")?;
    if let Some(error) = live.error {
        anyhow::bail!("broadcast failed: {}", error);
    }
    info!("live at {} ({})", live.share_url, live.quality);

    let mut handles = Vec::with_capacity(viewers);
    let mut tasks = Vec::with_capacity(viewers);
    for _ in 0..viewers {
        let (viewer, handle) = Viewer::new(
            session_id,
            config.clone(),
            ViewerContext {
                transport: Arc::new(net.clone()),
                ice: Arc::new(StaticIceFetcher::default()),
                scheduler: Arc::new(TokioScheduler),
                playback: Arc::new(HeadlessPlayback::new()),
            },
            None,
        );
        tasks.push(tokio::spawn(viewer.run()));
        handles.push(handle);
    }

    for (n, handle) in handles.iter().enumerate() {
        let status = timeout(
            DEMO_TIMEOUT,
            handle.wait_for(|s| s.state == ViewState::Streaming),
        )
        .await
        .with_context(|| format!("viewer {} never started streaming", n + 1))?
        .with_context(|| format!("viewer {} exited early", n + 1))?;
        info!("viewer {}: {}", n + 1, status.message);
    }

    let status = host.status();
    println!(
        "{} viewer(s) watching {} at {} (audio: {})",
        status.viewer_count,
        status.session_id,
        status.quality,
        if status.audio_enabled { "on" } else { "off" }
    );

    tokio::time::sleep(hold).await;
    host.stop();
    host_task.await??;
    if let Ok(message) = control_rx.try_recv() {
        info!("control channel: {:?}", message);
    }

    for handle in &handles {
        let ended = timeout(
            DEMO_TIMEOUT,
            handle.wait_for(|s| s.state == ViewState::Disconnected),
        )
        .await
        .is_ok();
        if !ended {
            info!("viewer did not observe the end of the stream");
        }
        handle.close();
    }
    for task in tasks {
        task.await??;
    }
    println!("Broadcast stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_demo_parses_quality_preset() {
        let args = Args::try_parse_from(["oculus", "demo", "-q", "480p", "--viewers", "3"]).unwrap();
        match args.command {
            Command::Demo {
                viewers, quality, ..
            } => {
                assert_eq!(viewers, 3);
                assert_eq!(quality, QualityPreset::P480);
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(Args::try_parse_from(["oculus", "demo", "-q", "4k"]).is_err());
    }

    #[tokio::test]
    async fn test_demo_runs_over_loopback() {
        let config = OculusConfig {
            retry_delay_ms: 50,
            ..Default::default()
        };
        demo(config, 2, false, Duration::ZERO).await.unwrap();
    }
}
