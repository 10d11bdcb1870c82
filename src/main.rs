use anyhow::Context;
use clap::Parser;
use rtvoice::audio::{AudioBackend, WavBackend};
use rtvoice::config::Cli;
use rtvoice::console;
use rtvoice::events::Ui;
use rtvoice::helper::HelperClient;
use rtvoice::tools::{builtin_tools, Lights};
use rtvoice::{Command, SessionRunner};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = cli.settings().context("invalid configuration")?;
    info!("Starting rtvoice: {:?}", settings.endpoint);

    let (ui_tx, ui_rx) = mpsc::unbounded_channel();
    let ui = Ui::new(ui_tx);
    let renderer = tokio::spawn(console::render_events(ui_rx));

    let helper = HelperClient::new(&cli.helper_url).context("invalid helper URL")?;
    let tools = builtin_tools(Lights::new(ui.clone()), helper)?;

    let audio: Arc<dyn AudioBackend> = audio_backend(&cli);
    let runner = SessionRunner::new(settings, tools, audio, ui)?;

    let (cmd_tx, cmd_rx) = mpsc::channel(16);
    cmd_tx.send(Command::Start).await?;
    tokio::spawn(console::read_commands(cmd_tx));

    runner.run(cmd_rx).await?;
    let _ = renderer.await;
    Ok(())
}

#[cfg(feature = "pulse")]
fn audio_backend(cli: &Cli) -> Arc<dyn AudioBackend> {
    if cli.pulse {
        return Arc::new(rtvoice::audio::PulseAudio::default());
    }
    Arc::new(WavBackend::new(cli.input_wav.clone(), cli.output_wav.clone()))
}

#[cfg(not(feature = "pulse"))]
fn audio_backend(cli: &Cli) -> Arc<dyn AudioBackend> {
    Arc::new(WavBackend::new(cli.input_wav.clone(), cli.output_wav.clone()))
}
