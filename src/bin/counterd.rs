//! counterd - multi-building people counter daemon
//!
//! This daemon:
//! 1. Polls the control backend for the buildings that should be counted
//! 2. Runs one worker thread per running building (video → detect → track → count)
//! 3. Pushes ENTER/EXIT counts to the backend on a fixed interval
//! 4. Serves annotated live streams and health on the stream API

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;

use people_counter::{
    api::ApiServer,
    config::CounterdConfig,
    detect::BackendRegistry,
    pipeline::LocalPipelineFactory,
    report::HttpReportingClient,
    supervisor::Supervisor,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Multi-building doorway people counter")]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "COUNTER_CONFIG")]
    config: Option<PathBuf>,

    /// Override the stream/health listen address.
    #[arg(long)]
    stream_addr: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = CounterdConfig::load_from(args.config.as_deref())?;
    if let Some(addr) = args.stream_addr {
        cfg.stream.addr = addr;
    }

    let registry = Arc::new(BackendRegistry::with_builtin());
    log::info!(
        "detector={} (registered: {}), videos_dir={}",
        cfg.detector,
        registry.list().join(", "),
        cfg.videos_dir.display()
    );
    let factory = LocalPipelineFactory::new(cfg.videos_dir.clone(), registry, &cfg.detector);
    let client = HttpReportingClient::new(&cfg.reporting_config())?;
    log::info!(
        "control backend: {} (updates to {})",
        client.control_url(),
        client.update_url()
    );

    let mut supervisor = Supervisor::new(
        Arc::new(client),
        Arc::new(factory),
        cfg.supervisor_config()?,
    );

    let api_handle = ApiServer::new(cfg.api_config(), supervisor.registry()).spawn()?;
    log::info!(
        "stream api on {} (update interval {:?}, flip={})",
        api_handle.addr,
        cfg.update_interval,
        cfg.flip_video
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    let result = supervisor.run(&rx);
    log::info!("shutdown signal received, stopping stream api...");
    api_handle.stop()?;
    result
}
