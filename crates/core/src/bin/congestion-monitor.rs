use anyhow::Context;
use clap::Parser;
use congestion_monitor::{
    capture::TsharkCapture,
    config::{set_logger, ConfigArgs},
    render::TerminalRenderer,
    Monitor,
};

async fn run(args: ConfigArgs) -> anyhow::Result<()> {
    let json = args.json;
    let config = args.build()?;
    tracing::info!(
        interface = %config.capture.interface,
        filter = %config.capture.display_filter,
        history_length = config.sampler.history_length,
        interval_ms = config.sampler.sample_interval_ms,
        rtt_threshold_ms = config.sampler.rtt_threshold_ms,
        event_threshold = config.sampler.congestion_event_threshold,
        "Starting congestion monitor"
    );

    let capture = TsharkCapture::new(
        config.capture.interface.clone(),
        config.capture.display_filter.clone(),
        config.capture.tshark_path.clone(),
    )?;
    let stream = capture.start().context("failed starting packet capture")?;

    let monitor = Monitor::start(config.sampler, stream)?;
    let renderer = tokio::spawn(TerminalRenderer::new(json).run(monitor.frames(), tokio::io::stdout()));

    tokio::signal::ctrl_c()
        .await
        .context("failed listening for ctrl-c")?;
    tracing::info!("Shutting down...");

    let report = monitor.stop().await;
    if let Some(sampler) = &report.sampler {
        tracing::info!(
            ticks = sampler.ticks,
            congestion_events = sampler.history.events_recorded(),
            "Monitor stopped"
        );
    }
    match renderer.await {
        Ok(Err(err)) => tracing::warn!(error = %err, "Renderer failed"),
        Err(err) => tracing::warn!(error = %err, "Renderer task failed"),
        Ok(Ok(())) => {}
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = ConfigArgs::parse();
    set_logger(args.log_level);
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()?;
    rt.block_on(run(args))
}
