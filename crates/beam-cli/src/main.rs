mod cli;
mod config;
mod shutdown;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use beam_core::EventKind;
use beam_engine::{DefaultPathBuilder, FilesystemPersist, JobRegistry, Router, UpstreamContext};
use beam_events::EventBus;
use beam_providers::stub::{StubImageGenProvider, StubTextProvider, StubVisionProvider, StubVlmProvider};
use beam_providers::{ImageGenProvider, TextProvider, VLMProvider, VisionProvider};
use beam_upstream::GpuCoordinator;

use crate::cli::Cli;
use crate::config::{apply_rate_limit_overrides, job_params_from_cli, load_pricing_table};
use crate::shutdown::{ShutdownController, ShutdownEvent, spawn_ctrl_c_handler};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let pricing = load_pricing_table(cli.pricing_table.as_deref())?;
    let job_params = job_params_from_cli(&cli)?;

    let registry = Arc::new(JobRegistry::new());
    let bus = Arc::new(EventBus::default());
    let persist = Arc::new(FilesystemPersist::new(DefaultPathBuilder::new(
        cli.output_dir.clone(),
    )));

    let upstream = Arc::new(UpstreamContext::new(Arc::new(GpuCoordinator::new(None)), pricing));
    apply_rate_limit_overrides(&upstream.rate_gates, &cli.rate_limit)?;

    let providers = beam_engine::ProviderSet {
        text: Arc::new(StubTextProvider) as Arc<dyn TextProvider>,
        image: Arc::new(StubImageGenProvider) as Arc<dyn ImageGenProvider>,
        vision: Arc::new(StubVisionProvider) as Arc<dyn VisionProvider>,
        vlm: Arc::new(StubVlmProvider) as Arc<dyn VLMProvider>,
    };

    let router = Router::new(registry, bus, persist, upstream, providers);

    let submitted = router.submit_job(job_params)?;
    println!(
        "job {} started: n={} m={} maxIterations={}",
        submitted.job_id, submitted.params.n, submitted.params.m, submitted.params.max_iterations
    );

    let mut subscription = router.subscribe(submitted.job_id)?;

    let shutdown = Arc::new(ShutdownController::new());
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::unbounded_channel::<ShutdownEvent>();
    spawn_ctrl_c_handler(shutdown.clone(), shutdown_tx);

    loop {
        tokio::select! {
            ev = shutdown_rx.recv() => {
                match ev {
                    Some(ShutdownEvent::Graceful) => {
                        eprintln!("stop requested, cancelling job {} (press Ctrl+C again to exit immediately)", submitted.job_id);
                        router.cancel(submitted.job_id);
                    }
                    Some(ShutdownEvent::Immediate) => {
                        eprintln!("stop requested again, exiting immediately");
                        return Ok(ExitCode::from(130));
                    }
                    None => {}
                }
            }
            event = subscription.next() => {
                let Some(event) = event else {
                    eprintln!("event stream closed before a terminal event was observed");
                    return Ok(ExitCode::FAILURE);
                };
                match event.kind {
                    EventKind::Complete { metadata } => {
                        println!("complete: status={} errors={:?}", metadata.status, metadata.errors);
                        return Ok(ExitCode::SUCCESS);
                    }
                    EventKind::Cancelled => {
                        println!("cancelled");
                        return Ok(ExitCode::FAILURE);
                    }
                    EventKind::Error { message } => {
                        eprintln!("error: {message}");
                        return Ok(ExitCode::FAILURE);
                    }
                    EventKind::Candidate { candidate } => {
                        println!("candidate {} updated", candidate.id);
                    }
                    EventKind::Ranked { iteration, candidate_id, rank } => {
                        println!("iteration {iteration}: {candidate_id} ranked #{rank}");
                    }
                    EventKind::Iteration { iteration, running_cost } => {
                        println!(
                            "iteration {iteration} done, running cost: text={:.4} vision={:.4} imageGen={:.4}",
                            running_cost.text, running_cost.vision, running_cost.image_gen
                        );
                    }
                    EventKind::Step { stage, status, .. } => {
                        println!("step {stage}: {status}");
                    }
                    EventKind::Operation { capability, message } => {
                        println!("operation [{capability}]: {message}");
                    }
                    EventKind::GlobalRanking { rankings } => {
                        println!("global ranking: {rankings:?}");
                    }
                    EventKind::Subscribed | EventKind::Lag { .. } => {}
                }
            }
        }
    }
}
