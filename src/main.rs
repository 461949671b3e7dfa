use std::future::pending;
use std::time::Duration;

use clap::Parser;
use colored::*;
use tokio::time::{sleep_until, Instant};
use tokio_stream::StreamExt;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use loadwatch::cli::{summary_lines, Args, SummaryLine};
use loadwatch::display::ChartOptions;
use loadwatch::{
    Aggregator, AggregatorSettings, BackendClientBuilder, BrowserSample, InfraSample, LoadSample,
    LoadwatchConfig, MetricFamily, Sample, SeriesSnapshot, StatusEvent, StatusFeed,
    StompSettings, StompTransport, SubjectStatus,
};

/// Grace period after the final fetch's own timeout before exiting.
const FINAL_GRACE: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("loadwatch=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = LoadwatchConfig::load(args.config.as_deref())?;
    args.apply_overrides(&mut config);
    config.validate()?;

    match args.family {
        MetricFamily::Load => follow::<LoadSample>(&args, &config).await?,
        MetricFamily::Browser => follow::<BrowserSample>(&args, &config).await?,
        MetricFamily::Infra => follow::<InfraSample>(&args, &config).await?,
    }
    Ok(())
}

async fn follow<S: Sample + SummaryLine>(args: &Args, config: &LoadwatchConfig) -> loadwatch::Result<()> {
    let subject = args.subject();
    let run = args.run_kind();
    let backend = BackendClientBuilder::from_config(config).run_kind(run).build();
    let transport = StompTransport::new(StompSettings::from_config(config));

    let status = if args.terminal {
        SubjectStatus::Terminal
    } else {
        match backend.fetch_run_status(run, subject).await {
            Ok(current) => {
                info!(%subject, %run, status = %current, "run status");
                current.subject_status()
            }
            Err(e) => {
                warn!(error = %e, %subject, "run status lookup failed, assuming the run is live");
                SubjectStatus::Active
            }
        }
    };

    let aggregator: Aggregator<S> = Aggregator::spawn(
        transport.clone(),
        backend,
        AggregatorSettings::from_config(config),
    );
    let mut updates = aggregator.updates();
    let mut connected = aggregator.connected();
    aggregator.observe(Some(subject), status);

    let mut status_feed =
        (status == SubjectStatus::Active).then(|| StatusFeed::open(&transport, run, subject));
    let settle = config.server.request_timeout() + FINAL_GRACE;
    let mut deadline = (status == SubjectStatus::Terminal).then(|| Instant::now() + settle);
    let options = ChartOptions::from(&config.display);

    println!(
        "{} {} of {} run {} ({})",
        "loadwatch".bold(),
        S::FAMILY.to_string().cyan(),
        run,
        subject.to_string().bold(),
        match status {
            SubjectStatus::Active => "live".green(),
            SubjectStatus::Terminal => "finished".yellow(),
        }
    );

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("interrupted");
                break;
            }
            _ = wait_deadline(deadline) => {
                info!(%subject, "final snapshot settled");
                break;
            }
            snapshot = updates.next() => match snapshot {
                Some(snapshot) => print_snapshot(&snapshot, options, *connected.borrow()),
                None => break,
            },
            changed = connected.changed() => {
                if changed.is_err() {
                    break;
                }
                let up = *connected.borrow_and_update();
                if up {
                    println!("{} stream connected", "●".green());
                } else {
                    println!("{} stream disconnected, retrying", "●".red());
                }
            }
            event = next_status(&mut status_feed) => match event {
                Some(StatusEvent::Status(run)) => {
                    println!("{} run is {}", "»".blue(), run.to_string().bold());
                    if run.is_terminal() {
                        aggregator.finalize();
                        status_feed = None;
                        deadline = Some(Instant::now() + settle);
                    }
                }
                Some(StatusEvent::Verdict(verdict)) => {
                    println!("{} verdict {}", "»".blue(), verdict.bold());
                }
                None => status_feed = None,
            },
        }
    }
    Ok(())
}

async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => pending().await,
    }
}

async fn next_status(feed: &mut Option<StatusFeed>) -> Option<StatusEvent> {
    match feed {
        Some(feed) => feed.next().await,
        None => pending().await,
    }
}

fn print_snapshot<S: Sample + SummaryLine>(
    snapshot: &SeriesSnapshot<S>,
    options: ChartOptions,
    connected: bool,
) {
    let dot = if connected { "●".green() } else { "○".dimmed() };
    for (label, summary, retained) in summary_lines(snapshot, options) {
        match label {
            Some(label) => println!("{dot} {} {summary} {}", label.cyan(), format!("[{retained}]").dimmed()),
            None => println!("{dot} {summary} {}", format!("[{retained}]").dimmed()),
        }
    }
}
