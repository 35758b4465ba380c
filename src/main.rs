use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use color_eyre::eyre::{Result, WrapErr};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use subagent_trace::{
    config::DEFAULT_BROADCAST_TOPIC,
    detector::SubagentDetector,
    model::{NormalizedMessage, ParentSessionId, Topic, ToolId},
    watcher::{self, LogEvent, LogFollower},
    AggregatorConfig, LocalBus, OpenOptions, SessionAggregator, SessionHandle, TranscriptView,
};

/// How long a one-shot run waits for a session to finish processing what
/// was already published.
const SETTLE_TIMEOUT: Duration = Duration::from_millis(500);

/// Follow sub-agent sessions in a Claude `stream-json` output log.
#[derive(Debug, Parser)]
#[command(name = "subagent-trace", version)]
struct Args {
    /// Log file with the parent agent's stream-json output
    log: PathBuf,

    /// Parent session id (adopted from the log when omitted)
    #[arg(long)]
    session_id: Option<String>,

    /// Also attribute broadcast output to sub-agents heuristically
    #[arg(long)]
    fallback: bool,

    /// Keep following the log until Ctrl-C
    #[arg(long)]
    follow: bool,

    /// TOML file with aggregator settings
    #[arg(long)]
    config: Option<PathBuf>,

    /// Milliseconds to keep a finished session subscribed
    #[arg(long)]
    grace_ms: Option<u64>,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn format_entry(tool_id: &ToolId, msg: &NormalizedMessage) -> String {
    let label = match &msg.subtype {
        Some(subtype) => format!("{}/{}", msg.kind.as_str(), subtype.as_str()),
        None => msg.kind.as_str().to_string(),
    };
    format!("[{}] {}: {}", tool_id, label, msg.display_text())
}

/// Print entries as they land; ends when the session can no longer change.
async fn print_transcript(mut view: TranscriptView, tool_id: ToolId) {
    let mut printed = 0;
    loop {
        for msg in view.since(printed) {
            println!("{}", format_entry(&tool_id, &msg));
            printed += 1;
        }
        if !view.changed().await {
            break;
        }
    }
    for msg in view.since(printed) {
        println!("{}", format_entry(&tool_id, &msg));
    }
    println!("[{}] state: {}", tool_id, view.state());
}

struct Tracker {
    bus: LocalBus,
    detector: SubagentDetector,
    options: OpenOptions,
    sessions: Vec<SessionHandle>,
    printers: Vec<JoinHandle<()>>,
}

impl Tracker {
    /// Route one log line. A new sub-agent gets its aggregator before its
    /// start event is published.
    async fn feed(&mut self, line: &str) -> Result<()> {
        for emission in self.detector.inspect(line) {
            if let Some(identity) = emission.started.clone() {
                let handle = SessionAggregator::open(&self.bus, identity.clone(), self.options.clone())
                    .await
                    .wrap_err_with(|| format!("failed to open aggregator for {identity}"))?;
                self.printers
                    .push(tokio::spawn(print_transcript(handle.view(), identity.tool_id.clone())));
                self.sessions.push(handle);
            }
            emission.publish(&self.bus);
        }
        Ok(())
    }

    async fn settle(&self) {
        for handle in &self.sessions {
            let mut view = handle.view();
            if tokio::time::timeout(SETTLE_TIMEOUT, view.wait_terminal()).await.is_err() {
                info!(session = %handle.identity(), state = %view.state(), "session still running");
            }
        }
    }

    async fn shutdown(self) {
        for handle in self.sessions {
            let identity = handle.identity().clone();
            if let Err(e) = handle.close().await {
                warn!(session = %identity, error = %e, "close failed");
            }
        }
        for printer in self.printers {
            let _ = printer.await;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_logging();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => AggregatorConfig::load(path)?,
        None => AggregatorConfig::default(),
    };
    if let Some(ms) = args.grace_ms {
        config = config.with_grace_period(Some(Duration::from_millis(ms)));
    }

    let broadcast = config
        .broadcast_topics()
        .into_iter()
        .next()
        .unwrap_or_else(|| Topic::broadcast(DEFAULT_BROADCAST_TOPIC));
    let parent = args
        .session_id
        .filter(|id| !id.is_empty())
        .map(ParentSessionId::new);

    let mut tracker = Tracker {
        bus: LocalBus::new(),
        detector: SubagentDetector::new(parent, broadcast),
        options: OpenOptions::new().with_fallback(args.fallback).with_config(config),
        sessions: Vec::new(),
        printers: Vec::new(),
    };

    let result = if args.follow {
        follow(&mut tracker, &args.log).await
    } else {
        replay(&mut tracker, &args.log).await
    };

    tracker.shutdown().await;
    result
}

async fn replay(tracker: &mut Tracker, log: &std::path::Path) -> Result<()> {
    let lines = watcher::read_all_lines(log).wrap_err_with(|| format!("failed to read {}", log.display()))?;
    for line in &lines {
        tracker.feed(line).await?;
    }
    tracker.settle().await;
    Ok(())
}

async fn follow(tracker: &mut Tracker, log: &std::path::Path) -> Result<()> {
    let mut follower = LogFollower::start(log).wrap_err("failed to start log watcher")?;
    info!(log = %log.display(), "following log, Ctrl-C to stop");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("interrupted");
                break;
            }
            event = follower.next() => match event {
                Some(LogEvent::Line(line)) => tracker.feed(&line).await?,
                Some(LogEvent::Error(e)) => warn!(error = %e, "log read failed"),
                None => break,
            },
        }
    }
    Ok(())
}
