//! Critpath CLI - critical-path analysis of execution traces

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use clap::{Parser, Subcommand};
use colored::Colorize;

use critpath::{
    AnalysisConfig, ChannelCommunicator, CpmOptions, CritPathError, CriticalPathFinding,
    CriticalPathSummary, DistributedReplayCoordinator, FixSuggestion, MemoryPolicy, Result,
    Trace, TraceDistributor,
};

#[derive(Parser)]
#[command(name = "critpath")]
#[command(about = "Critpath - critical-path analysis of parallel execution traces")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute the critical path of the program recorded in a JSON file
    Analyze {
        /// Path to a JSON array of traces, one per execution process
        file: PathBuf,

        /// Memory policy (store, full_recompute, partial_recompute[:N])
        #[arg(short, long)]
        policy: Option<String>,

        /// In-degree threshold for partial_recompute
        #[arg(long)]
        threshold: Option<usize>,

        /// Per-process distance between checkpoints
        #[arg(long)]
        checkpoint_interval: Option<usize>,

        /// Record memory statistics
        #[arg(long)]
        track_memory: bool,

        /// Split the analysis over N in-process replay processes
        #[arg(long)]
        rps: Option<usize>,

        /// Config file (defaults to ~/.config/critpath/config.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Show how execution processes are assigned to replay processes
    Distribute {
        /// Number of execution processes
        #[arg(long)]
        eps: u32,

        /// Number of replay processes
        #[arg(long)]
        rps: Option<usize>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Analyze {
            file,
            policy,
            threshold,
            checkpoint_interval,
            track_memory,
            rps,
            config,
        } => load_config(config.as_deref()).and_then(|mut cfg| {
            if let Some(p) = policy {
                cfg.memory_policy = p;
            }
            if let Some(t) = threshold {
                cfg.partial_threshold = t;
            }
            if let Some(k) = checkpoint_interval {
                cfg.checkpoint_interval = k;
            }
            cfg.enable_memory_tracking |= track_memory;
            if rps.is_some() {
                cfg.replay_processes = rps;
            }
            cfg.validate()?;
            analyze(&file, &cfg)
        }),
        Commands::Distribute { eps, rps } => load_config(None).and_then(|cfg| {
            let rps = rps.or(cfg.replay_processes).ok_or(
                CritPathError::MissingDistributionParameter {
                    parameter: "num_replay_processes",
                },
            )?;
            distribute(eps, rps)
        }),
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        if let Some(suggestion) = e.fix_suggestion() {
            eprintln!("  {} {}", "Fix:".yellow(), suggestion);
        }
        std::process::exit(1);
    }
}

fn load_config(path: Option<&Path>) -> Result<AnalysisConfig> {
    let config = match path {
        Some(path) => AnalysisConfig::load_from(path)?,
        None => AnalysisConfig::load()?,
    };
    config.with_env()
}

fn read_traces(path: &Path) -> Result<Vec<Trace>> {
    let json = fs::read_to_string(path)?;
    let mut traces: Vec<Trace> =
        serde_json::from_str(&json).map_err(|e| CritPathError::TraceParse {
            path: path.display().to_string(),
            details: e.to_string(),
        })?;
    for trace in &mut traces {
        trace.link_messages();
    }
    Ok(traces)
}

fn analyze(file: &Path, config: &AnalysisConfig) -> Result<()> {
    let options = config.cpm_options()?;
    let traces = read_traces(file)?;

    println!(
        "{} {} trace(s) from {} | policy: {}",
        "→".cyan(),
        traces.len(),
        file.display(),
        options.policy.to_string().cyan().bold()
    );

    match config.replay_processes {
        Some(rps) if rps > 1 => {
            let summaries = analyze_distributed(traces, rps, &options)?;
            print_summaries(&summaries);
        }
        _ if traces.len() > 1 => {
            let eps = execution_processes(&traces);
            let mut coordinator = DistributedReplayCoordinator::serial();
            coordinator.distribute_traces(traces, eps, 1)?;
            let summaries = coordinator.analyze_critical_paths(&options)?.unwrap_or_default();
            print_summaries(&summaries);
        }
        _ => analyze_single(traces, &options),
    }
    Ok(())
}

/// Highest execution process id plus one
fn execution_processes(traces: &[Trace]) -> u32 {
    traces
        .iter()
        .map(|t| t.info().execution_process_id + 1)
        .max()
        .unwrap_or(0)
}

fn analyze_single(traces: Vec<Trace>, options: &CpmOptions) {
    for trace in traces {
        let mut finder = CriticalPathFinding::new(Some(Arc::new(trace)), options.clone());
        finder.run();
        print_summaries(&[finder.summary()]);

        if let Some(stats) = finder.stats().filter(|_| options.enable_memory_tracking) {
            println!(
                "    {} peak ~{} bytes | forward {:.3}s | backward {:.3}s",
                "mem:".dimmed(),
                stats.peak_bytes,
                stats.forward_time_s,
                stats.backward_time_s
            );
            if options.policy != MemoryPolicy::Store {
                println!(
                    "    {} {} stored, {} recomputed, {} checkpoints",
                    "recompute:".dimmed(),
                    stats.stored_events,
                    stats.recomputed_events,
                    stats.checkpoint_count
                );
            }
        }
    }
}

fn analyze_distributed(
    traces: Vec<Trace>,
    rps: usize,
    options: &CpmOptions,
) -> Result<Vec<CriticalPathSummary>> {
    let eps = execution_processes(&traces);

    let results: Vec<Result<Option<Vec<CriticalPathSummary>>>> = thread::scope(|s| {
        let handles: Vec<_> = ChannelCommunicator::cluster(rps)
            .into_iter()
            .map(|comm| {
                let traces = traces.clone();
                s.spawn(move || {
                    let mut coordinator = DistributedReplayCoordinator::new(Arc::new(comm));
                    coordinator.distribute_traces(traces, eps, rps)?;
                    coordinator.analyze_critical_paths(options)
                })
            })
            .collect();
        handles
            .into_iter()
            .enumerate()
            .map(|(rank, h)| {
                h.join()
                    .unwrap_or(Err(CritPathError::PeerDisconnected { rank }))
            })
            .collect()
    });

    let mut root = Vec::new();
    for result in results {
        if let Some(summaries) = result? {
            root = summaries;
        }
    }
    Ok(root)
}

fn print_summaries(summaries: &[CriticalPathSummary]) {
    for summary in summaries {
        let ep = summary
            .execution_process_id
            .map_or_else(|| "?".to_string(), |ep| ep.to_string());
        println!(
            "  {} EP {}: length {} | {} critical / {} events",
            "✓".green(),
            ep.bold(),
            format!("{:.3}", summary.length).cyan(),
            summary.critical_events,
            summary.events
        );
    }
}

fn distribute(eps: u32, rps: usize) -> Result<()> {
    let mut distributor = TraceDistributor::with_counts(eps, rps);
    let balance = distributor.load_balance_info()?;

    println!(
        "{} {} execution process(es) over {} replay process(es)",
        "→".cyan(),
        eps,
        rps
    );
    for (rank, count) in balance.counts.iter().enumerate() {
        let processes = distributor.processes_of(rank)?;
        println!("  RP {:>4}: {:>6} EP(s) {:?}", rank, count, processes);
    }
    println!("  imbalance: {}", balance.imbalance());
    Ok(())
}
