use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use log::{info, warn};
use tokio::time::sleep;

use broker_raft::config::ClusterConfig;
use broker_raft::network::{
    decode_message, encode_message, spawn_inbound, AppendEntries, AppendEntriesResponse,
    LocalNetwork, RaftMessage, RequestVote, VoteResponse,
};
use broker_raft::raft::{
    FileVoteStore, Log, LogEntry, LogInspector, LogPosition, MemoryVoteStore, NodeRole, NodeStatus, Raft, RaftConfig,
    RaftHandle,
};

fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

#[derive(Parser)]
#[command(name = "broker-raft")]
#[command(about = "Raft leader election for broker clusters")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run an in-process cluster until it elects a leader
    Cluster {
        /// Number of nodes, ids 1..=N (ignored with --config)
        #[arg(short, long, default_value_t = 5)]
        nodes: i32,

        /// JSON cluster description
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Keep votes and logs on disk under the configured data dir
        #[arg(long)]
        persist: bool,

        /// How long to let each election round run, in milliseconds
        #[arg(long, default_value_t = 1500)]
        settle_ms: u64,

        /// Partition the first leader away and wait for a successor
        #[arg(long)]
        isolate_leader: bool,
    },

    /// Decode a hex-encoded frame and print it as JSON
    Decode {
        /// Frame bytes as hex, whitespace allowed
        hex: String,
    },

    /// Encode a message and print the frame as hex
    Encode {
        #[command(subcommand)]
        message: EncodeCmd,
    },

    /// Inspect or seed the entry log of one node (e.g. data/node-3)
    Log {
        #[arg(short, long, default_value = "data")]
        data_dir: String,

        #[command(subcommand)]
        action: LogCmd,
    },
}

#[derive(Subcommand)]
enum LogCmd {
    /// Print the last log position
    Show,
    /// Append empty entries in `term`
    Append {
        #[arg(long)]
        term: i32,
        #[arg(long, default_value_t = 1)]
        count: u32,
    },
}

#[derive(Subcommand)]
enum EncodeCmd {
    RequestVote {
        #[arg(long)]
        candidate: i32,
        #[arg(long)]
        term: i32,
        #[arg(long, default_value_t = 0)]
        last_log_term: i32,
        #[arg(long, default_value_t = 0)]
        last_log_index: i64,
    },
    VoteResponse {
        #[arg(long)]
        id: i32,
        #[arg(long)]
        term: i32,
        #[arg(long)]
        granted: bool,
    },
    AppendEntries {
        #[arg(long)]
        leader: i32,
        #[arg(long)]
        term: i32,
        #[arg(long, default_value_t = 0)]
        prev_log_term: i32,
        #[arg(long, default_value_t = 0)]
        prev_log_index: i64,
        #[arg(long, default_value_t = 0)]
        commit_position: i64,
    },
    AppendEntriesResponse {
        #[arg(long)]
        id: i32,
        #[arg(long)]
        term: i32,
        #[arg(long)]
        success: bool,
    },
}

impl From<EncodeCmd> for RaftMessage {
    fn from(cmd: EncodeCmd) -> Self {
        match cmd {
            EncodeCmd::RequestVote {
                candidate,
                term,
                last_log_term,
                last_log_index,
            } => RequestVote {
                candidate_id: candidate,
                term,
                last_log_term,
                last_log_index,
            }
            .into(),
            EncodeCmd::VoteResponse { id, term, granted } => VoteResponse { id, term, granted }.into(),
            EncodeCmd::AppendEntries {
                leader,
                term,
                prev_log_term,
                prev_log_index,
                commit_position,
            } => AppendEntries {
                leader_id: leader,
                term,
                prev_log_term,
                prev_log_index,
                commit_position,
            }
            .into(),
            EncodeCmd::AppendEntriesResponse { id, term, success } => {
                AppendEntriesResponse { id, term, success }.into()
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Command::Cluster {
            nodes,
            config,
            persist,
            settle_ms,
            isolate_leader,
        } => {
            let cluster = match config {
                Some(path) => ClusterConfig::load(&path)
                    .with_context(|| format!("loading cluster config {}", path.display()))?,
                None => {
                    if nodes < 1 {
                        bail!("a cluster needs at least one node");
                    }
                    ClusterConfig::local(1..=nodes)
                }
            };
            run_cluster(&cluster, persist, Duration::from_millis(settle_ms), isolate_leader).await?;
        }
        Command::Decode { hex } => {
            let frame = parse_hex(&hex)?;
            let message = decode_message(&frame)?;
            println!("{}", serde_json::to_string_pretty(&message)?);
        }
        Command::Encode { message } => {
            let frame = encode_message(&message.into());
            println!("{}", to_hex(&frame));
        }
        Command::Log { data_dir, action } => {
            let last = run_log(&data_dir, action)?;
            println!("last log position: term {} index {}", last.term, last.index);
        }
    }

    Ok(())
}

async fn run_cluster(
    cluster: &ClusterConfig,
    persist: bool,
    settle: Duration,
    isolate_leader: bool,
) -> anyhow::Result<()> {
    let network = LocalNetwork::new();
    let mut handles = Vec::new();

    for id in cluster.node_ids() {
        let config = cluster.raft_config_for(id)?;
        let (transport, inbox) = network.register(id);
        let handle = if persist {
            start_persistent(&config, transport)?
        } else {
            Raft::start(&config, MemoryVoteStore::new(), LogPosition::default(), transport)?
        };
        spawn_inbound(handle.clone(), inbox);
        handles.push(handle);
    }

    info!("Started {} nodes, waiting for an election", handles.len());
    sleep(settle).await;
    let statuses = collect_status(&handles).await?;
    print_statuses(&statuses)?;

    let leader = single_leader(&statuses)?;
    println!("leader: node {} in term {}", leader.id, leader.term);

    if isolate_leader {
        network.isolate(leader.id);
        info!("Isolated node {}, waiting for a new leader", leader.id);
        sleep(settle).await;

        let statuses = collect_status(&handles).await?;
        print_statuses(&statuses)?;
        let reachable: Vec<NodeStatus> = statuses
            .into_iter()
            .filter(|s| s.id != leader.id)
            .collect();
        match single_leader(&reachable) {
            Ok(next) => println!("new leader: node {} in term {}", next.id, next.term),
            Err(e) => warn!("No successor elected: {e}"),
        }
    }

    for handle in &handles {
        handle.shutdown().await;
    }
    Ok(())
}

fn start_persistent(
    config: &RaftConfig,
    transport: broker_raft::network::LocalTransport,
) -> anyhow::Result<RaftHandle> {
    let votes = FileVoteStore::open(&config.data_dir)?;
    let log = Log::open(&config.data_dir)?;
    Ok(Raft::start(config, votes, log, transport)?)
}

fn run_log(data_dir: &str, action: LogCmd) -> anyhow::Result<LogPosition> {
    let mut log = Log::open(data_dir).with_context(|| format!("opening log in {data_dir}"))?;
    if let LogCmd::Append { term, count } = action {
        let last_term = log.last_log_term();
        if term < last_term {
            bail!("term {term} is behind the last logged term {last_term}");
        }
        for _ in 0..count {
            log.append(LogEntry {
                term,
                command: Vec::new(),
            })?;
        }
        info!("Appended {count} entries in term {term} to {data_dir}");
    }
    Ok(LogPosition::new(log.last_log_term(), log.last_log_index()))
}

async fn collect_status(handles: &[RaftHandle]) -> anyhow::Result<Vec<NodeStatus>> {
    let mut statuses = Vec::with_capacity(handles.len());
    for handle in handles {
        statuses.push(handle.status().await?);
    }
    Ok(statuses)
}

fn print_statuses(statuses: &[NodeStatus]) -> anyhow::Result<()> {
    for status in statuses {
        println!("{}", serde_json::to_string(status)?);
    }
    Ok(())
}

fn single_leader(statuses: &[NodeStatus]) -> anyhow::Result<NodeStatus> {
    let top_term = statuses.iter().map(|s| s.term).max().unwrap_or(0);
    let mut leaders = statuses
        .iter()
        .filter(|s| s.role == NodeRole::Leader && s.term == top_term);

    let leader = leaders
        .next()
        .ok_or_else(|| anyhow!("no leader in term {top_term}"))?;
    if leaders.next().is_some() {
        bail!("more than one leader in term {top_term}");
    }
    Ok(leader.clone())
}

fn parse_hex(input: &str) -> anyhow::Result<Vec<u8>> {
    let digits: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    if let Some(c) = digits.chars().find(|c| !c.is_ascii_hexdigit()) {
        bail!("invalid hex digit {c:?}");
    }
    if digits.len() % 2 != 0 {
        bail!("hex input has an odd number of digits");
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .with_context(|| format!("invalid hex byte at offset {}", i / 2))
        })
        .collect()
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
