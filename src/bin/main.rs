use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use clap::Parser;
use rand::SeedableRng;
use rand::rngs::StdRng;

use chorus::playback::SilentSink;
use chorus::{Node, NodeHandle, UserIntent, config, derive_node_id, telemetry, view};

#[derive(Parser, Debug)]
#[command(
    name = "chorus",
    version,
    about = "Serverless LAN collaborative jukebox",
    arg_required_else_help = true
)]
struct Cli {
    /// Display name; the first component of the election rank.
    #[arg(long, short = 'n')]
    name: String,

    /// Network password; combined with the name to derive the node id.
    #[arg(long, short = 'p')]
    password: String,

    /// Optional TOML config file.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// UDP discovery port override.
    #[arg(long)]
    udp_port: Option<u16>,

    /// First TCP port to try.
    #[arg(long)]
    tcp_port: Option<u16>,

    /// More verbose logs (-v debug, -vv trace).
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let cli = Cli::parse();
    telemetry::init(cli.verbose);

    if let Err(err) = run(cli) {
        tracing::error!("error: {err}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> chorus::Result<()> {
    let mut config = config::load(cli.config.as_deref())?;
    if let Some(udp_port) = cli.udp_port {
        config.udp_port = udp_port;
    }
    if let Some(tcp_port) = cli.tcp_port {
        config.tcp_port = tcp_port;
    }

    let node_id = derive_node_id(&cli.name, &cli.password);
    let mut handle = Node::start(
        config,
        node_id,
        cli.name,
        Box::new(SilentSink::default()),
        Box::new(StdRng::from_entropy()),
        Box::new(view::LogView::new()),
    )?;

    repl(&handle);
    handle.shutdown();
    Ok(())
}

/// Tiny command surface over stdin until EOF or `quit`.
fn repl(handle: &NodeHandle) {
    println!(
        "chorus node {} ready. commands: add <path> | play | next | prev | \
         seek <0-100> | remove <pos> | shuffle | repeat | clear | \
         volume <0-100> | status | quit",
        handle.local_id()
    );
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let mut parts = line.trim().splitn(2, ' ');
        let command = parts.next().unwrap_or("");
        let argument = parts.next().unwrap_or("").trim();
        match command {
            "" => {}
            "add" if !argument.is_empty() => handle.submit(UserIntent::AddTrack {
                path: argument.to_string(),
            }),
            "play" | "pause" => handle.submit(UserIntent::PlayPause),
            "next" => handle.submit(UserIntent::SkipNext),
            "prev" => handle.submit(UserIntent::SkipPrev),
            "seek" => match argument.parse::<f64>() {
                Ok(percent) => handle.submit(UserIntent::Seek {
                    fraction: (percent / 100.0).clamp(0.0, 1.0),
                }),
                Err(_) => println!("usage: seek <0-100>"),
            },
            "remove" => match argument.parse::<usize>() {
                Ok(index) if index >= 1 => {
                    let snapshot = handle.snapshot();
                    match snapshot.playlist.get(index - 1) {
                        Some(track) => handle.submit(UserIntent::RemoveTrack { id: track.id }),
                        None => println!("no track at position {index}"),
                    }
                }
                _ => println!("usage: remove <position>"),
            },
            "shuffle" => handle.submit(UserIntent::ToggleShuffle),
            "repeat" => handle.submit(UserIntent::CycleRepeat),
            "clear" => handle.submit(UserIntent::ClearQueue),
            "volume" => match argument.parse::<f32>() {
                Ok(level) => handle.submit(UserIntent::SetVolume {
                    volume: (level / 100.0).clamp(0.0, 1.0),
                }),
                Err(_) => println!("usage: volume <0-100>"),
            },
            "status" => print_status(handle),
            "quit" | "exit" => break,
            other => println!("unknown command: {other}"),
        }
        let _ = io::stdout().flush();
    }
}

fn print_status(handle: &NodeHandle) {
    let snapshot = handle.snapshot();
    println!(
        "role: {:?} | leader: {} | peers: {}",
        snapshot.role,
        snapshot
            .leader_name
            .or(snapshot.leader_id.map(|id| id.to_string()))
            .unwrap_or_else(|| "none".to_string()),
        snapshot.alive_peers,
    );
    match &snapshot.current_track {
        Some(track) => println!(
            "now: {} [{:.0}s/{:.0}s] {} | shuffle {} | repeat {}",
            track.title,
            snapshot.position_seconds,
            snapshot.duration_seconds,
            if snapshot.is_playing { "playing" } else { "paused" },
            if snapshot.shuffle { "on" } else { "off" },
            snapshot.repeat_mode.as_str(),
        ),
        None => println!("now: (nothing)"),
    }
    for (index, track) in snapshot.playlist.iter().enumerate() {
        println!("  {:>2}. {} ({})", index + 1, track.title, track.id);
    }
}
