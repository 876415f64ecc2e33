//! retrack CLI — inspect a MOD and drive the transport headless.
//!
//! The engine schedules parameter automation for an external DSP; without
//! one attached this binary is a song inspector and scheduling monitor:
//!
//!   retrack song.mod                 play, printing the position
//!   retrack song.mod --info          header + feature analysis only
//!   retrack song.mod --trace 40      also dump the first scheduled events

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use ringbuf::traits::Consumer;

use rt_audio::{automation_channel, AutomationConsumer, StreamClock, SystemClock};
use rt_engine::AudioClock;
use rt_ir::TransportState;
use rt_player::Player;

/// Tracker module player core, headless front end.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// The .mod file to load
    path: String,

    /// Print song info and feature analysis, then exit
    #[arg(long)]
    info: bool,

    /// Print the first N scheduled automation events
    #[arg(long, value_name = "N")]
    trace: Option<usize>,

    /// Loop the song instead of stopping at the end
    #[arg(long)]
    loop_song: bool,
}

/// Clock selection: real audio device when available, wall clock otherwise.
enum CliClock {
    Stream(StreamClock),
    System(SystemClock),
}

impl AudioClock for CliClock {
    fn current_time(&self) -> f64 {
        match self {
            CliClock::Stream(c) => c.current_time(),
            CliClock::System(c) => c.current_time(),
        }
    }

    fn is_running(&self) -> bool {
        match self {
            CliClock::Stream(c) => c.is_running(),
            CliClock::System(c) => c.is_running(),
        }
    }

    fn resume(&mut self) {
        match self {
            CliClock::Stream(c) => c.resume(),
            CliClock::System(c) => c.resume(),
        }
    }

    fn quantum(&self) -> f64 {
        match self {
            CliClock::Stream(c) => c.quantum(),
            CliClock::System(c) => c.quantum(),
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let args = Args::parse();

    let data = std::fs::read(&args.path).unwrap_or_else(|e| {
        eprintln!("Failed to read {}: {}", args.path, e);
        std::process::exit(1);
    });
    let song = rt_formats::load_mod(&data).unwrap_or_else(|e| {
        eprintln!("Failed to parse MOD: {}", e);
        std::process::exit(1);
    });

    println!("Title:    {}", song.title);
    println!("Flavor:   {:?}", song.flavor);
    println!("Channels: {}", song.channels);
    println!("Patterns: {}", song.patterns.len());
    println!("Orders:   {}", song.sequence.len());
    let samples_with_data = song.samples.iter().filter(|s| !s.is_empty()).count();
    println!("Samples:  {} (with data)", samples_with_data);
    println!();
    print!("{}", rt_ir::analyze(&song));
    println!();

    if args.info {
        return;
    }

    let (sender, consumer) = automation_channel(16 * 1024);
    let player = Player::new(move || {
        let clock = match StreamClock::new() {
            Ok(c) => CliClock::Stream(c),
            Err(e) => {
                eprintln!("No audio device ({e}); running on the wall clock");
                CliClock::System(SystemClock::default())
            }
        };
        (clock, sender)
    });

    player.set_loop_song(args.loop_song);
    player.load_song(Arc::new(song), 0);
    player.play();
    wait_until_playing(&player);
    println!("Playing...");
    println!();

    match args.trace {
        Some(limit) => trace_events(&player, consumer, limit),
        None => monitor_position(&player, consumer),
    }

    println!("\rDone.          ");
}

/// The control thread applies `play` asynchronously; don't start polling
/// for the stop condition until it has taken effect.
fn wait_until_playing(player: &Player) {
    for _ in 0..200 {
        if player.transport() == TransportState::Playing {
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

/// Print the position line while playback runs.
fn monitor_position(player: &Player, mut consumer: AutomationConsumer) {
    loop {
        std::thread::sleep(Duration::from_millis(50));
        // the DSP seat is empty; keep the queue drained
        while consumer.try_pop().is_some() {}
        let pos = player.position();
        print!(
            "\rOrd: {:02X} | Pat: {:02X} | Row: {:02X}",
            pos.sequence_index,
            pos.pattern.unwrap_or(0),
            pos.row
        );
        let _ = std::io::stdout().flush();
        if player.transport() == TransportState::Stopped {
            break;
        }
    }
}

/// Print the first `limit` automation events, then keep draining.
fn trace_events(player: &Player, mut consumer: AutomationConsumer, limit: usize) {
    let mut printed = 0usize;
    loop {
        std::thread::sleep(Duration::from_millis(20));
        while let Some(event) = consumer.try_pop() {
            if printed < limit {
                println!("{:>4}  {:?}", printed, event);
                printed += 1;
            }
        }
        if player.transport() == TransportState::Stopped {
            break;
        }
    }
}
