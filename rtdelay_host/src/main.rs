//! rtdelay - play a WAV file through a live multi-tap delay.
//!
//! Parameters are changed while the file plays by typing commands on stdin.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{never, select, unbounded, Receiver};
use log::{error, info};
use rtdelay_engine::{Output, PlaybackEnd, PlaybackSession, SessionConfig, SessionEvent};
use rtdelay_shared::{
    DEFAULT_CAPACITY_FRAMES, DEFAULT_FB_TAPS, DEFAULT_FF_TAPS, DEFAULT_SINK_BUFFER_FRAMES,
    RECOMMENDED_MIN_CAPACITY_FRAMES,
};

mod console;
mod preset_io;

use console::{execute, parse_command, render_params, Flow};

/// Command line arguments for rtdelay
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// 16 or 24 bit PCM WAV file to play
    #[clap(name = "WAV")]
    input: PathBuf,

    /// Frames buffered ahead of the output device
    #[clap(long, default_value_t = DEFAULT_SINK_BUFFER_FRAMES)]
    buffer_frames: usize,

    /// Delay history in frames (longest possible delay)
    #[clap(long, default_value_t = DEFAULT_CAPACITY_FRAMES, value_parser = parse_capacity)]
    capacity: usize,

    /// Number of feedforward taps
    #[clap(long, default_value_t = DEFAULT_FF_TAPS)]
    ff_taps: usize,

    /// Number of feedback taps
    #[clap(long, default_value_t = DEFAULT_FB_TAPS)]
    fb_taps: usize,

    /// JSON preset applied at start
    #[clap(long)]
    preset: Option<PathBuf>,

    /// Render to this WAV file instead of playing on the output device
    #[clap(long)]
    render: Option<PathBuf>,

    /// Enable debug logging
    #[clap(short, long)]
    debug: bool,
}

fn parse_capacity(s: &str) -> Result<usize, String> {
    let frames: usize = s.parse().map_err(|_| format!("'{s}' is not a frame count"))?;
    if frames < RECOMMENDED_MIN_CAPACITY_FRAMES {
        return Err(format!(
            "capacity must be at least {RECOMMENDED_MIN_CAPACITY_FRAMES} frames"
        ));
    }
    Ok(frames)
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.debug {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    let preset = args
        .preset
        .as_deref()
        .map(preset_io::load_preset_file)
        .transpose()?;

    let config = SessionConfig {
        frame_capacity: args.capacity,
        ff_taps: args.ff_taps,
        fb_taps: args.fb_taps,
        buffer_frames: args.buffer_frames,
        output: match &args.render {
            Some(path) => Output::WavFile(path.clone()),
            None => Output::Device,
        },
        preset,
    };

    info!("Opening {}", args.input.display());
    let session = PlaybackSession::start(&args.input, config)
        .with_context(|| format!("Failed to start playback of {}", args.input.display()))?;

    print!("{}", render_params(session.control()));
    println!("type 'help' for commands");

    let mut lines = stdin_lines();
    let mut stdout = io::stdout();
    let event = loop {
        let mut stdin_closed = false;
        select! {
            recv(session.events()) -> event => {
                break event.context("Playback thread exited without reporting")?;
            }
            recv(lines) -> line => match line {
                Ok(line) => handle_line(&line, &session, &mut stdout),
                Err(_) => stdin_closed = true,
            }
        }
        if stdin_closed {
            // Keep playing until the end
            lines = never();
        }
    };

    // Joins the playback thread
    drop(session);

    match event {
        SessionEvent::Finished(stats) => {
            match stats.end {
                PlaybackEnd::EndOfStream => info!("Playback finished"),
                PlaybackEnd::Stopped => info!("Playback stopped"),
            }
            info!(
                "{} segments played, {} frames read",
                stats.segments_played, stats.frames_read
            );
            Ok(())
        }
        SessionEvent::Failed(msg) => {
            error!("Playback failed: {}", msg);
            Err(anyhow::anyhow!(msg))
        }
    }
}

fn handle_line(line: &str, session: &PlaybackSession, out: &mut impl Write) {
    let result = parse_command(line).and_then(|cmd| match cmd {
        Some(cmd) => execute(cmd, session.control(), out),
        None => Ok(Flow::Continue),
    });
    match result {
        Ok(Flow::Continue) => {}
        Ok(Flow::Stop) => {
            info!("Stopping playback");
            session.stop();
        }
        Err(e) => eprintln!("error: {e:#}"),
    }
}

/// Forward stdin lines over a channel so they can be selected on.
fn stdin_lines() -> Receiver<String> {
    let (tx, rx) = unbounded();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}
