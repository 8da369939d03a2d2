//! Line-oriented control console for a running session.

use std::fmt::Write as _;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context};
use rtdelay_engine::DelayControl;
use rtdelay_shared::TapKind;

use crate::preset_io::{load_preset_file, save_preset_file};

pub const HELP: &str = "\
commands:
  dry <amp>                   dry input amplitude
  out <amp>                   output amplitude
  ff|fb <idx> delay <frames>  tap delay
  ff|fb <idx> amp <amp>       tap amplitude
  reset ff|fb                 zero every tap of one kind
  load <preset.json>          apply a preset
  save <preset.json>          save the current parameters
  show                        print the parameter table
  stop | quit                 stop playback";

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    DryAmp(f32),
    OutputAmp(f32),
    TapDelay { kind: TapKind, index: usize, delay: usize },
    TapAmp { kind: TapKind, index: usize, amp: f32 },
    Reset(TapKind),
    Load(PathBuf),
    Save(PathBuf),
    Show,
    Help,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Parse one input line. Blank lines yield `None`.
pub fn parse_command(line: &str) -> anyhow::Result<Option<ConsoleCommand>> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let command = match words.as_slice() {
        [] => return Ok(None),
        ["dry", amp] => ConsoleCommand::DryAmp(number(amp)?),
        ["out", amp] => ConsoleCommand::OutputAmp(number(amp)?),
        [kind @ ("ff" | "fb"), index, "delay", delay] => ConsoleCommand::TapDelay {
            kind: tap_kind(kind)?,
            index: number(index)?,
            delay: number(delay)?,
        },
        [kind @ ("ff" | "fb"), index, "amp", amp] => ConsoleCommand::TapAmp {
            kind: tap_kind(kind)?,
            index: number(index)?,
            amp: number(amp)?,
        },
        ["reset", kind] => ConsoleCommand::Reset(tap_kind(kind)?),
        ["load", path] => ConsoleCommand::Load(PathBuf::from(path)),
        ["save", path] => ConsoleCommand::Save(PathBuf::from(path)),
        ["show"] => ConsoleCommand::Show,
        ["help" | "?"] => ConsoleCommand::Help,
        ["stop" | "quit" | "exit"] => ConsoleCommand::Stop,
        _ => bail!("unrecognized command '{}' (type 'help')", line.trim()),
    };
    Ok(Some(command))
}

fn number<T: std::str::FromStr>(word: &str) -> anyhow::Result<T> {
    word.parse()
        .map_err(|_| anyhow!("'{word}' is not a valid number"))
}

fn tap_kind(word: &str) -> anyhow::Result<TapKind> {
    match word {
        "ff" => Ok(TapKind::FeedForward),
        "fb" => Ok(TapKind::FeedBack),
        other => bail!("unknown tap kind '{other}' (expected ff or fb)"),
    }
}

/// Apply a command to the live engine and print the resulting state.
pub fn execute(
    command: ConsoleCommand,
    control: &DelayControl,
    out: &mut impl Write,
) -> anyhow::Result<Flow> {
    match command {
        ConsoleCommand::DryAmp(amp) => control.set_dry_input_amplitude(amp),
        ConsoleCommand::OutputAmp(amp) => control.set_output_amplitude(amp),
        ConsoleCommand::TapDelay { kind, index, delay } => control
            .set_tap_delay(kind, index, delay)
            .map_err(|_| anyhow!(control.last_error_message()))?,
        ConsoleCommand::TapAmp { kind, index, amp } => control
            .set_tap_amplitude(kind, index, amp)
            .map_err(|_| anyhow!(control.last_error_message()))?,
        ConsoleCommand::Reset(kind) => control.reset_taps(kind),
        ConsoleCommand::Load(path) => {
            let preset = load_preset_file(&path)?;
            control
                .apply_preset(&preset)
                .map_err(|_| anyhow!(control.last_error_message()))
                .with_context(|| format!("Preset {} does not fit this engine", path.display()))?;
        }
        ConsoleCommand::Save(path) => {
            save_preset_file(&control.preset(), &path)?;
            writeln!(out, "saved {}", path.display())?;
            return Ok(Flow::Continue);
        }
        ConsoleCommand::Show => {}
        ConsoleCommand::Help => {
            writeln!(out, "{HELP}")?;
            return Ok(Flow::Continue);
        }
        ConsoleCommand::Stop => return Ok(Flow::Stop),
    }

    write!(out, "{}", render_params(control))?;
    Ok(Flow::Continue)
}

/// Text table of the current gains and taps.
pub fn render_params(control: &DelayControl) -> String {
    let mut text = String::new();
    let _ = writeln!(text, "dry input amp  {:>9.4}", control.dry_input_amplitude());
    let _ = writeln!(text, "output amp     {:>9.4}", control.output_amplitude());

    for kind in [TapKind::FeedForward, TapKind::FeedBack] {
        for index in 0..control.tap_count(kind) {
            if let Ok(tap) = control.tap_params(kind, index) {
                let _ = writeln!(
                    text,
                    "{kind} {index:<3} delay {:>8} frames  amp {:>9.4}",
                    tap.delay, tap.amp
                );
            }
        }
    }
    text
}
