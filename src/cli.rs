// cli.rs — 命令行参数

use std::ffi::OsString;
use std::path::PathBuf;

use clap::{ArgAction, CommandFactory, Parser};

use crate::config::{CONFIG_ENV, CONFIG_FILE};

/// Interactive 360° panorama viewer with exportable camera-move animations
#[derive(Parser, Debug)]
#[command(name = "panorama_animator", long_about = None)]
#[command(disable_help_flag = true)]
pub struct Args {
    /// Path to the panorama image or video file.
    #[arg(value_name = "FILEPATH")]
    pub filepaths: Vec<PathBuf>,

    /// Show this help message.
    #[arg(short, long, action = ArgAction::SetTrue)]
    pub help: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    /// `-h` / `--help` alone: print usage, exit 0.
    Help,
    /// Exactly one positional file path.
    View(PathBuf),
    /// Anything else: print usage, exit 1.
    Invalid(String),
}

/// Parse a full argument vector, program name first.
pub fn parse_args<I, T>(args: I) -> CliCommand
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let mut args = match Args::try_parse_from(args) {
        Ok(args) => args,
        Err(e) => {
            let message = e.to_string();
            let first = message.lines().next().unwrap_or_default();
            return CliCommand::Invalid(first.trim_start_matches("error: ").to_string());
        }
    };

    match (args.help, args.filepaths.len()) {
        (true, 0) => CliCommand::Help,
        (true, _) => CliCommand::Invalid("--help takes no file path".to_string()),
        (false, 0) => CliCommand::Invalid("missing file path".to_string()),
        (false, 1) => CliCommand::View(args.filepaths.remove(0)),
        (false, n) => CliCommand::Invalid(format!("expected one file path, got {n}")),
    }
}

fn after_help() -> String {
    format!(
        "Controls:\n\
         \x20 drag mouse        look around          scroll  zoom (fov)\n\
         \x20 W/S/A/D           pitch / yaw          1/2/3   perspective / little planet / crystal ball\n\
         \x20 F1/F2/F3/F4       play ROTATE / SWIPE / SWIPE_ROTATE / compact ROTATE (images only)\n\
         \x20 P                 export the active animation\n\
         \n\
         Video files ({video}) are recognized, but playing them needs a decoder\n\
         backend that this build does not ship; opening one exits with an error.\n\
         \n\
         Config: {CONFIG_FILE} next to the executable or in the working directory,\n\
         or the path in ${CONFIG_ENV}.",
        video = crate::media::VIDEO_EXTENSIONS.join(" "),
    )
}

pub fn usage(program: &str) -> String {
    let mut cmd = Args::command()
        .bin_name(program)
        .override_usage(format!("{program} <FILEPATH> [-h|--help]"))
        .after_help(after_help());
    cmd.render_help().to_string()
}
