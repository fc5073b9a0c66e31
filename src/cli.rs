use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "slitcam", version, about = "Slit-lamp camera recorder driven by a latching button")]
pub struct CliArgs {
    /// Path to the config file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    /// List writable removable storage, best first
    UsbStatus,

    /// Check that a camera capture tool is installed
    CameraCheck,

    /// Count button presses over a time window
    GpioCheck {
        /// BCM pin number
        #[arg(long)]
        pin: Option<u32>,

        /// How long to watch the button
        #[arg(long, default_value_t = 10)]
        seconds: u64,

        /// Button wired to 3.3V with a pull-down (ON reads high)
        #[arg(long)]
        pull_down: bool,
    },

    /// Record a short clip to the selected storage
    RecordTest {
        /// Clip length; 0 would make the camera record indefinitely
        #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
        seconds: u64,
    },

    /// Run the button-driven recorder until interrupted
    RecordService {
        /// BCM pin number
        #[arg(long)]
        pin: Option<u32>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_subcommands_and_globals() {
        let args = CliArgs::parse_from(["slitcam", "gpio-check", "--pin", "27", "--pull-down", "-v"]);
        assert!(args.verbose);
        assert_eq!(
            args.command,
            CliCommand::GpioCheck { pin: Some(27), seconds: 10, pull_down: true }
        );

        let args = CliArgs::parse_from(["slitcam", "--config", "/tmp/c.toml", "record-test"]);
        assert_eq!(args.config, Some(PathBuf::from("/tmp/c.toml")));
        assert_eq!(args.command, CliCommand::RecordTest { seconds: 10 });
    }

    #[test]
    fn zero_length_test_clip_is_rejected() {
        assert!(CliArgs::try_parse_from(["slitcam", "record-test", "--seconds", "0"]).is_err());
        let args = CliArgs::parse_from(["slitcam", "record-test", "--seconds", "1"]);
        assert_eq!(args.command, CliCommand::RecordTest { seconds: 1 });
    }

    #[test]
    fn subcommand_is_required() {
        assert!(CliArgs::try_parse_from(["slitcam"]).is_err());
    }
}
