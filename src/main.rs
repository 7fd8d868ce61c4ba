//! poi-window CLI
//!
//! Cuts the point-of-interest window out of a side-channel trace file and
//! reports the shapes of the arrays that make up a dataset.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use poi_window::{dataset::DEFAULT_PREFIX, extract_file, inspect, Backend, DatasetPaths, Window};

#[derive(Parser)]
#[command(name = "poi-window")]
#[command(author, version)]
#[command(about = "Extract point-of-interest windows from side-channel traces")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy an inclusive column window out of every trace
    Extract {
        /// Trace file (2-D .npy)
        #[arg(short, long, env = "POI_WINDOW_INPUT")]
        input: PathBuf,

        /// Where to write the extracted window (.npy)
        #[arg(short, long, env = "POI_WINDOW_OUTPUT")]
        output: PathBuf,

        /// First column of the window
        #[arg(short, long, env = "POI_WINDOW_BEGIN", default_value_t = 1000, allow_negative_numbers = true)]
        begin: i64,

        /// Last column of the window, inclusive
        #[arg(short, long, env = "POI_WINDOW_END", default_value_t = 1999, allow_negative_numbers = true)]
        end: i64,

        /// Copy rows on all CPU cores
        #[arg(long, conflicts_with = "gpu")]
        parallel: bool,

        /// Copy rows on the GPU
        #[arg(long)]
        gpu: bool,
    },

    /// Print the shapes of the traces, plaintexts and POIs of a dataset
    Inspect {
        /// Directory holding the dataset files
        #[arg(short, long, env = "POI_WINDOW_DATA_PATH", default_value = "./")]
        data_path: PathBuf,

        /// File name prefix of the dataset
        #[arg(short, long, env = "POI_WINDOW_PREFIX", default_value = DEFAULT_PREFIX)]
        prefix: String,

        /// Fail if the plaintexts or POIs do not have one row per trace
        #[arg(long)]
        check_rows: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match cli.command {
        Commands::Extract {
            input,
            output,
            begin,
            end,
            parallel,
            gpu,
        } => {
            let window = requested_window(begin, end)?;
            let backend = if gpu {
                Backend::Gpu
            } else if parallel {
                Backend::Parallel
            } else {
                Backend::Sequential
            };
            let info = extract_file(&input, &output, window, backend).with_context(|| {
                format!(
                    "failed to extract columns {window} from {}",
                    input.display()
                )
            })?;
            println!("POIs shape: {info}");
        }
        Commands::Inspect {
            data_path,
            prefix,
            check_rows,
        } => {
            let paths = DatasetPaths::new(&data_path, &prefix);
            let report = inspect(&paths, check_rows)
                .with_context(|| format!("failed to inspect dataset in {}", data_path.display()))?;
            println!("{report}");
        }
    }

    Ok(())
}

/// The window is checked against the traces only once they are loaded.
fn requested_window(begin: i64, end: i64) -> anyhow::Result<Window> {
    Ok(Window::new(begin, end)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_extract_defaults() {
        let cli = Cli::try_parse_from(["poi-window", "extract", "-i", "a.npy", "-o", "b.npy"])
            .unwrap();
        match cli.command {
            Commands::Extract {
                begin,
                end,
                parallel,
                gpu,
                ..
            } => {
                assert_eq!((begin, end), (1000, 1999));
                assert!(!parallel && !gpu);
            }
            Commands::Inspect { .. } => panic!("expected extract"),
        }
    }

    #[test]
    fn test_negative_begin_is_parsed() {
        let cli = Cli::try_parse_from([
            "poi-window", "extract", "-i", "a.npy", "-o", "b.npy", "--begin", "-1", "--end", "2",
        ])
        .unwrap();
        let Commands::Extract { begin, .. } = cli.command else {
            panic!("expected extract");
        };
        assert_eq!(begin, -1);
    }

    #[test]
    fn test_rejected_window_message() {
        let cli = Cli::try_parse_from([
            "poi-window", "extract", "-i", "a.npy", "-o", "b.npy", "--begin", "-1", "--end", "2",
        ])
        .unwrap();
        let Commands::Extract { begin, end, .. } = cli.command else {
            panic!("expected extract");
        };
        let err = requested_window(begin, end).unwrap_err();
        assert_eq!(
            format!("{err:#}"),
            "invalid window [-1, 2]: indices must not be negative"
        );

        let err = requested_window(9, 3).unwrap_err();
        assert_eq!(
            format!("{err:#}"),
            "invalid window [9, 3]: begin index is greater than end index"
        );
    }

    #[test]
    fn test_backends_conflict() {
        assert!(Cli::try_parse_from([
            "poi-window", "extract", "-i", "a.npy", "-o", "b.npy", "--parallel", "--gpu",
        ])
        .is_err());
    }
}
