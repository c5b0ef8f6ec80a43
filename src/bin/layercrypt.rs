//! Layercrypt CLI - Password-based multi-layer file encryption
//!
//! Command-line interface for encrypting and decrypting files with
//! stacked XChaCha20-Poly1305 layers and PBKDF2 key derivation.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::error::Error as StdError;
use std::path::PathBuf;
use std::process;

use layercrypt::cancel::CancelToken;
use layercrypt::config::{DEFAULT_LAYERS, Settings, default_jobs};
use layercrypt::error::{ErrorCategory, ErrorKind, LayercryptError};
use layercrypt::file_ops::{self, FileJob};
use layercrypt::passphrase::{PassphraseReader, ReaderPassphraseReader, TerminalPassphraseReader};
use layercrypt::pipeline::Direction;
use tracing::{debug, warn};

#[derive(Parser)]
#[command(name = "layercrypt")]
#[command(version)]
#[command(about = "Password-based multi-layer file encryption.", long_about = None)]
struct Cli {
    /// Read password from stdin instead of from terminal
    #[arg(long, global = true)]
    passphrase_stdin: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "LAYERCRYPT_LOG", default_value = "warn")]
    log_level: String,

    /// Log format (json, text)
    #[arg(long, global = true, default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand)]
enum Commands {
    /// Encrypt one or more files
    #[command(alias = "e")]
    Encrypt {
        #[command(flatten)]
        files: FileArgs,

        /// Number of encryption layers to apply (1-200)
        #[arg(short, long, env = "LAYERCRYPT_LAYERS", default_value_t = DEFAULT_LAYERS)]
        layers: u32,
    },

    /// Decrypt one or more files
    #[command(alias = "d")]
    Decrypt {
        #[command(flatten)]
        files: FileArgs,
    },
}

#[derive(Args)]
struct FileArgs {
    /// Path to a file to process; may be repeated
    #[arg(short, long, value_name = "FILE", required = true)]
    input: Vec<PathBuf>,

    /// Path to write the result to (only with a single input)
    #[arg(short, long, value_name = "FILE", conflicts_with = "output_dir")]
    output: Option<PathBuf>,

    /// Directory for derived output names
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Delete each input once its output has been written
    #[arg(long)]
    delete_original: bool,

    /// Number of files processed concurrently
    #[arg(short, long, env = "LAYERCRYPT_JOBS", default_value_t = default_jobs())]
    jobs: usize,
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli.log_level, &cli.log_format);

    let (direction, files, layers) = match cli.command {
        Commands::Encrypt { files, layers } => (Direction::Encrypt, files, layers),
        Commands::Decrypt { files } => (Direction::Decrypt, files, DEFAULT_LAYERS),
    };

    let cancel = CancelToken::new();
    if let Err(e) = install_interrupt_handler(cancel.clone()) {
        warn!(error = %e, "continuing without interrupt handling");
    }

    let mut reader = get_passphrase_reader(cli.passphrase_stdin, direction);
    match run(direction, files, layers, &mut *reader, &cancel) {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            report_error(None, &e);
            process::exit(1);
        }
    }
}

/// Returns whether every file succeeded.
fn run(
    direction: Direction,
    files: FileArgs,
    layers: u32,
    reader: &mut dyn PassphraseReader,
    cancel: &CancelToken,
) -> Result<bool, LayercryptError> {
    let settings = Settings {
        layers,
        jobs: files.jobs,
        delete_original: files.delete_original,
        output_dir: files.output_dir,
    };

    let jobs = match files.output {
        Some(output) => {
            if files.input.len() != 1 {
                return Err(LayercryptError::new(
                    ErrorCategory::User,
                    "--output can only be used with a single --input",
                ));
            }
            files
                .input
                .into_iter()
                .map(|input| FileJob { input, output: output.clone() })
                .collect::<Vec<_>>()
        }
        None => file_ops::plan_jobs(direction, &files.input, &settings),
    };
    debug!(files = jobs.len(), ?direction, "starting");

    let report = file_ops::run_batch(direction, &jobs, reader, &settings, cancel)?;
    for (job, result) in &report.outcomes {
        match result {
            Ok(outcome) => {
                if settings.delete_original && !outcome.original_removed {
                    eprintln!(
                        "Warning: {} was processed but could not be deleted",
                        job.input.display()
                    );
                }
            }
            Err(e) => report_error(Some(job), e),
        }
    }
    Ok(report.is_success())
}

fn report_error(job: Option<&FileJob>, e: &LayercryptError) {
    let prefix = job
        .map(|j| format!("{}: ", j.input.display()))
        .unwrap_or_default();
    if e.is_untrusted_input() {
        eprintln!("Error: {}wrong password or corrupted file", prefix);
        return;
    }

    let mut message = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    eprintln!("Error: {}{}", prefix, message);
}

/// Cancel in-flight pipelines on the first Ctrl-C so they stop at the next
/// chunk and remove their scratch files. A second Ctrl-C exits at once.
fn install_interrupt_handler(cancel: CancelToken) -> Result<(), LayercryptError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| signal_error("failed to start signal runtime", e))?;

    // Registered before returning; SIGINT keeps its default action until then.
    #[cfg(unix)]
    let mut interrupts = {
        use tokio::signal::unix::{SignalKind, signal};
        let _guard = runtime.enter();
        signal(SignalKind::interrupt())
            .map_err(|e| signal_error("failed to install interrupt handler", e))?
    };

    std::thread::Builder::new()
        .name("layercrypt-signals".to_string())
        .spawn(move || {
            runtime.block_on(async move {
                let mut received = 0u32;
                loop {
                    #[cfg(unix)]
                    let interrupted = interrupts.recv().await.is_some();
                    #[cfg(not(unix))]
                    let interrupted = tokio::signal::ctrl_c().await.is_ok();
                    if !interrupted {
                        return;
                    }

                    received += 1;
                    if received > 1 {
                        process::exit(130);
                    }
                    warn!("interrupt received, cancelling");
                    eprintln!("Interrupted; cleaning up (press Ctrl-C again to exit immediately)");
                    cancel.cancel();
                }
            })
        })
        .map_err(|e| signal_error("failed to start signal thread", e))?;
    Ok(())
}

fn signal_error(msg: &str, e: std::io::Error) -> LayercryptError {
    LayercryptError::with_kind_and_source(ErrorCategory::Internal, ErrorKind::Io, msg, e)
}

fn get_passphrase_reader(use_stdin: bool, direction: Direction) -> Box<dyn PassphraseReader> {
    if use_stdin {
        Box::new(ReaderPassphraseReader::new(Box::new(std::io::stdin())))
    } else if direction == Direction::Encrypt {
        Box::new(TerminalPassphraseReader::confirming())
    } else {
        Box::new(TerminalPassphraseReader::new())
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
