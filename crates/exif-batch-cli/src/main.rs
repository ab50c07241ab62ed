use std::path::PathBuf;

use chrono::NaiveDateTime;
use clap::{ArgAction, Parser};
use exif_batch_core::{date, BatchOptions, CancellationToken, CancelledError, Move, ProcessControl, ProcessResult};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "exif-batch", version, about = "Give a batch of photos consecutive capture dates, one second apart")]
struct Cli {
    /// Photos, or directories of photos (not searched recursively)
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Capture date of the first photo, e.g. 2024-01-01T10:00 (seconds are dropped)
    #[arg(short, long, value_parser = parse_base)]
    base: NaiveDateTime,

    /// Output directory
    #[arg(short, long, default_value = "dated")]
    output: PathBuf,

    /// Reverse the order of the selection
    #[arg(long)]
    reverse: bool,

    /// Drop a photo from the selection by file name
    #[arg(long, value_name = "NAME")]
    remove: Vec<String>,

    /// Move the photo at position FROM to position TO (zero-based)
    #[arg(long = "move", value_name = "FROM:TO")]
    moves: Vec<Move>,

    /// Overwrite existing files in the output directory
    #[arg(long)]
    force: bool,

    /// Leave file modification times alone
    #[arg(long)]
    no_mtime: bool,

    /// Print the plan without writing anything
    #[arg(long)]
    dry_run: bool,

    /// Print the result as JSON on stdout
    #[arg(long)]
    json: bool,

    /// More log output (-v info, -vv debug); RUST_LOG takes precedence
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn parse_base(s: &str) -> Result<NaiveDateTime, String> {
    date::parse_base_date(s).ok_or_else(|| format!("'{}' is not a date, expected e.g. 2024-01-01T10:00", s))
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn format_date(value: Option<NaiveDateTime>) -> String {
    value.map_or_else(|| "-".to_string(), |d| date::format_exif_datetime(&d))
}

fn print_plan(result: &ProcessResult) {
    for entry in &result.entries {
        println!(
            "{:>4}  {:<32} {:<19} -> {:<19} {:?}",
            entry.position,
            entry.name,
            format_date(entry.previous_date),
            format_date(entry.timestamp),
            entry.state,
        );
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let t_total = std::time::Instant::now();

    let token = CancellationToken::new();
    let handler_token = token.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nCancelling...");
        handler_token.cancel();
    })?;

    let options = BatchOptions {
        inputs: cli.inputs,
        output: cli.output,
        base_date: cli.base,
        reverse: cli.reverse,
        remove: cli.remove,
        moves: cli.moves,
        force: cli.force,
        set_mtime: !cli.no_mtime,
        dry_run: cli.dry_run,
    };

    let pb = ProgressBar::new(0);
    pb.set_style(ProgressStyle::default_bar().template("[{bar:40}] {pos}/{len} {msg}")?);

    let control = ProcessControl::new().with_cancel_token(token);
    let bar = pb.clone();
    let outcome = exif_batch_core::process_with_control(&options, &control, &move |stage, current, total, message| {
        bar.set_length(total);
        bar.set_position(current + 1);
        bar.set_message(format!("[{}] {}", stage, message));
    });
    pb.finish_and_clear();

    let result = match outcome {
        Ok(result) => result,
        Err(e) if e.downcast_ref::<CancelledError>().is_some() => {
            eprintln!("Cancelled. Files already written were kept.");
            std::process::exit(130);
        }
        Err(e) => return Err(e),
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else if result.dry_run {
        print_plan(&result);
    }

    for warning in &result.warnings {
        eprintln!("warning: {}", warning);
    }

    if result.dry_run {
        eprintln!(
            "Dry run: {} photos, {} would be written, {} failed ({:.2}s)",
            result.total_photos,
            result.rendered,
            result.failed,
            t_total.elapsed().as_secs_f64()
        );
    } else {
        eprintln!(
            "Done! {} photos, {} rewritten, {} failed, {} files written to {} ({:.2}s)",
            result.total_photos,
            result.rendered,
            result.failed,
            result.files_written,
            options.output.display(),
            t_total.elapsed().as_secs_f64()
        );
    }

    Ok(())
}
