//! nb-batch: headless batch export and import of notebooks.
//!
//! - `export-pdf`: bundles to PDF
//! - `export-package`: bundles to `.snbx` packages
//! - `import`: packages back to bundles
//! - `discover`: list what the inputs resolve to

use clap::{Args, Parser, Subcommand};
use nb_core::batch::{
    export_package_batch, export_pdf_batch, import_package_batch, no_progress, BatchError,
    BatchProgress, BatchResult, FailFast, Operation,
};
use nb_core::cancel::{install_interrupt_handler, CancellationToken};
use nb_core::config::{load_config, ResolvedConfig};
use nb_core::discovery::{resolve_bundle_inputs, resolve_package_inputs, Resolved};
use nb_core::events::{
    event_names, EmitterProgress, JsonlWriter, Phase, ProgressEmitter, ProgressEvent, RunEmitter,
};
use nb_core::exit_codes::ExitCode;
use nb_core::logging::{generate_run_id, init_logging, LogConfig, LogFormat, LogLevel};
use nb_core::output::{format_summary, BatchReport, ConsoleProgress, OutputFormat};
use nb_core::render::AssetRasterizer;
use nb_package::OverwritePolicy;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Batch export/import for notebook bundles
#[derive(Parser)]
#[command(name = "nb-batch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOpts,
}

/// Options shared by every command
#[derive(Args, Debug)]
struct GlobalOpts {
    /// Config file (overrides NB_BATCH_CONFIG and the default location)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format on stdout
    #[arg(long, short = 'f', global = true, value_enum, default_value_t = OutputFormat::Human)]
    format: OutputFormat,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Decide every file without writing anything
    #[arg(long, global = true)]
    dry_run: bool,

    /// Search directories recursively
    #[arg(long, short = 'r', global = true)]
    recursive: bool,

    /// Accept any directory with a document.json, not just *.snb
    #[arg(long, global = true)]
    detect_all: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Export notebooks to PDF
    ExportPdf(ExportPdfArgs),

    /// Export notebooks to .snbx packages
    ExportPackage(ExportPackageArgs),

    /// Import .snbx packages as notebooks
    Import(ImportArgs),

    /// List the notebooks or packages the inputs resolve to
    Discover(DiscoverArgs),

    /// Print version information
    Version,
}

#[derive(Args, Debug)]
struct ExportPdfArgs {
    /// Bundles or directories containing bundles
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Output directory, or output file for a single notebook
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,

    /// Render resolution (36-1200)
    #[arg(long)]
    dpi: Option<u32>,

    /// Pages to export, e.g. "1-3,5" (default: all)
    #[arg(long)]
    pages: Option<String>,

    /// Export only annotations, without page backgrounds
    #[arg(long)]
    annotations_only: bool,

    /// Omit the document info dictionary
    #[arg(long)]
    no_metadata: bool,

    /// Omit the page outline
    #[arg(long)]
    no_outline: bool,

    /// Replace existing output files
    #[arg(long)]
    overwrite: bool,

    /// Stop at the first failed notebook
    #[arg(long)]
    fail_fast: bool,
}

#[derive(Args, Debug)]
struct ExportPackageArgs {
    /// Bundles or directories containing bundles
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Output directory, or output file for a single notebook
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,

    /// Do not embed the linked PDF
    #[arg(long)]
    no_pdf: bool,

    /// Replace existing packages
    #[arg(long)]
    overwrite: bool,

    /// Stop at the first failed notebook
    #[arg(long)]
    fail_fast: bool,
}

#[derive(Args, Debug)]
struct ImportArgs {
    /// Packages or directories containing packages
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Directory receiving the notebooks
    #[arg(long, short = 'd')]
    dest: Option<PathBuf>,

    /// What to do when a notebook of the same name exists: skip, overwrite, rename
    #[arg(long)]
    policy: Option<OverwritePolicy>,

    /// Stop at the first failed package
    #[arg(long)]
    fail_fast: bool,
}

#[derive(Args, Debug)]
struct DiscoverArgs {
    /// Files or directories to resolve
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Look for .snbx packages instead of bundles
    #[arg(long)]
    packages: bool,
}

/// State shared by the batch commands.
struct RunContext {
    run_id: String,
    config: ResolvedConfig,
    cancel: CancellationToken,
}

fn main() {
    // clap's own usage exit code (2) would read as a total failure
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() {
                ExitCode::InvalidArgs
            } else {
                ExitCode::Success
            };
            let _ = e.print();
            std::process::exit(code.as_i32());
        }
    };

    let log_format = cli.global.format.is_machine().then_some(LogFormat::Jsonl);
    let log_level = LogLevel::from_verbosity(cli.global.verbose, cli.global.quiet);
    init_logging(&LogConfig::from_env(log_level, log_format));

    let exit_code = match &cli.command {
        Commands::Version => {
            print_version(&cli.global);
            ExitCode::Success
        }
        command => match start(&cli.global) {
            Ok(ctx) => match command {
                Commands::ExportPdf(args) => run_export_pdf(&cli.global, &ctx, args),
                Commands::ExportPackage(args) => run_export_package(&cli.global, &ctx, args),
                Commands::Import(args) => run_import(&cli.global, &ctx, args),
                Commands::Discover(args) => run_discover(&cli.global, &ctx, args),
                Commands::Version => ExitCode::Success,
            },
            Err(code) => code,
        },
    };

    std::process::exit(exit_code.as_i32());
}

fn start(global: &GlobalOpts) -> Result<RunContext, ExitCode> {
    let run_id = generate_run_id();
    let config = load_config(global.config.as_deref()).map_err(|e| {
        eprintln!("nb-batch: {e}");
        ExitCode::InvalidArgs
    })?;

    let cancel = CancellationToken::new();
    if !install_interrupt_handler(&cancel) {
        debug!("Interrupt handler not installed");
    }
    info!(run_id = %run_id, config = ?config.source.path, "Run started");
    Ok(RunContext {
        run_id,
        config,
        cancel,
    })
}

fn resolve_bundles(global: &GlobalOpts, ctx: &RunContext, inputs: &[PathBuf]) -> Resolved {
    let mut options = ctx.config.config.discovery_options();
    options.recursive |= global.recursive;
    options.detect_all |= global.detect_all;
    resolve_bundle_inputs(inputs, options)
}

fn resolve_packages(global: &GlobalOpts, ctx: &RunContext, inputs: &[PathBuf]) -> Resolved {
    let recursive = ctx.config.config.discovery.recursive || global.recursive;
    resolve_package_inputs(inputs, recursive)
}

fn run_export_pdf(global: &GlobalOpts, ctx: &RunContext, args: &ExportPdfArgs) -> ExitCode {
    let resolved = resolve_bundles(global, ctx, &args.inputs);

    let mut options = ctx.config.config.pdf_options();
    if let Some(output) = &args.output {
        options.output = Some(output.clone());
    }
    if let Some(dpi) = args.dpi {
        options.dpi = dpi;
    }
    if let Some(pages) = &args.pages {
        options.page_range = pages.clone();
    }
    options.annotations_only |= args.annotations_only;
    options.include_metadata &= !args.no_metadata;
    options.include_outline &= !args.no_outline;
    options.overwrite = args.overwrite;
    options.dry_run = global.dry_run;

    run_batch(global, ctx, Operation::ExportPdf, &resolved, args.fail_fast, |progress| {
        export_pdf_batch(&resolved.paths, &options, &AssetRasterizer, progress, &ctx.cancel)
    })
}

fn run_export_package(global: &GlobalOpts, ctx: &RunContext, args: &ExportPackageArgs) -> ExitCode {
    let resolved = resolve_bundles(global, ctx, &args.inputs);

    let mut options = ctx.config.config.package_options();
    if let Some(output) = &args.output {
        options.output = Some(output.clone());
    }
    options.include_pdf &= !args.no_pdf;
    options.overwrite = args.overwrite;
    options.dry_run = global.dry_run;

    run_batch(global, ctx, Operation::ExportPackage, &resolved, args.fail_fast, |progress| {
        export_package_batch(&resolved.paths, &options, progress, &ctx.cancel)
    })
}

fn run_import(global: &GlobalOpts, ctx: &RunContext, args: &ImportArgs) -> ExitCode {
    let resolved = resolve_packages(global, ctx, &args.inputs);

    let mut options = ctx.config.config.import_options();
    if let Some(dest) = &args.dest {
        options.destination = Some(dest.clone());
    }
    if let Some(policy) = args.policy {
        options.overwrite_policy = policy;
    }
    options.dry_run = global.dry_run;

    run_batch(global, ctx, Operation::Import, &resolved, args.fail_fast, |progress| {
        import_package_batch(&resolved.paths, &options, progress, &ctx.cancel)
    })
}

/// Run one batch with the progress hook matching the output format, then
/// render the result.
fn run_batch(
    global: &GlobalOpts,
    ctx: &RunContext,
    operation: Operation,
    resolved: &Resolved,
    fail_fast: bool,
    execute: impl FnOnce(&mut dyn BatchProgress) -> Result<BatchResult, BatchError>,
) -> ExitCode {
    let emitter: Arc<dyn ProgressEmitter> = Arc::new(RunEmitter::new(
        ctx.run_id.clone(),
        Arc::new(JsonlWriter::new(std::io::stdout())),
    ));

    if global.format == OutputFormat::Human {
        for dropped in &resolved.dropped {
            println!("  dropped {}: {}", dropped.path.display(), dropped.reason);
        }
    } else if global.format == OutputFormat::Jsonl {
        emitter.emit(
            ProgressEvent::new(event_names::BATCH_STARTED, Phase::from(operation))
                .with_progress(0, Some(resolved.paths.len() as u64))
                .with_detail("dropped", &resolved.dropped),
        );
    }

    let mut progress: Box<dyn BatchProgress + '_> = match global.format {
        OutputFormat::Human => Box::new(ConsoleProgress::new(std::io::stdout())),
        OutputFormat::Jsonl => Box::new(EmitterProgress::new(emitter.as_ref(), operation)),
        OutputFormat::Json => Box::new(no_progress()),
    };

    let outcome = if fail_fast {
        execute(&mut FailFast(progress.as_mut()))
    } else {
        execute(progress.as_mut())
    };
    drop(progress);

    let result = match outcome {
        Ok(result) => result,
        Err(e) => {
            eprintln!("nb-batch: {e}");
            return match e {
                BatchError::InvalidOptions(_) => ExitCode::InvalidArgs,
                BatchError::OutputDirectory { .. } => ExitCode::IoError,
            };
        }
    };

    let report = BatchReport::new(
        &ctx.run_id,
        &result,
        &resolved.dropped,
        Some(&ctx.config.source),
    );
    match global.format {
        OutputFormat::Human => {
            if result.total() == 0 {
                println!("{operation}: no inputs to process");
            } else {
                println!("{}", format_summary(&result));
            }
        }
        OutputFormat::Json => print_json(&report),
        OutputFormat::Jsonl => {
            emitter.emit(ProgressEvent::batch_finished(&result));
            match serde_json::to_string(&report) {
                Ok(line) => println!("{line}"),
                Err(e) => eprintln!("nb-batch: cannot serialize report: {e}"),
            }
        }
    }

    ExitCode::from(&result)
}

fn run_discover(global: &GlobalOpts, ctx: &RunContext, args: &DiscoverArgs) -> ExitCode {
    let resolved = if args.packages {
        resolve_packages(global, ctx, &args.inputs)
    } else {
        resolve_bundles(global, ctx, &args.inputs)
    };

    match global.format {
        OutputFormat::Human => {
            for path in &resolved.paths {
                println!("{}", path.display());
            }
            for dropped in &resolved.dropped {
                eprintln!("dropped {}: {}", dropped.path.display(), dropped.reason);
            }
        }
        OutputFormat::Json => print_json(&resolved),
        OutputFormat::Jsonl => {
            let event = ProgressEvent::new(event_names::DISCOVERY_COMPLETE, Phase::Discover)
                .with_run_id(ctx.run_id.clone())
                .with_progress(resolved.paths.len() as u64, None)
                .with_detail("paths", &resolved.paths)
                .with_detail("dropped", &resolved.dropped);
            println!("{}", event.to_jsonl());
        }
    }

    if resolved.paths.is_empty() {
        ExitCode::InvalidArgs
    } else {
        ExitCode::Success
    }
}

fn print_json(value: &impl serde::Serialize) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("nb-batch: cannot serialize output: {e}"),
    }
}

fn print_version(global: &GlobalOpts) {
    match global.format {
        OutputFormat::Human => {
            println!("nb-batch {}", env!("CARGO_PKG_VERSION"));
            println!("package format: {}", nb_package::PACKAGE_VERSION);
        }
        _ => {
            let info = serde_json::json!({
                "nb_batch_version": env!("CARGO_PKG_VERSION"),
                "package_version": nb_package::PACKAGE_VERSION,
                "bundle_format_version": nb_package::BUNDLE_FORMAT_VERSION,
            });
            println!("{info}");
        }
    }
}
