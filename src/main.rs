use std::sync::Arc;

use clap::Parser;
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pipeline_autotune_rs::cli::{Cli, Command, SetupArgs, TuneArgs};
use pipeline_autotune_rs::error::Result;
use pipeline_autotune_rs::interface::{display_report, prompt_yes_no, ConsolePrompt};
use pipeline_autotune_rs::models::PipelineDescription;
use pipeline_autotune_rs::state::{save_pipeline, ExperimentStore};
use pipeline_autotune_rs::tuner::{
    setup_pipeline, write_points_csv, write_trace_csv, CommandPipeline, IterationController,
    PipelineRegistry, TunerConfig, TunerOptions,
};

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Autotune(args) => cmd_autotune(&args, false),
        Command::Run(args) => cmd_autotune(&args, true),
        Command::Filter(args) => cmd_filter(&args),
        Command::Setup(args) => cmd_setup(&args),
    }
}

/// Explore the choice space; `single` defaults to one iteration.
fn cmd_autotune(args: &TuneArgs, single: bool) -> Result<()> {
    let mut options = args.to_options()?;
    if single && options.iterations.is_none() {
        options.iterations = Some(1);
    }
    tune(args, options)
}

/// Reprocess recorded points without evaluating anything.
fn cmd_filter(args: &TuneArgs) -> Result<()> {
    let mut options = args.to_options()?;
    options.only_filter = true;
    options.record |= args.store.is_some();
    tune(args, options)
}

fn tune(args: &TuneArgs, options: TunerOptions) -> Result<()> {
    let config = TunerConfig::from_options(&options)?;

    let mut registry = PipelineRegistry::new();
    if let Some(command_line) = &args.pipeline_cmd {
        registry.register(Arc::new(CommandPipeline::from_command_line(
            &args.module_name,
            command_line,
        )?));
    }

    let uid = config.recording.experiment_uoa.clone();
    let mut store = match &args.store {
        Some(path) => Some(ExperimentStore::open(path, uid)?),
        None if config.recording.enabled => {
            warn!("recording without --store; points are kept in memory only");
            Some(ExperimentStore::new(uid))
        }
        None => None,
    };

    let mut controller =
        IterationController::new(&config, &registry)?.with_prompt(Box::new(ConsolePrompt));
    if let Some(store) = store.as_mut() {
        controller = controller.with_recorder(store);
    }
    let report = controller.run()?;

    display_report(&report);

    if let Some(store) = &store {
        println!("Experiment {} holds {} points.", store.uid(), store.len());
    }
    if let Some(path) = &args.csv {
        write_points_csv(&report.frontier, path)?;
        println!("Frontier written to {}", path.display());
    }
    if let Some(path) = &args.trace_csv {
        write_trace_csv(&report, path)?;
        println!("Trace written to {}", path.display());
    }

    Ok(())
}

/// Prepare a pipeline and save its description.
fn cmd_setup(args: &SetupArgs) -> Result<()> {
    if args.output.exists() && !args.force {
        let overwrite = prompt_yes_no(
            &format!("{} already exists. Overwrite?", args.output.display()),
            false,
        )?;
        if !overwrite {
            println!("Setup cancelled.");
            return Ok(());
        }
    }

    let module = CommandPipeline::from_command_line(&args.module_name, &args.pipeline_cmd)?;
    let pipeline = setup_pipeline(&module, &PipelineDescription::default(), args.max_attempts)?;
    save_pipeline(&args.output, &pipeline)?;

    println!(
        "Pipeline saved to {} ({} choice dimensions).",
        args.output.display(),
        pipeline.choices_desc.len()
    );
    Ok(())
}
