mod args;

use crate::args::{CliArgs, FitOptions, OutputFormat, SubCommand, TuningOptions};
use base::{cli, merl, AngularGrid, FitError, SampleStore};
use bxdf::{albedo, FitPipeline, FitResult};
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (args, launch_time) = cli::parse_args::<CliArgs>("merlfit");

    cli::setup_logging(
        args.common.log_timestamp.then_some(launch_time),
        args.common.log_level,
        &[],
    );

    match args.command {
        SubCommand::Fit(opts) => {
            let pipeline = pipeline(&opts.tuning)?;
            for input in &opts.inputs {
                // One bad file doesn't stop the batch.
                if let Err(err) = fit_file(&pipeline, &opts, input) {
                    log::error!("Failed to fit {}: {}", input.display(), err);
                }
            }
        },
        SubCommand::Synth(opts) => {
            let store = SampleStore::from_grid(&AngularGrid::uniform(opts.resolution), |dirs| {
                let v = dirs.wi.z * dirs.wo.z;
                [v, v, v]
            })
            .with_material("cos-cos");
            let result = pipeline(&opts.tuning)?.run(&store)?;
            write_result(&result, &opts.tuning, Path::new("cos-cos"))?;
        },
    }

    Ok(())
}

fn fit_file(pipeline: &FitPipeline, opts: &FitOptions, input: &Path) -> Result<(), FitError> {
    let store = merl::load(input, opts.stride)?;
    log::info!(
        "  - measured albedo: {:?}",
        albedo::integrate_measured(store.samples()).rgb
    );
    let result = pipeline.run(&store)?;
    write_result(&result, &opts.tuning, input)
}

fn pipeline(opts: &TuningOptions) -> Result<FitPipeline, FitError> {
    let config = opts.config()?;
    config.validate()?;
    let pipeline = FitPipeline::new(config);
    log::debug!("Fitting configuration: {:?}", pipeline.config());
    Ok(pipeline)
}

fn write_result(result: &FitResult, opts: &TuningOptions, input: &Path) -> Result<(), FitError> {
    let record = result.record();
    match &opts.output {
        None => {
            let stdout = std::io::stdout().lock();
            match opts.format {
                OutputFormat::Json => record.write_json(stdout),
                OutputFormat::Text => record.write_text(stdout),
            }
        },
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let stem = result
                .material
                .as_deref()
                .or_else(|| input.file_stem().and_then(|s| s.to_str()))
                .unwrap_or("fit");
            let path = dir.join(format!("{}_{}.{}", stem, result.kind, opts.format));
            let mut writer = BufWriter::new(File::create(&path)?);
            match opts.format {
                OutputFormat::Json => record.write_json(&mut writer)?,
                OutputFormat::Text => record.write_text(&mut writer)?,
            }
            writer.flush()?;
            log::info!("Fit result written to {}", path.display());
            Ok(())
        },
    }
}
