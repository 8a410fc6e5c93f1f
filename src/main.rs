use std::path::PathBuf;

use clap::Parser;
use log::info;
use normfold::{
    CANONICAL_RANK, ConvertOptions, ConverterRegistry, Engine, EngineConfig, GraphError,
    HostInput, Scope, SyncCopier, load_model_from_path, run_network, run_network_named,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Lower batch-norm operators into fused scale layers", long_about = None)]
struct Cli {
    /// Path to a JSON model description.
    model: PathBuf,
    /// Rank the target engine's per-channel scale layer requires.
    #[arg(long, default_value_t = CANONICAL_RANK)]
    canonical_rank: usize,
    /// Device ordinal available for staging parameters (repeatable).
    #[arg(long = "device")]
    devices: Vec<u32>,
    /// Bind operator outputs by name only, without declaring network outputs.
    #[arg(long)]
    test_mode: bool,
    /// Execute the lowered network on the host.
    #[arg(long)]
    run: bool,
    /// Value every input element is filled with when running.
    #[arg(long, default_value_t = 1.0, requires = "run")]
    fill: f32,
    /// Print the fused weights held by the engine.
    #[arg(long)]
    dump_weights: bool,
    /// Optional path to write the fused weights as JSON.
    #[arg(long)]
    export_weights: Option<PathBuf>,
}

fn run() -> Result<(), GraphError> {
    let cli = Cli::parse();
    let model = load_model_from_path(&cli.model)?;
    let scope = Scope::from_model(&model)?;
    let copier = SyncCopier::with_devices(cli.devices.iter().copied());
    let mut engine = Engine::new(EngineConfig {
        canonical_rank: cli.canonical_rank,
    })?;

    ConverterRegistry::with_defaults().convert_model(
        &model,
        &scope,
        &copier,
        &mut engine,
        ConvertOptions {
            test_mode: cli.test_mode,
        },
    )?;
    info!(
        "lowered {} operators into {} layers",
        model.operations.len(),
        engine.network().layers().len()
    );

    println!(
        "Lowered `{}`: {} operators, {} layers, {} weight buffers.",
        cli.model.display(),
        model.operations.len(),
        engine.network().layers().len(),
        engine.weights().len()
    );
    print!("{}", engine.network());

    if cli.dump_weights {
        println!("Weights:");
        for key in engine.weights().keys() {
            let values = engine.weights().get_by_key(key).unwrap_or_default();
            println!("  - {}: {:?}", key, values);
        }
    }

    if let Some(path) = cli.export_weights {
        engine.weights().export_json(&path)?;
        println!("Exported weights to `{}`.", path.display());
    }

    if cli.run {
        let inputs: Vec<HostInput> = model
            .inputs
            .iter()
            .map(|(name, desc)| {
                let shape: Vec<usize> = desc
                    .static_or_max_shape()
                    .into_iter()
                    .map(|d| d as usize)
                    .collect();
                let total: usize = shape.iter().product();
                HostInput {
                    name: name.clone(),
                    shape,
                    data: vec![cli.fill; total],
                }
            })
            .collect();

        let outputs = if cli.test_mode {
            let names: Vec<&str> = model.outputs.iter().map(String::as_str).collect();
            run_network_named(&engine, inputs, &names)?
        } else {
            run_network(&engine, inputs)?
        };
        println!("Executed on host with inputs filled with {}:", cli.fill);
        for out in &outputs {
            println!("  - {}: shape={:?} data={:?}", out.name, out.shape, out.data);
        }
    }

    Ok(())
}

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}
