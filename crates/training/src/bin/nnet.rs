use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use training::checkpoint::{
    add_prefix, exclude_matching, load_state_dict, save_state_dict, NETWORK_PREFIX,
};
use training::{AutodiffTrainBackend, ModelRegistry, NetworkFactory, SystemConfig};

#[derive(Parser, Debug)]
#[command(name = "nnet", about = "Inspect keypoint network configs and migrate checkpoints")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build the network described by a config and list its parameters.
    Inspect {
        /// TOML file with a `[system]` section.
        #[arg(long)]
        config: PathBuf,
    },
    /// Rewrite the keys of a checkpoint.
    Migrate {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
        /// Drop every key containing this substring.
        #[arg(long)]
        exclude: Option<String>,
        /// Prefix added to every remaining key.
        #[arg(long, default_value = NETWORK_PREFIX)]
        prefix: String,
    },
}

fn inspect(config: PathBuf) -> anyhow::Result<()> {
    let cfg = SystemConfig::from_path(&config)
        .with_context(|| format!("failed to load config {}", config.display()))?;
    let devices = vec![Default::default(); cfg.chunk_sizes.len()];
    let factory =
        NetworkFactory::<AutodiffTrainBackend>::new(cfg, &ModelRegistry::with_defaults(), devices)?;

    let params = factory.parameters();
    for param in &params {
        let flag = if param.trainable { "trainable" } else { "frozen" };
        println!("{:<48} {:<16} {flag}", param.name, format!("{:?}", param.shape));
    }
    let trainable: usize = params.iter().filter(|p| p.trainable).map(|p| p.numel()).sum();
    println!(
        "{} tensors, {} parameters ({} trainable)",
        params.len(),
        factory.num_params(),
        trainable
    );
    Ok(())
}

fn migrate(
    input: PathBuf,
    output: PathBuf,
    exclude: Option<String>,
    prefix: String,
) -> anyhow::Result<()> {
    let mut dict = load_state_dict(&input)?;
    let before = dict.len();
    if let Some(pattern) = exclude.as_deref() {
        dict = exclude_matching(dict, pattern);
    }
    let dict = add_prefix(dict, &prefix);
    save_state_dict(&output, &dict)?;
    println!(
        "wrote {} of {before} tensors to {}",
        dict.len(),
        output.display()
    );
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("training=info")),
        )
        .init();

    match Cli::parse().command {
        Command::Inspect { config } => inspect(config),
        Command::Migrate {
            input,
            output,
            exclude,
            prefix,
        } => migrate(input, output, exclude, prefix),
    }
}
