use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use rpforest::{into_parts, load_forest, save_forest, Forest, ForestConfig, ItemId, Metric};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Build and query random projection forest indexes
#[derive(Parser, Debug)]
#[command(name = "rpforest")]
#[command(about = "Approximate nearest neighbor search with random projection trees", long_about = None)]
struct Args {
    /// Log level
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build an index from a JSON-lines file of {"id": .., "vector": [..]}
    Build {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        /// Number of trees
        #[arg(long, default_value_t = 10)]
        trees: usize,

        /// Maximum items per leaf
        #[arg(long, default_value_t = rpforest_core::forest::DEFAULT_LEAF_SIZE)]
        leaf_size: usize,

        #[arg(long, default_value = "euclidean")]
        metric: Metric,

        /// Seed for reproducible builds
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Query an index with a comma-separated vector
    Query {
        #[arg(long)]
        index: PathBuf,

        #[arg(long, allow_hyphen_values = true)]
        vector: String,

        #[arg(short, default_value_t = 10)]
        k: usize,

        /// Candidate budget; negative means the default of k * trees
        #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
        search_k: i64,
    },

    /// Print index statistics
    Stats {
        #[arg(long)]
        index: PathBuf,
    },
}

#[derive(Debug, Deserialize)]
struct InputRecord {
    id: ItemId,
    vector: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct QueryOutput {
    ids: Vec<ItemId>,
    distances: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct StatsOutput {
    items: usize,
    trees: usize,
    nodes: usize,
    dim: usize,
    metric: Metric,
    built: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // RUST_LOG wins over --log-level when set
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str().to_lowercase()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match args.command {
        Command::Build {
            input,
            output,
            trees,
            leaf_size,
            metric,
            seed,
        } => build(&input, &output, trees, leaf_size, metric, seed),
        Command::Query {
            index,
            vector,
            k,
            search_k,
        } => query(&index, &vector, k, search_k),
        Command::Stats { index } => stats(&index),
    }
}

fn build(
    input: &Path,
    output: &Path,
    trees: usize,
    leaf_size: usize,
    metric: Metric,
    seed: Option<u64>,
) -> anyhow::Result<()> {
    let records = read_records(input)?;
    let Some(first) = records.first() else {
        bail!("{} contains no vectors", input.display());
    };

    let mut forest = Forest::with_config(ForestConfig {
        metric,
        leaf_size,
        seed,
        ..ForestConfig::new(first.vector.len())
    })?;
    for (line, record) in records.iter().enumerate() {
        forest
            .add_item(record.id, &record.vector)
            .with_context(|| format!("{}: record {}", input.display(), line + 1))?;
    }
    info!(items = forest.count(), dim = forest.dim(), %metric, "items loaded");

    let start = Instant::now();
    forest.build(trees)?;
    info!("Built {} trees in {:?}", trees, start.elapsed());

    save_forest(output, &forest)?;
    Ok(())
}

fn query(index: &Path, vector: &str, k: usize, search_k: i64) -> anyhow::Result<()> {
    let forest = load_forest(index)?;
    let vector = parse_vector(vector)?;
    let neighbors = forest.query(&vector, k, rpforest::search_budget(search_k))?;

    let (ids, distances) = into_parts(neighbors);
    println!("{}", serde_json::to_string(&QueryOutput { ids, distances })?);
    Ok(())
}

fn stats(index: &Path) -> anyhow::Result<()> {
    let forest = load_forest(index)?;
    let stats = StatsOutput {
        items: forest.count(),
        trees: forest.n_trees(),
        nodes: forest.node_count(),
        dim: forest.dim(),
        metric: forest.metric(),
        built: forest.is_built(),
    };
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

fn read_records(path: &Path) -> anyhow::Result<Vec<InputRecord>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut records = Vec::new();
    for (n, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: InputRecord = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: malformed record", path.display(), n + 1))?;
        records.push(record);
    }
    Ok(records)
}

fn parse_vector(raw: &str) -> anyhow::Result<Vec<f32>> {
    raw.split(',')
        .map(|x| {
            x.trim()
                .parse::<f32>()
                .with_context(|| format!("invalid vector component {x:?}"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_vector() {
        assert_eq!(parse_vector("1, -2.5,3").unwrap(), vec![1.0, -2.5, 3.0]);
        assert!(parse_vector("1,x").is_err());
    }

    #[test]
    fn test_read_records_skips_blank_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"id": 3, "vector": [1.0, 2.0]}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"id": -4, "vector": [0.5, 0.0]}}"#).unwrap();

        let records = read_records(file.path()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].id, -4);
        assert_eq!(records[0].vector, vec![1.0, 2.0]);
    }

    #[test]
    fn test_build_then_query_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let input = dir.path().join("items.jsonl");
        let output = dir.path().join("items.rpf");
        let mut file = File::create(&input).unwrap();
        for i in 0..30 {
            writeln!(file, r#"{{"id": {i}, "vector": [{i}.0, 1.0]}}"#).unwrap();
        }

        build(&input, &output, 4, 5, Metric::Euclidean, Some(3)).unwrap();
        let forest = load_forest(&output).unwrap();
        assert_eq!(forest.count(), 30);
        assert_eq!(forest.n_trees(), 4);
        assert_eq!(forest.query(&[12.2, 1.0], 1, Some(30)).unwrap()[0].id, 12);
    }
}
