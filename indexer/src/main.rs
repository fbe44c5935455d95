use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use search_core::persist::{load_all, save_doc_id_map, save_index, save_meta, IndexPaths, MetaFile, FORMAT_VERSION};
use search_core::{
    build_from_records, Bm25Params, CorpusRecord, DirichletParams, IdfScheme, IndexConfig, RankingConfig,
    SearchEngine, SearchStatus, TfScheme, TokenizerConfig, VectorWeighting,
};
use tracing_subscriber::{EnvFilter, fmt};
use walkdir::WalkDir;

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Build and query the image-context search index", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the index from crawler metadata (JSON array, JSON object or JSONL, file or directory)
    Build {
        /// Input path (file or directory)
        #[arg(long)]
        input: String,
        /// Output index directory
        #[arg(long, default_value = "./image_index_data")]
        output: String,
        /// Term-frequency component of vector-space weights
        #[arg(long, value_enum, default_value_t = TfArg::Log)]
        tf: TfArg,
        /// Inverse-document-frequency component of vector-space weights
        #[arg(long, value_enum, default_value_t = IdfArg::Smoothed)]
        idf: IdfArg,
        /// Index stopwords instead of dropping them
        #[arg(long, default_value_t = false)]
        keep_stopwords: bool,
        /// Disable English stemming
        #[arg(long, default_value_t = false)]
        no_stem: bool,
    },
    /// Run one query against a built index and print the results
    Search {
        /// Index directory
        #[arg(long, default_value = "./image_index_data")]
        index: String,
        /// Ranking model: vsm, bm25 or lm_dirichlet
        #[arg(long, default_value = "bm25")]
        model: String,
        #[arg(long)]
        query: String,
        /// Number of results
        #[arg(long, default_value_t = 10, allow_negative_numbers = true)]
        k: i64,
        #[command(flatten)]
        ranking: RankingArgs,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum TfArg { Raw, Log }

#[derive(Clone, Copy, ValueEnum)]
enum IdfArg { Plain, Smoothed }

#[derive(Args)]
struct RankingArgs {
    /// BM25 term-frequency saturation
    #[arg(long, env = "SEARCH_BM25_K1", default_value_t = 1.2)]
    k1: f64,
    /// BM25 length normalization
    #[arg(long, env = "SEARCH_BM25_B", default_value_t = 0.75)]
    b: f64,
    /// Dirichlet smoothing prior
    #[arg(long, env = "SEARCH_LM_MU", default_value_t = 2000.0)]
    mu: f64,
}

impl From<&RankingArgs> for RankingConfig {
    fn from(args: &RankingArgs) -> Self {
        RankingConfig {
            bm25: Bm25Params { k1: args.k1, b: args.b },
            dirichlet: DirichletParams { mu: args.mu },
        }
    }
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Build { input, output, tf, idf, keep_stopwords, no_stem } => {
            let config = IndexConfig {
                tokenizer: TokenizerConfig { remove_stopwords: !keep_stopwords, stem: !no_stem },
                weighting: VectorWeighting {
                    tf: match tf { TfArg::Raw => TfScheme::Raw, TfArg::Log => TfScheme::Log },
                    idf: match idf { IdfArg::Plain => IdfScheme::Plain, IdfArg::Smoothed => IdfScheme::Smoothed },
                },
            };
            build_index(&input, &output, config)
        }
        Commands::Search { index, model, query, k, ranking } => {
            let ranking = RankingConfig::from(&ranking);
            if let Err(err) = ranking.validate() {
                bail!("{err}");
            }
            search_index(&index, &model, &query, k, ranking)
        }
    }
}

fn build_index(input: &str, output: &str, config: IndexConfig) -> Result<()> {
    let files = input_files(Path::new(input));
    if files.is_empty() {
        bail!("no .json or .jsonl input found at {input}");
    }

    let mut records = Vec::new();
    for file in &files {
        records.extend(read_records(file)?);
    }
    tracing::info!(files = files.len(), records = records.len(), "loaded crawler metadata");

    let (index, doc_map) = build_from_records(records, config)?;

    let out_paths = IndexPaths::new(output);
    save_index(&out_paths, &index)?;
    save_doc_id_map(&out_paths, &doc_map)?;
    let meta = MetaFile {
        num_docs: index.num_docs(),
        vocabulary: index.vocabulary_len(),
        created_at: time::OffsetDateTime::now_utc().format(&time::format_description::well_known::Rfc3339).unwrap_or_else(|_| "".into()),
        version: FORMAT_VERSION,
    };
    save_meta(&out_paths, &meta)?;

    tracing::info!(
        output,
        num_docs = index.num_docs(),
        vocabulary = index.vocabulary_len(),
        avg_doc_length = index.avg_doc_length(),
        "index build complete"
    );
    Ok(())
}

fn search_index(index_dir: &str, model: &str, query: &str, k: i64, ranking: RankingConfig) -> Result<()> {
    let (index, doc_map) = load_all(&IndexPaths::new(index_dir))?;
    let engine = SearchEngine::with_index(index, ranking);
    let outcome = engine.search(model, query, k)?;

    match outcome.status {
        SearchStatus::UnknownModel => println!("Unknown model '{model}'. Available models: vsm, bm25, lm_dirichlet"),
        SearchStatus::NoMatches => println!("No results found."),
        SearchStatus::Ok => {
            let results = doc_map.resolve(&outcome.hits);
            println!("Top {} results for '{}' ({}):", results.len(), query, model);
            for res in results {
                println!("  Rank: {}", res.rank);
                println!("  Score: {:.4}", res.score);
                println!("  Image: {}", res.image_url);
                println!("  Source: {}", res.source_page);
                println!("{}", "-".repeat(20));
            }
        }
    }
    Ok(())
}

fn input_files(input_path: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = Vec::new();
    if input_path.is_dir() {
        for entry in WalkDir::new(input_path).sort_by_file_name().into_iter().filter_map(|e| e.ok()) {
            let p = entry.path();
            if p.is_file() {
                if let Some(ext) = p.extension().and_then(|s| s.to_str()) {
                    if matches!(ext, "json" | "jsonl") {
                        files.push(p.to_path_buf());
                    }
                }
            }
        }
    } else if input_path.is_file() {
        files.push(input_path.to_path_buf());
    }
    files
}

fn read_records(file: &Path) -> Result<Vec<CorpusRecord>> {
    let reader = BufReader::new(File::open(file)?);
    if file.extension().and_then(|s| s.to_str()) == Some("jsonl") {
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() { continue; }
            records.push(serde_json::from_str(&line)?);
        }
        return Ok(records);
    }

    let json: serde_json::Value = serde_json::from_reader(reader)?;
    match json {
        serde_json::Value::Array(arr) => {
            let mut records = Vec::with_capacity(arr.len());
            for v in arr {
                records.push(serde_json::from_value(v)?);
            }
            Ok(records)
        }
        serde_json::Value::Object(_) => Ok(vec![serde_json::from_value(json)?]),
        _ => {
            tracing::warn!(file = %file.display(), "ignoring input that is neither an array nor an object");
            Ok(Vec::new())
        }
    }
}
