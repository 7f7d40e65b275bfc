//! Clap definitions and the execution of each subcommand.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum};
use thiserror::Error;
use tracing::{Span, field, info, instrument};
use vectorlib_core::{
    CosineSpace, DEFAULT_RNG_SEED, HnswError, HnswIndex, HnswParams, IndexHeader, L2Space, Label,
    LoadOptions, SearchResult, Space, encode_f32,
};

const DEFAULT_MAX_CONNECTIONS: usize = 16;
const DEFAULT_EF_CONSTRUCTION: usize = 200;
const DEFAULT_K: usize = 10;

/// Top-level CLI options parsed by [`clap`].
#[derive(Debug, Parser, Clone)]
#[command(name = "vectorlib", about = "Build and query HNSW vector indices.")]
pub struct Cli {
    /// Command to execute.
    #[command(subcommand)]
    pub command: Command,
}

/// Supported CLI commands.
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Build an index from a text file of vectors and save it.
    Build(BuildCommand),
    /// Load a saved index and print the nearest neighbours of one vector.
    Query(QueryCommand),
    /// Print the header of a saved index.
    Inspect(InspectCommand),
}

/// Distance used to compare vectors.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, ValueEnum)]
pub enum Metric {
    /// Squared Euclidean distance.
    #[default]
    L2,
    /// One minus cosine similarity.
    Cosine,
}

impl Metric {
    fn space(self, dim: usize) -> Box<dyn Space> {
        match self {
            Self::L2 => Box::new(L2Space::new(dim)),
            Self::Cosine => Box::new(CosineSpace::new(dim)),
        }
    }

    const fn label(self) -> &'static str {
        match self {
            Self::L2 => "l2",
            Self::Cosine => "cosine",
        }
    }
}

/// Options accepted by the `build` command.
#[derive(Debug, Args, Clone)]
pub struct BuildCommand {
    /// Text file with one vector per line, components separated by commas or
    /// whitespace. Blank lines and lines starting with `#` are skipped.
    pub input: PathBuf,

    /// Destination of the saved index.
    #[arg(long, short)]
    pub output: PathBuf,

    /// Distance metric. Pass the same value to `query`; the saved index
    /// does not record it.
    #[arg(long, value_enum, default_value_t = Metric::L2)]
    pub metric: Metric,

    /// Neighbour cap `M` on upper layers; the base layer keeps `2M`.
    #[arg(long = "max-connections", default_value_t = DEFAULT_MAX_CONNECTIONS)]
    pub max_connections: usize,

    /// Search breadth used while inserting.
    #[arg(long = "ef-construction", default_value_t = DEFAULT_EF_CONSTRUCTION)]
    pub ef_construction: usize,

    /// Seed of the level generator.
    #[arg(long, default_value_t = DEFAULT_RNG_SEED)]
    pub seed: u64,

    /// Capacity of the index (defaults to the number of input vectors).
    #[arg(long)]
    pub capacity: Option<usize>,
}

/// Options accepted by the `query` command.
#[derive(Debug, Args, Clone)]
pub struct QueryCommand {
    /// Saved index to load.
    pub index: PathBuf,

    /// Query vector as comma-separated components.
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true, required = true)]
    pub vector: Vec<f32>,

    /// Distance metric the index was built with. The saved index does not
    /// record it, so a mismatched metric returns wrong distances silently.
    #[arg(long, value_enum, default_value_t = Metric::L2)]
    pub metric: Metric,

    /// Number of neighbours to return.
    #[arg(long, short, default_value_t = DEFAULT_K)]
    pub k: usize,

    /// Query breadth; defaults to the index default.
    #[arg(long)]
    pub ef: Option<usize>,
}

/// Options accepted by the `inspect` command.
#[derive(Debug, Args, Clone)]
pub struct InspectCommand {
    /// Saved index to read.
    pub index: PathBuf,
}

/// Errors surfaced while executing CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// A file could not be opened or read.
    #[error("failed to read `{path}`: {source}")]
    Io {
        /// Path that triggered the failure.
        path: PathBuf,
        /// Underlying operating system error.
        #[source]
        source: io::Error,
    },
    /// A line of the vector file could not be parsed.
    #[error("`{path}` line {line}: {reason}")]
    Parse {
        /// File being parsed.
        path: PathBuf,
        /// One-based line number.
        line: usize,
        /// What was wrong with the line.
        reason: String,
    },
    /// The vector file held no vectors.
    #[error("`{path}` contains no vectors")]
    EmptyInput {
        /// File that was read.
        path: PathBuf,
    },
    /// The query vector does not match the stored vector width.
    #[error("query has {actual} component(s) but the index stores {expected_bytes}-byte vectors")]
    QueryDimension {
        /// Stored vector width in bytes.
        expected_bytes: u64,
        /// Components supplied on the command line.
        actual: usize,
    },
    /// The index rejected the operation.
    #[error(transparent)]
    Core(#[from] HnswError),
}

/// Outcome of `build`.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildSummary {
    /// Where the index was written.
    pub output: PathBuf,
    /// Vectors inserted.
    pub elements: usize,
    /// Components per vector.
    pub dimension: usize,
    /// Top layer of the built graph.
    pub max_level: Option<usize>,
}

/// Outcome of `query`, closest hit first.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySummary {
    /// Neighbours found.
    pub hits: Vec<SearchResult>,
}

/// Outcome of `inspect`.
#[derive(Debug, Clone, PartialEq)]
pub struct InspectSummary {
    /// File that was read.
    pub path: PathBuf,
    /// Decoded header.
    pub header: IndexHeader,
}

/// Result of any command, ready for [`render_output`].
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutput {
    /// `build` finished.
    Build(BuildSummary),
    /// `query` finished.
    Query(QuerySummary),
    /// `inspect` finished.
    Inspect(InspectSummary),
}

/// Executes the command represented by `cli`.
///
/// # Errors
/// Returns [`CliError`] when reading inputs or running the index fails.
///
/// # Examples
/// ```
/// # use std::error::Error;
/// # use vectorlib_cli::cli::{BuildCommand, Cli, Command, CommandOutput, Metric, run_cli};
/// # use tempfile::TempDir;
/// #
/// # fn main() -> Result<(), Box<dyn Error>> {
/// let dir = TempDir::new()?;
/// let input = dir.path().join("vectors.txt");
/// std::fs::write(&input, "0 0\n1 0\n0 1\n")?;
/// let cli = Cli {
///     command: Command::Build(BuildCommand {
///         input,
///         output: dir.path().join("index.hnsw"),
///         metric: Metric::L2,
///         max_connections: 4,
///         ef_construction: 16,
///         seed: 1,
///         capacity: None,
///     }),
/// };
/// let CommandOutput::Build(summary) = run_cli(cli)? else {
///     panic!("build must report a build summary");
/// };
/// assert_eq!(summary.elements, 3);
/// # Ok(())
/// # }
/// ```
#[instrument(name = "cli.run", err, skip(cli), fields(command = field::Empty))]
pub fn run_cli(cli: Cli) -> Result<CommandOutput, CliError> {
    let span = Span::current();
    match cli.command {
        Command::Build(command) => {
            span.record("command", field::display("build"));
            run_build(command).map(CommandOutput::Build)
        }
        Command::Query(command) => {
            span.record("command", field::display("query"));
            run_query(command).map(CommandOutput::Query)
        }
        Command::Inspect(command) => {
            span.record("command", field::display("inspect"));
            run_inspect(&command.index).map(CommandOutput::Inspect)
        }
    }
}

#[instrument(
    name = "cli.build",
    err,
    skip(command),
    fields(input = %command.input.display(), metric = command.metric.label()),
)]
pub(super) fn run_build(command: BuildCommand) -> Result<BuildSummary, CliError> {
    let vectors = read_vectors(&command.input)?;
    let dimension = vectors.first().map_or(0, Vec::len);
    let capacity = command.capacity.unwrap_or(vectors.len());
    let params = HnswParams::new(command.max_connections, command.ef_construction)?
        .with_rng_seed(command.seed);

    let index = HnswIndex::new(command.metric.space(dimension), capacity, params)?;
    let items: Vec<(Label, Vec<u8>)> = vectors
        .iter()
        .enumerate()
        .map(|(label, vector)| (label as Label, encode_f32(vector)))
        .collect();
    index.add_batch(&items)?;
    index.save(&command.output)?;

    info!(
        elements = index.len(),
        dimension,
        max_level = ?index.max_level(),
        "index built"
    );
    Ok(BuildSummary {
        output: command.output,
        elements: index.len(),
        dimension,
        max_level: index.max_level(),
    })
}

#[instrument(
    name = "cli.query",
    err,
    skip(command),
    fields(index = %command.index.display(), k = command.k),
)]
pub(super) fn run_query(command: QueryCommand) -> Result<QuerySummary, CliError> {
    let header = read_header(&command.index)?;
    let query = encode_f32(&command.vector);
    let expected_bytes = header.label_offset.saturating_sub(header.data_offset);
    if query.len() as u64 != expected_bytes {
        return Err(CliError::QueryDimension {
            expected_bytes,
            actual: command.vector.len(),
        });
    }

    let space = command.metric.space(command.vector.len());
    let index = HnswIndex::load(space, &command.index, LoadOptions::default())?;
    if let Some(ef) = command.ef {
        index.set_ef(ef);
    }
    let hits = index.search_knn_closer_first(&query, command.k, None)?;
    info!(hits = hits.len(), "query completed");
    Ok(QuerySummary { hits })
}

#[instrument(name = "cli.inspect", err, fields(path = %path.display()))]
pub(super) fn run_inspect(path: &Path) -> Result<InspectSummary, CliError> {
    Ok(InspectSummary {
        path: path.to_path_buf(),
        header: read_header(path)?,
    })
}

fn open(path: &Path) -> Result<BufReader<File>, CliError> {
    let file = File::open(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(BufReader::new(file))
}

fn read_header(path: &Path) -> Result<IndexHeader, CliError> {
    Ok(IndexHeader::read_from(open(path)?)?)
}

/// Reads one vector per line, requiring every vector to share a width.
pub(super) fn read_vectors(path: &Path) -> Result<Vec<Vec<f32>>, CliError> {
    let mut vectors: Vec<Vec<f32>> = Vec::new();
    for (index, line) in open(path)?.lines().enumerate() {
        let line = line.map_err(|source| CliError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let parse_error = |reason: String| CliError::Parse {
            path: path.to_path_buf(),
            line: index + 1,
            reason,
        };
        let vector = parse_components(trimmed).map_err(parse_error)?;
        if let Some(first) = vectors.first() {
            if first.len() != vector.len() {
                return Err(parse_error(format!(
                    "expected {} component(s), found {}",
                    first.len(),
                    vector.len()
                )));
            }
        }
        vectors.push(vector);
    }
    if vectors.is_empty() {
        return Err(CliError::EmptyInput {
            path: path.to_path_buf(),
        });
    }
    Ok(vectors)
}

pub(super) fn parse_components(line: &str) -> Result<Vec<f32>, String> {
    line.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|token| !token.is_empty())
        .map(|token| {
            let value: f32 = token
                .parse()
                .map_err(|err| format!("invalid component `{token}`: {err}"))?;
            if value.is_finite() {
                Ok(value)
            } else {
                Err(format!("component `{token}` is not finite"))
            }
        })
        .collect()
}

/// Renders `output` to `writer` as plain text.
///
/// # Errors
/// Returns [`io::Error`] if writing to `writer` fails.
pub fn render_output(output: &CommandOutput, mut writer: impl Write) -> io::Result<()> {
    match output {
        CommandOutput::Build(summary) => {
            writeln!(writer, "index: {}", summary.output.display())?;
            writeln!(writer, "elements: {}", summary.elements)?;
            writeln!(writer, "dimension: {}", summary.dimension)?;
            match summary.max_level {
                Some(level) => writeln!(writer, "max level: {level}"),
                None => writeln!(writer, "max level: none"),
            }
        }
        CommandOutput::Query(summary) => {
            for hit in &summary.hits {
                writeln!(writer, "{}\t{}", hit.label, hit.distance)?;
            }
            Ok(())
        }
        CommandOutput::Inspect(summary) => {
            let header = &summary.header;
            writeln!(writer, "index: {}", summary.path.display())?;
            writeln!(writer, "elements: {}", header.element_count)?;
            writeln!(writer, "capacity: {}", header.max_elements)?;
            writeln!(writer, "max level: {}", header.max_level)?;
            writeln!(writer, "entry point: {}", header.entry_point)?;
            writeln!(writer, "M: {}", header.m)?;
            writeln!(writer, "M0: {}", header.max_m0)?;
            writeln!(writer, "ef construction: {}", header.ef_construction)?;
            writeln!(writer, "record size: {}", header.record_size)
        }
    }
}
