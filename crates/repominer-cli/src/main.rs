use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use repominer_api::GitHubClient;
use repominer_core::config::resolve_credential;
use repominer_core::models::{
    DatabaseRow, EnrichedRepoRow, LocalContributorsRow, ProfileRow, RepoRow, UserRow,
};
use repominer_core::sink::{CsvRecord, FromCsvRow};
use repominer_core::{
    Collector, Config, CsvReader, CsvSink, DatabaseDetector, EnrichingSink, KeywordMap,
    ProfileExtractor, RecordSink, RepoAggregator, SearchQuery,
};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, Layer};

#[derive(Parser)]
#[command(name = "repominer")]
#[command(version, about = "Harvest GitHub users and repositories into CSV datasets", long_about = None)]
struct Cli {
    /// GitHub personal access token
    #[arg(long, global = true, env = "GITHUB_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Config file (defaults to <config dir>/repominer/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Where the per-run log file goes, overrides logging.dir
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search users and write login,url rows
    Users {
        #[command(flatten)]
        search: SearchArgs,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// List the repositories of every user in a users CSV
    Repos {
        /// Users CSV produced by `users`
        #[arg(long)]
        input: PathBuf,
        #[command(flatten)]
        range: RowRange,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Search repositories directly
    TopRepos {
        #[command(flatten)]
        search: SearchArgs,
        /// Enrich each repository before writing it
        #[arg(long)]
        enrich: bool,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Enrich a repositories CSV with contributors, files, counts, tags, dependencies and CI
    Enrich {
        #[arg(long)]
        input: PathBuf,
        #[command(flatten)]
        range: RowRange,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Owner profiles for a repositories CSV
    Profiles {
        #[arg(long)]
        input: PathBuf,
        #[command(flatten)]
        range: RowRange,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Contributors of each repository located in a given place
    Locals {
        #[arg(long)]
        input: PathBuf,
        /// Case-insensitive substring of the profile location
        #[arg(long, default_value = "egypt")]
        location: String,
        #[command(flatten)]
        range: RowRange,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Detect database technologies from an enriched CSV
    Databases {
        #[arg(long)]
        input: PathBuf,
        /// JSON object of database name to keywords; built-in list otherwise
        #[arg(long)]
        keywords: Option<PathBuf>,
        #[command(flatten)]
        range: RowRange,
        #[command(flatten)]
        output: OutputArgs,
    },
}

#[derive(Args)]
struct SearchArgs {
    /// Search expression, overrides the configured one
    #[arg(long)]
    query: Option<String>,
    /// First page to request, for resuming
    #[arg(long, default_value_t = 1)]
    start_page: u32,
    /// Stop after this many rows
    #[arg(long)]
    max: Option<usize>,
}

#[derive(Args)]
struct RowRange {
    /// Input rows to skip, for resuming
    #[arg(long, default_value_t = 0)]
    skip: usize,
    /// Input rows to process at most
    #[arg(long)]
    limit: Option<usize>,
}

impl RowRange {
    fn rows<T: FromCsvRow>(&self, input: &Path) -> anyhow::Result<impl Iterator<Item = repominer_core::Result<T>>> {
        let reader = CsvReader::open(input)
            .with_context(|| format!("Failed to open {}", input.display()))?;
        Ok(reader
            .records::<T>()
            .skip(self.skip)
            .take(self.limit.unwrap_or(usize::MAX)))
    }
}

#[derive(Args)]
struct OutputArgs {
    /// CSV file to write
    #[arg(long, short)]
    output: PathBuf,
    /// Continue an existing file instead of truncating it
    #[arg(long)]
    append: bool,
}

impl OutputArgs {
    fn sink<R: CsvRecord>(&self) -> anyhow::Result<CsvSink<BufWriter<File>, R>> {
        let sink = if self.append {
            CsvSink::append(&self.output)
        } else {
            CsvSink::create(&self.output)
        };
        sink.with_context(|| format!("Failed to open {}", self.output.display()))
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    let log_dir = cli.log_dir.clone().unwrap_or_else(|| config.logging.dir.clone());
    let (_guard, log_path) = init_logging(&log_dir)?;
    info!("Logging to {}", log_path.display());

    // No token, no party - bail before touching the network
    let credential = resolve_credential(cli.token.as_deref())?;
    let client = GitHubClient::with_base_url(&credential, config.github.api_url.clone())?
        .with_retry_config(config.retry.clone());
    let api: Arc<dyn repominer_api::Fetch> = Arc::new(client);
    let api_base = config.github.api_url.as_str();

    match cli.command {
        Commands::Users { search, output } => {
            let mut query = SearchQuery::users(api_base, &config.search);
            if let Some(q) = search.query {
                query = query.with_query(q);
            }
            let mut sink = output.sink::<UserRow>()?;
            let summary = Collector::new(api)
                .collect_users(&query, search.start_page, search.max, &mut sink)
                .await?;
            println!(
                "Wrote {} users from {} pages ({:?}), next page {}",
                summary.rows_written, summary.pages_fetched, summary.stop, summary.next_page
            );
        }
        Commands::Repos {
            input,
            range,
            output,
        } => {
            let mut sink = output.sink::<RepoRow>()?;
            let summary = Collector::new(api)
                .collect_owned_repos(range.rows::<UserRow>(&input)?, &mut sink)
                .await?;
            println!(
                "Wrote {} repositories for {} users ({} failed)",
                summary.rows_written, summary.users_visited, summary.users_failed
            );
        }
        Commands::TopRepos {
            search,
            enrich,
            output,
        } => {
            let mut query = SearchQuery::repositories(api_base, &config.search);
            if let Some(q) = search.query {
                query = query.with_query(q);
            }
            let collector = Collector::new(Arc::clone(&api));

            let summary = if enrich {
                let aggregator = RepoAggregator::from_config(api, &config);
                let mut csv = output.sink::<EnrichedRepoRow>()?;
                let mut sink = EnrichingSink::new(&aggregator, &mut csv);
                collector
                    .collect_repositories(&query, search.start_page, search.max, &mut sink)
                    .await?
            } else {
                let mut sink = output.sink::<RepoRow>()?;
                collector
                    .collect_repositories(&query, search.start_page, search.max, &mut sink)
                    .await?
            };
            println!(
                "Wrote {} repositories from {} pages ({:?}), next page {}",
                summary.rows_written, summary.pages_fetched, summary.stop, summary.next_page
            );
        }
        Commands::Enrich {
            input,
            range,
            output,
        } => {
            let aggregator = RepoAggregator::from_config(api, &config);
            let mut csv = output.sink::<EnrichedRepoRow>()?;
            let mut sink = EnrichingSink::new(&aggregator, &mut csv);
            let mut written = 0usize;
            for row in range.rows::<RepoRow>(&input)? {
                sink.write(row?).await?;
                written += 1;
            }
            println!("Wrote {} enriched repositories", written);
        }
        Commands::Profiles {
            input,
            range,
            output,
        } => {
            let mut sink = output.sink::<ProfileRow>()?;
            let summary = ProfileExtractor::new(api, api_base)
                .collect_profiles(range.rows::<RepoRow>(&input)?, &mut sink)
                .await?;
            println!(
                "Wrote {} profiles from {} repositories ({} failed)",
                summary.rows_written, summary.rows_read, summary.failed
            );
        }
        Commands::Locals {
            input,
            location,
            range,
            output,
        } => {
            let mut sink = output.sink::<LocalContributorsRow>()?;
            let written = ProfileExtractor::new(api, api_base)
                .collect_local_contributors(range.rows::<RepoRow>(&input)?, &location, &mut sink)
                .await?;
            println!("Wrote {} repositories with local contributors", written);
        }
        Commands::Databases {
            input,
            keywords,
            range,
            output,
        } => {
            let keywords = match keywords {
                Some(path) => KeywordMap::load(&path)
                    .with_context(|| format!("Failed to load keywords from {}", path.display()))?,
                None => KeywordMap::builtin()?,
            };
            let detector = DatabaseDetector::new(api, api_base, keywords)?;
            let mut sink = output.sink::<DatabaseRow>()?;
            let written = detector
                .collect(range.rows::<EnrichedRepoRow>(&input)?, &mut sink)
                .await?;
            println!("Wrote {} database rows", written);
        }
    }

    Ok(())
}

/// File log for the run plus stderr, active until the guard drops
///
/// The runtime is single threaded, so a thread-local default sees every event.
fn init_logging(dir: &Path) -> anyhow::Result<(tracing::subscriber::DefaultGuard, PathBuf)> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
    let path = dir.join(format!(
        "{}.log",
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    ));
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Failed to open log file {}", path.display()))?;

    let file_layer = fmt::layer()
        .with_writer(std::sync::Mutex::new(file))
        .with_ansi(false)
        .with_line_number(true)
        .with_filter(EnvFilter::new("repominer=info"));
    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_filter(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| "repominer=info".into()),
    );

    let subscriber = tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer);
    Ok((tracing::subscriber::set_default(subscriber), path))
}
