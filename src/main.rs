use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use bench_worker::bench::BenchCatalog;
use bench_worker::client::ControlClient;
use bench_worker::config::{ClientConfig, ServerConfig};
use bench_worker::properties::Properties;
use bench_worker::scheduler::{JobRecord, JobRegistry, JobState};
use bench_worker::shutdown::install_shutdown_handler;
use bench_worker::store::JobStore;

#[derive(Parser, Debug)]
#[command(name = "bench-worker")]
#[command(version)]
#[command(about = "Runs benchmark jobs against a data store, one at a time")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start a worker
    Server(ServerArgs),

    /// Job management commands against a running worker
    Job {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: JobCommands,
    },
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Address to bind the control server to
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// Port for the control server
    #[arg(long, default_value = "8580")]
    port: u16,

    /// Directory holding one sub-directory per job
    #[arg(long, default_value = "jobs")]
    store_dir: PathBuf,
}

// =============================================================================
// Client Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Worker address
    #[arg(long, short = 'a', default_value = "http://127.0.0.1:8580")]
    addr: String,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(clap::Subcommand, Debug)]
enum JobCommands {
    /// List jobs known to the worker
    List {
        /// Only show jobs in this state (initialized, started, finished, error)
        #[arg(long)]
        state: Option<JobState>,
    },
    /// Get status of a specific job
    Status {
        /// The job ID
        job_id: String,
    },
    /// Create a job and wait for its run to end
    Run {
        /// Workload name (e.g. "core")
        #[arg(long)]
        workload: String,

        /// Database name (e.g. "memory")
        #[arg(long)]
        database: String,

        /// Job ID; a random one is generated when omitted
        #[arg(long)]
        id: Option<String>,

        /// Property file, may be repeated; later files win
        #[arg(short = 'P', long = "property-file")]
        property_files: Vec<PathBuf>,

        /// Single property as name=value, may be repeated; wins over files
        #[arg(short = 'p', long = "prop")]
        props: Vec<String>,
    },
    /// Download an artifact of a finished job
    Download {
        /// The job ID
        job_id: String,

        /// Artifact key (file name inside the job directory)
        key: String,

        /// Output file; defaults to the key's file name
        #[arg(short = 'O', long)]
        out: Option<PathBuf>,
    },
}

// =============================================================================
// Helper Functions
// =============================================================================

fn format_time(time: Option<chrono::DateTime<chrono::Utc>>) -> String {
    time.map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".to_string())
}

fn print_job(record: &JobRecord) {
    println!("Job ID:      {}", record.id);
    println!("State:       {}", record.state);
    println!("Workload:    {}", record.workload);
    println!("Database:    {}", record.database);
    println!("Started At:  {}", format_time(record.started_at));
    println!("Finished At: {}", format_time(record.finished_at));
    if let Some(error) = &record.error {
        println!("Error:       {}", error);
    }
}

async fn load_properties(
    files: &[PathBuf],
    values: &[String],
) -> Result<Properties, Box<dyn std::error::Error>> {
    let mut props = Properties::new();
    for file in files {
        let text = tokio::fs::read_to_string(file).await?;
        props.extend(Properties::parse(&text)?);
    }
    for value in values {
        let (key, val) = value
            .split_once('=')
            .ok_or_else(|| format!("invalid property {value:?}, expected name=value"))?;
        props.set(key.trim(), val);
    }
    Ok(props)
}

// =============================================================================
// Server Implementation
// =============================================================================

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let listen_addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
    let config = ServerConfig::new(listen_addr, args.store_dir);

    let shutdown = install_shutdown_handler()?;
    let store = JobStore::open(&config.store_dir).await?;
    let catalog = BenchCatalog::builtin();

    tracing::info!(
        listen_addr = %config.listen_addr,
        store_dir = %config.store_dir.display(),
        workloads = ?catalog.workload_names(),
        databases = ?catalog.database_names(),
        "Starting bench-worker"
    );

    let registry = Arc::new(JobRegistry::new(store, catalog).with_shutdown(shutdown.clone()));
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    bench_worker::server::serve(listener, registry, shutdown).await?;

    tracing::info!("Worker stopped");
    Ok(())
}

// =============================================================================
// Client Command Handlers
// =============================================================================

async fn handle_job_list(
    client: &ControlClient,
    state: Option<JobState>,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut jobs = client.list_jobs().await?;
    if let Some(state) = state {
        jobs.retain(|job| job.state == state);
    }

    match output_format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&jobs)?),
        OutputFormat::Table => {
            if jobs.is_empty() {
                println!("No jobs found.");
                return Ok(());
            }
            println!(
                "{:<24} {:<12} {:<12} {:<12} FINISHED AT",
                "JOB ID", "STATE", "WORKLOAD", "DATABASE"
            );
            println!("{}", "-".repeat(90));
            for job in &jobs {
                println!(
                    "{:<24} {:<12} {:<12} {:<12} {}",
                    job.id,
                    job.state,
                    job.workload,
                    job.database,
                    format_time(job.finished_at)
                );
            }
        }
    }
    Ok(())
}

async fn handle_job_status(
    client: &ControlClient,
    job_id: &str,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let record = client.job_status(job_id).await?;
    match output_format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&record)?),
        OutputFormat::Table => print_job(&record),
    }
    Ok(())
}

async fn handle_job_run(
    client: &ControlClient,
    job_id: String,
    workload: &str,
    database: &str,
    props: Properties,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    if let OutputFormat::Table = output_format {
        println!("Running job {} ({} on {})...", job_id, workload, database);
    }
    client.start_job(&job_id, &props, database, workload).await?;
    handle_job_status(client, &job_id, output_format).await
}

async fn handle_job_download(
    client: &ControlClient,
    job_id: &str,
    key: &str,
    out: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let out = match out {
        Some(path) => path,
        None => PathBuf::from(
            std::path::Path::new(key)
                .file_name()
                .ok_or_else(|| format!("cannot derive a file name from key {key:?}"))?,
        ),
    };
    let mut file = tokio::fs::File::create(&out).await?;
    let written = client.download_artifact_to(job_id, key, &mut file).await?;
    println!("Wrote {} bytes to {}", written, out.display());
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Server(server_args) => {
            run_server(server_args).await?;
        }
        Commands::Job { client, command } => {
            let control = ControlClient::with_config(&ClientConfig::new(client.addr.clone()))?;

            match command {
                JobCommands::List { state } => {
                    handle_job_list(&control, state, &client.output).await?
                }
                JobCommands::Status { job_id } => {
                    handle_job_status(&control, &job_id, &client.output).await?
                }
                JobCommands::Run {
                    workload,
                    database,
                    id,
                    property_files,
                    props,
                } => {
                    let props = load_properties(&property_files, &props).await?;
                    let job_id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                    handle_job_run(
                        &control,
                        job_id,
                        &workload,
                        &database,
                        props,
                        &client.output,
                    )
                    .await?
                }
                JobCommands::Download { job_id, key, out } => {
                    handle_job_download(&control, &job_id, &key, out).await?
                }
            }
        }
    }

    Ok(())
}
