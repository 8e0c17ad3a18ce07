use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use iat_survey::api::{CreateTestRequest, StartRunRequest, SurveyApi};
use iat_survey::client::{ApiClient, HttpClient, LocalClient};
use iat_survey::config::Config;
use iat_survey::error::AppError;
use iat_survey::sequencer::driver::{
    ParticipantInput, RunDriver, Screen, ScreenView,
};
use iat_survey::sequencer::{Key, TrialSequencer};
use iat_survey::server;
use iat_survey::storage::SqliteStorage;

/// IAT-style brand association survey: serve the API, define tests, run
/// participant sessions in the terminal, inspect and export results.
#[derive(Parser)]
#[command(name = "iat-survey", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP API server
    Serve,
    /// Create a test from a JSON file (name, brands, words, responseLabels)
    CreateTest {
        /// Path to the JSON payload
        #[arg(long)]
        file: PathBuf,
    },
    /// List all tests
    ListTests,
    /// Run an interactive participant session in the terminal
    Run {
        /// Test to run
        #[arg(long)]
        test_id: i64,
        /// Base URL of a remote server; defaults to the local database
        #[arg(long)]
        url: Option<String>,
        /// Participant age
        #[arg(long)]
        age: Option<i64>,
        /// Participant gender
        #[arg(long)]
        gender: Option<String>,
    },
    /// List a test's runs with their trial counts
    Runs {
        /// Test to inspect
        #[arg(long)]
        test_id: i64,
    },
    /// Print the aggregated panorama of a test
    Panorama {
        /// Test to aggregate
        #[arg(long)]
        test_id: i64,
    },
    /// Export a test's raw trials as CSV
    Export {
        /// Test to export
        #[arg(long)]
        test_id: i64,
        /// Output file; stdout when omitted
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Delete a test and everything recorded under it
    DeleteTest {
        /// Test to delete
        #[arg(long)]
        test_id: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    init_logging(&config);

    match cli.command {
        Command::Serve => {
            info!(
                version = env!("CARGO_PKG_VERSION"),
                "IAT survey server starting..."
            );

            let api = open_api(&config).await?;

            if let Err(e) = server::serve(&config, api).await {
                error!(error = %e, "Server error");
                return Err(e.into());
            }
        }
        Command::CreateTest { file } => {
            let payload = tokio::fs::read_to_string(&file).await?;
            let request: CreateTestRequest = serde_json::from_str(&payload)?;

            let api = open_api(&config).await?;
            let id = api.create_test(request).await?;
            println!("{}", id);
        }
        Command::ListTests => {
            let api = open_api(&config).await?;
            for test in api.list_tests().await? {
                println!("{}\t{}\t{}", test.id, test.created_at.to_rfc3339(), test.name);
            }
        }
        Command::Run {
            test_id,
            url,
            age,
            gender,
        } => {
            run_session(&config, test_id, url, age, gender).await?;
        }
        Command::Runs { test_id } => {
            let api = open_api(&config).await?;
            for run in api.list_runs(test_id).await? {
                let status = match run.completed_at {
                    Some(at) => format!("completed {}", at.to_rfc3339()),
                    None => "in progress".to_string(),
                };
                println!(
                    "run {}\ttrials {}\tage {}\tgender {}\t{}",
                    run.id,
                    run.trial_count,
                    run.age.map(|a| a.to_string()).unwrap_or_else(|| "-".into()),
                    run.gender.as_deref().unwrap_or("-"),
                    status
                );
            }
        }
        Command::Panorama { test_id } => {
            let api = open_api(&config).await?;
            let panorama = api.panorama(test_id).await?;

            for cell in &panorama.matrix {
                let word = panorama
                    .words
                    .iter()
                    .find(|w| w.id == cell.word_id)
                    .map(|w| w.text.as_str())
                    .unwrap_or("?");
                let brand = panorama
                    .brands
                    .iter()
                    .find(|b| b.id == cell.brand_id)
                    .map(|b| b.name.as_str())
                    .unwrap_or("?");
                println!(
                    "{} x {}: +{} -{} (total {})",
                    word, brand, cell.positive, cell.negative, cell.total
                );
            }

            for rt in &panorama.brand_avg_rt {
                let brand = panorama
                    .brands
                    .iter()
                    .find(|b| b.id == rt.brand_id)
                    .map(|b| b.name.as_str())
                    .unwrap_or("?");
                println!("{}: media {:.1} ms", brand, rt.avg_rt_ms);
            }
        }
        Command::Export { test_id, output } => {
            let api = open_api(&config).await?;
            let csv = api.export_csv(test_id).await?;

            match output {
                Some(path) => {
                    tokio::fs::write(&path, &csv).await?;
                    info!(path = %path.display(), bytes = csv.len(), "Export written");
                }
                None => {
                    use std::io::Write;
                    std::io::stdout().write_all(&csv)?;
                }
            }
        }
        Command::DeleteTest { test_id } => {
            let api = open_api(&config).await?;
            api.delete_test(test_id).await?;
            println!("deleted {}", test_id);
        }
    }

    Ok(())
}

/// Open storage and build the service over the local database.
async fn open_api(config: &Config) -> Result<SurveyApi, AppError> {
    let storage = SqliteStorage::new(&config.database).await?;
    info!(path = %config.database.path.display(), "Database initialized");
    Ok(SurveyApi::new(storage, &config.uploads))
}

/// Drive an interactive participant session from the terminal.
async fn run_session(
    config: &Config,
    test_id: i64,
    url: Option<String>,
    age: Option<i64>,
    gender: Option<String>,
) -> anyhow::Result<()> {
    let client: Arc<dyn ApiClient> = match url {
        Some(base) => Arc::new(HttpClient::new(&base, &config.client)?),
        None => Arc::new(LocalClient::new(open_api(config).await?)),
    };

    let test = client.fetch_test(test_id).await?;

    let mut rng = SmallRng::from_os_rng();
    let sequencer = TrialSequencer::new(&test, &mut rng);

    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(read_keys(tx));

    let driver = RunDriver::new(client, rx);
    let mut screen = TermScreen;

    let participant = StartRunRequest { age, gender };
    let outcome = driver.run(&test, participant, sequencer, &mut screen).await?;

    println!(
        "run {}: {}/{} respostas registradas",
        outcome.run_id, outcome.recorded, outcome.total
    );
    if outcome.unsaved > 0 {
        warn!(
            unsaved = outcome.unsaved,
            "Some trials could not be saved; the export will be incomplete"
        );
    }

    Ok(())
}

/// Forward terminal lines as participant input: the first character of a
/// line is the response key, an empty line ends the practice phase.
async fn read_keys(tx: mpsc::Sender<ParticipantInput>) {
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let trimmed = line.trim();
        let input = if trimmed.is_empty() {
            Some(ParticipantInput::FinishPractice)
        } else {
            trimmed
                .chars()
                .next()
                .and_then(Key::from_char)
                .map(ParticipantInput::Key)
        };

        if let Some(input) = input {
            if tx.send(input).await.is_err() {
                break;
            }
        }
    }
}

/// Participant-facing terminal rendering.
struct TermScreen;

impl Screen for TermScreen {
    fn show(&mut self, view: ScreenView<'_>) {
        match view {
            ScreenView::Instructions {
                positive_label,
                negative_label,
            } => {
                println!();
                println!(
                    "Quando aparecer uma palavra, aperte E se achar {} ou O se achar {}.",
                    positive_label, negative_label
                );
                println!("Linha vazia (Enter) encerra a prática e começa o teste.");
                println!();
            }
            ScreenView::PracticeWord { word } => println!("[prática] {}", word),
            ScreenView::Countdown { remaining } => println!("{}", remaining),
            ScreenView::Prime { image_url } => println!("[imagem] {}", image_url),
            ScreenView::Word { text } => println!(">>> {}", text),
            ScreenView::Blank => {}
            ScreenView::Progress { answered, total } => println!("{}/{}", answered, total),
            ScreenView::Finished => println!("Concluído! Obrigado pela participação."),
        }
    }
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        iat_survey::config::LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        iat_survey::config::LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
