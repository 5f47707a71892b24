use event_bank::bank::client::{HttpMessageSink, LoggingSink};
use event_bank::bank::handlers::router;
use event_bank::config::BankConfig;
use event_bank::engine::peers::MessageEventSink;
use event_bank::session::directory::{Directory, HttpDirectory, StandaloneDirectory};
use event_bank::session::service::BankService;
use event_bank::storage::memory::MemoryStore;
use std::net::SocketAddr;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        // .with_max_level(tracing::Level::DEBUG)
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 3 {
        eprintln!(
            "Usage: {} --bind <addr:port> [--advertise <url>] [--config <path>] [--directory <url>] [--message-bank <url>]",
            args[0]
        );
        eprintln!("Example: {} --bind 127.0.0.1:7000", args[0]);
        eprintln!(
            "Example: {} --bind 127.0.0.1:7001 --directory http://127.0.0.1:6000 --config bank.json",
            args[0]
        );

        std::process::exit(1);
    }

    let mut bind_addr: Option<SocketAddr> = None;
    let mut advertise: Option<String> = None;
    let mut config_path: Option<String> = None;
    let mut directory_url: Option<String> = None;
    let mut message_bank: Option<String> = None;

    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1).cloned();
        match args[i].as_str() {
            "--bind" => {
                bind_addr = Some(required(value, "--bind")?.parse()?);
                i += 2;
            }
            "--advertise" => {
                advertise = Some(required(value, "--advertise")?);
                i += 2;
            }
            "--config" => {
                config_path = Some(required(value, "--config")?);
                i += 2;
            }
            "--directory" => {
                directory_url = Some(required(value, "--directory")?);
                i += 2;
            }
            "--message-bank" => {
                message_bank = Some(required(value, "--message-bank")?);
                i += 2;
            }
            _ => {
                i += 1;
            }
        }
    }

    let bind_addr = bind_addr.ok_or_else(|| anyhow::anyhow!("--bind is required"))?;
    let bank_addr = advertise.unwrap_or_else(|| format!("http://{}", bind_addr));

    // 1. Configuration:
    let config = match config_path {
        Some(path) => {
            tracing::info!("Loading config from {}", path);
            BankConfig::load(&path)?
        }
        None => {
            tracing::info!("No config given, using defaults");
            BankConfig::default()
        }
    };
    let config = Arc::new(config);

    // 2. Collaborators:
    let http_client = reqwest::Client::new();

    let directory: Arc<dyn Directory> = match &directory_url {
        Some(url) => {
            tracing::info!("Directory at {}", url);
            Arc::new(HttpDirectory::new(http_client.clone(), url))
        }
        None => {
            tracing::info!("No directory given, running standalone");
            Arc::new(StandaloneDirectory)
        }
    };

    let sink: Arc<dyn MessageEventSink> = match &message_bank {
        Some(url) => Arc::new(HttpMessageSink::new(http_client.clone(), url)),
        None => Arc::new(LoggingSink),
    };

    // 3. Session:
    let service = BankService::new(config, bank_addr.clone(), MemoryStore::new(), directory, sink);
    let session_handle = service.start();

    // 4. HTTP server:
    let app = router(service.clone());

    tracing::info!("Bank {} listening on {}", bank_addr, bind_addr);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl+C: {}", e);
            }
        })
        .await?;

    // 5. Teardown:
    tracing::info!("Shutting down");
    service.shutdown().await?;
    session_handle.await?;

    Ok(())
}

fn required(value: Option<String>, flag: &str) -> anyhow::Result<String> {
    value.ok_or_else(|| anyhow::anyhow!("{} needs a value", flag))
}
