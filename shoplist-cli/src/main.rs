use clap::{Parser, Subcommand};
use futures::future::join_all;
use serde_json::{json, Value};
use shoplist_client::{ApiClient, ApiRequest, ApiResponse, ClientConfig, ClientError, Method};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "shoplist")]
#[command(version = "0.1.0")]
#[command(about = "Shoplist - queued, deduplicated and authenticated API calls", long_about = None)]
struct Cli {
    /// API base URL (overrides SHOPLIST_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Fixed bearer token (overrides SHOPLIST_ACCESS_TOKEN)
    #[arg(long, global = true)]
    token: Option<String>,

    /// Session endpoint (overrides SHOPLIST_SESSION_URL)
    #[arg(long, global = true)]
    session_url: Option<String>,

    /// Print Prometheus metrics before exiting
    #[arg(long, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// GET a path through the queue
    Get {
        /// Path relative to the API URL, e.g. /api/categories
        path: String,

        /// Scheduling priority; higher runs first
        #[arg(short, long, default_value_t = 0)]
        priority: i32,

        /// Issue the same request N times concurrently
        #[arg(short, long, default_value_t = 1)]
        repeat: usize,

        /// Skip the auth header
        #[arg(long)]
        anonymous: bool,
    },

    /// Send an authenticated request with an optional JSON body
    Send {
        /// HTTP method (POST, PUT, PATCH, DELETE, ...)
        method: String,

        /// Path relative to the API URL
        path: String,

        /// JSON request body
        #[arg(short, long)]
        body: Option<String>,
    },

    /// Show the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("shoplist_client=info,shoplist=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    let mut config = ClientConfig::from_env();
    if let Some(url) = cli.api_url {
        config.api_url = url;
    }
    if let Some(token) = cli.token {
        config.access_token = Some(token);
    }
    if let Some(url) = cli.session_url {
        config.session_url = Some(url);
    }

    shoplist_client::init_metrics();

    match cli.command {
        Commands::Get { path, priority, repeat, anonymous } => {
            let client = ApiClient::from_config(&config)?;
            let repeat = repeat.max(1);
            info!(%path, priority, repeat, anonymous, "Fetching");

            let calls = (0..repeat).map(|_| {
                let request = ApiRequest::get(path.as_str());
                let client = &client;
                async move {
                    if anonymous {
                        client.fetch(request, priority).await
                    } else {
                        client.authed_fetch(request, priority).await
                    }
                }
            });
            let results = join_all(calls).await;

            let mut failures = 0;
            for (i, result) in results.iter().enumerate() {
                match result {
                    Ok(response) if i == 0 => print_response(response)?,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(call = i, error = %e, "Call failed");
                        failures += 1;
                    }
                }
            }

            println!("=== Stats ===");
            let stats = json!({
                "queue": client.queue().stats(),
                "auth": client.auth().stats(),
                "failures": failures,
            });
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }

        Commands::Send { method, path, body } => {
            let client = ApiClient::from_config(&config)?;
            let method = Method::from_bytes(method.to_uppercase().as_bytes())?;
            let mut request = ApiRequest::new(method, path);
            if let Some(body) = body {
                let body: Value = serde_json::from_str(&body)?;
                request = request.json(&body)?;
            }

            let response = client.authed_fetch(request, 0).await?;
            print_response(&response)?;
        }

        Commands::Config => print_config(&config),
    }

    if cli.metrics {
        println!("=== Metrics ===");
        println!("{}", shoplist_client::metrics::encode_metrics());
    }

    Ok(())
}

fn print_response(response: &ApiResponse) -> Result<(), ClientError> {
    println!("HTTP {}", response.status());
    match response.json::<Value>() {
        Ok(body) => println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default()),
        Err(_) => println!("{}", response.text()?),
    }
    Ok(())
}

fn print_config(config: &ClientConfig) {
    println!("=== API ===");
    println!("URL: {}", config.api_url);
    println!(
        "Session URL: {}",
        config.session_url.as_deref().unwrap_or("(none)")
    );
    println!(
        "Access token: {}",
        if config.access_token.is_some() { "set" } else { "unset" }
    );
    println!();

    println!("=== Queue ===");
    println!("Max concurrent: {}", config.queue.max_concurrent);
    println!("Timeout: {} ms", config.queue.timeout.as_millis());
    println!("Dedup window: {} ms", config.queue.dedup_window.as_millis());
    println!();

    println!("=== Auth ===");
    println!("Cache duration: {} s", config.auth.cache_duration.as_secs());
}
