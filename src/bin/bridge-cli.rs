use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Method;
use serde_json::{json, Value};

use lyve_bridge::signing::RequestSigner;

#[derive(Parser)]
#[command(name = "bridge-cli")]
#[command(about = "Management CLI for the Lyve HikCentral bridge", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:3000", env = "LYVE_BRIDGE_URL")]
    url: String,

    #[arg(short, long, env = "LYVE_API_KEY", default_value = "")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show bridge health and circuit breaker state
    Health,
    /// Look up a resident by email and community
    Check {
        email: String,
        community: String,
    },
    /// Print the signed HikCentral header set for a request
    Sign {
        /// GET, POST, PUT or DELETE
        method: String,
        /// Path only, e.g. /artemis/api/resource/v1/person/single/add
        path: String,
        /// Request body exactly as it will be sent
        #[arg(long, default_value = "")]
        body: String,
        #[arg(long, env = "HIKCENTRAL_APP_KEY")]
        app_key: String,
        #[arg(long, env = "HIKCENTRAL_APP_SECRET", hide_env_values = true)]
        app_secret: String,
        #[arg(long, env = "HIKCENTRAL_USER_ID", default_value = "admin")]
        user_id: String,
        /// Pin the nonce instead of generating one
        #[arg(long, requires = "timestamp")]
        nonce: Option<String>,
        /// Pin the millisecond timestamp
        #[arg(long, requires = "nonce")]
        timestamp: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Health => {
            let res = reqwest::Client::new()
                .get(format!("{}/health", cli.url))
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Check { email, community } => {
            let mut headers = HeaderMap::new();
            headers.insert("x-api-key", HeaderValue::from_str(&cli.key)?);
            let res = reqwest::Client::new()
                .post(format!("{}/api/v1/residents/check", cli.url))
                .headers(headers)
                .json(&json!({ "email": email, "community": community }))
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Sign {
            method,
            path,
            body,
            app_key,
            app_secret,
            user_id,
            nonce,
            timestamp,
        } => {
            let signer = RequestSigner::new(app_key, app_secret, user_id);
            let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())?;
            let signed = match (nonce, timestamp) {
                (Some(nonce), Some(ts)) => {
                    signer.build_headers_at(&method, &path, body.as_bytes(), &nonce, ts)?
                }
                _ => signer.build_headers(&method, &path, body.as_bytes())?,
            };
            for (name, value) in signed.header_pairs() {
                println!("{name}: {value}");
            }
        }
    }

    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;
    if !status.is_success() {
        eprintln!("Error: bridge returned status {}", status);
        eprintln!("Response: {}", text);
        return Ok(());
    }

    let json: Value = serde_json::from_str(&text)?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
