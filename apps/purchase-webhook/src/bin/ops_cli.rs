use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use barber_blueprint_purchase_webhook::purchase_store::FilePurchaseStore;
use barber_blueprint_purchase_webhook::signature::{SIGNATURE_HEADER, sign_body};
use clap::{Args, Parser, Subcommand};
use serde_json::{Value, json};

#[derive(Parser)]
#[command(name = "purchase-webhook-ops")]
#[command(about = "Operator tools for the Barber Blueprint purchase webhook")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(name = "webhook:sign")]
    WebhookSign(WebhookSignArgs),
    #[command(name = "webhook:send")]
    WebhookSend(WebhookSendArgs),
    #[command(name = "purchases:lookup")]
    PurchasesLookup(PurchasesLookupArgs),
}

#[derive(Args)]
struct WebhookSignArgs {
    /// Payload file; reads stdin when omitted or `-`.
    payload: Option<PathBuf>,
    #[arg(long, env = "BLUEPRINT_WEBHOOK_SECRET", hide_env_values = true)]
    secret: String,
}

#[derive(Args)]
struct WebhookSendArgs {
    payload: Option<PathBuf>,
    #[arg(long, default_value = "http://127.0.0.1:8788/api/webhooks/purchase")]
    url: String,
    #[arg(long, env = "BLUEPRINT_WEBHOOK_SECRET", hide_env_values = true)]
    secret: String,
}

#[derive(Args)]
struct PurchasesLookupArgs {
    email: String,
    #[arg(long, env = "BLUEPRINT_PURCHASE_STORE_PATH")]
    store: PathBuf,
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::WebhookSign(args) => run_webhook_sign(args),
        Commands::WebhookSend(args) => run_webhook_send(args).await,
        Commands::PurchasesLookup(args) => run_purchases_lookup(args).await,
    }
}

fn run_webhook_sign(args: WebhookSignArgs) -> Result<()> {
    let payload = read_payload(args.payload.as_deref())?;
    let signature = signature_for(&args.secret, &payload)?;
    print_json(&json!({
        "header": SIGNATURE_HEADER,
        "signature": signature,
        "payload_bytes": payload.len(),
    }))
}

async fn run_webhook_send(args: WebhookSendArgs) -> Result<()> {
    let payload = read_payload(args.payload.as_deref())?;
    let signature = signature_for(&args.secret, &payload)?;

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .context("failed to build HTTP client")?;

    let response = client
        .post(args.url.trim())
        .header("content-type", "application/json")
        .header(SIGNATURE_HEADER, signature)
        .body(payload)
        .send()
        .await
        .with_context(|| format!("failed to POST {}", args.url.trim()))?;

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    print_json(&json!({
        "status": status.as_u16(),
        "body": body,
    }))?;

    if !status.is_success() {
        bail!("webhook responded with {status}");
    }
    Ok(())
}

async fn run_purchases_lookup(args: PurchasesLookupArgs) -> Result<()> {
    if !args.store.is_file() {
        bail!("purchase store {} does not exist", args.store.display());
    }

    let store = FilePurchaseStore::open(Some(args.store.clone()))
        .with_context(|| format!("failed to open purchase store {}", args.store.display()))?;
    let record = store.find_purchase(&args.email).await;
    let rendered = match record {
        Some(record) => serde_json::to_value(record).context("failed to encode purchase")?,
        None => Value::Null,
    };
    print_json(&json!({
        "email": args.email.trim().to_lowercase(),
        "purchase": rendered,
    }))
}

fn signature_for(secret: &str, payload: &[u8]) -> Result<String> {
    let secret = secret.trim();
    if secret.is_empty() {
        bail!("--secret cannot be empty");
    }
    sign_body(secret, payload).context("failed to compute payload signature")
}

fn read_payload(path: Option<&Path>) -> Result<Vec<u8>> {
    match path {
        Some(path) if path != Path::new("-") => {
            fs::read(path).with_context(|| format!("failed to read {}", path.display()))
        }
        _ => {
            let mut buffer = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buffer)
                .context("failed to read payload from stdin")?;
            Ok(buffer)
        }
    }
}

fn print_json(value: &Value) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("failed to render JSON output")?;
    println!("{rendered}");
    Ok(())
}
