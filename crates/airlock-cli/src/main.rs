//! Airlock CLI - operator interface for the risk gateway

use airlock_core::{
    AnalyzeRequest, AnalyzeTextRequest, AnalyzeTextResponse, AuditLog, GatewayConfig, Phase,
    RiskAgent, TokenVault,
};
use clap::Parser;

#[derive(Parser)]
#[command(name = "airlock")]
#[command(about = "Airlock - policy-enforcing gateway for LLM traffic")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Run the risk agent over a text and print the assessment
    Analyze {
        /// Text to analyze
        text: String,
        /// Processing mode: strict, balanced or permissive
        #[arg(short, long, default_value = "balanced")]
        mode: String,
        /// Include original matched values in the output
        #[arg(long)]
        reveal: bool,
    },
    /// Check environment configuration validity
    Check,
    /// Show recent audit reports
    Audit {
        /// Audit log path
        #[arg(short, long)]
        path: String,
        /// Number of reports to show
        #[arg(short, long, default_value_t = 10)]
        count: usize,
    },
    /// Token vault maintenance
    Vault {
        /// Vault storage path
        #[arg(short, long)]
        path: String,
        #[command(subcommand)]
        action: VaultAction,
    },
}

#[derive(clap::Subcommand)]
enum VaultAction {
    /// Remove expired and revoked records
    Sweep,
    /// Revoke a placeholder
    Revoke {
        /// The placeholder to revoke
        placeholder: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Some(Commands::Analyze { text, mode, reveal }) => {
            std::env::set_var("AIRLOCK_MODE", &mode);
            let config = GatewayConfig::from_env()?;
            let vault = TokenVault::temporary(config.vault_secret.as_bytes())?;
            let agent = RiskAgent::with_vault(vault);

            let analyze = AnalyzeRequest::new(config.default_mode, "cli");
            let assessment = agent.analyze(&text, Phase::Input, &analyze).await;

            let api_request = AnalyzeTextRequest {
                text,
                processing_mode: Some(config.default_mode),
                include_sanitized: true,
                include_detections: true,
                include_original_values: reveal,
            };
            let view = AnalyzeTextResponse::from_assessment(&assessment, &api_request);
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        Some(Commands::Check) => {
            let config = GatewayConfig::from_env()?;
            println!(
                "configuration OK: mode={}, budget={}ms, max_iterations={}",
                config.default_mode, config.budget_ms, config.max_iterations
            );
        }
        Some(Commands::Audit { path, count }) => {
            let log = AuditLog::open(&path)?;
            for report in log.list_recent(count)? {
                println!(
                    "{} {} action={} score={:.1} mode={}",
                    report.timestamp.to_rfc3339(),
                    report.request_id,
                    report.action,
                    report.overall_score,
                    report.mode
                );
            }
        }
        Some(Commands::Vault { path, action }) => {
            let config = GatewayConfig::from_env()?;
            let vault = TokenVault::open(&path, config.vault_secret.as_bytes())?;
            match action {
                VaultAction::Sweep => {
                    let removed = vault.sweep()?;
                    println!("swept {} records, {} remain", removed, vault.len());
                }
                VaultAction::Revoke { placeholder } => {
                    vault.revoke(&placeholder)?;
                    println!("revoked {}", placeholder);
                }
            }
            vault.flush()?;
        }
        None => {
            println!("airlock v0.1.0 - use --help for commands");
        }
    }

    Ok(())
}
