//! PermitPool CLI
//!
//! Runs a Yellow clearnet session: authenticate, open a channel, fund it,
//! transfer off-chain, and close, settling each step on Sepolia.

use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use dialoguer::Confirm;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use permitpool_core::PermitPoolError;
use permitpool_crypto::AccountSigner;
use permitpool_yellow::{
    account_key_from_env, run_live, FlowConfig, SessionMode, SessionReport, YellowConfig,
};

/// PermitPool - Yellow Network state-channel session client
#[derive(Parser)]
#[command(name = "permitpool")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Authenticate, then open, fund, transfer on, and close one channel
    Flow {
        /// Clearnet WebSocket URL
        #[arg(long, env = "YELLOW_WS_URL")]
        ws_url: Option<String>,
        /// Ethereum RPC URL
        #[arg(long, env = "ETH_RPC_URL")]
        rpc_url: Option<String>,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Check that the account can authenticate a session key
    AuthCheck {
        /// Clearnet WebSocket URL
        #[arg(long, env = "YELLOW_WS_URL")]
        ws_url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.json_logs);

    let result = match cli.command {
        Commands::Flow { ws_url, rpc_url, yes } => cmd_flow(ws_url, rpc_url, yes).await,
        Commands::AuthCheck { ws_url } => cmd_auth_check(ws_url).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("\n{} {:#}", "❌".red(), e);
            if e
                .downcast_ref::<PermitPoolError>()
                .is_some_and(PermitPoolError::is_auth_error)
            {
                eprintln!("   {}", "Check PRIVATE_KEY and YELLOW_APPLICATION".dimmed());
            }
            ExitCode::from(exit_code(&e))
        }
    }
}

fn init_logging(verbose: bool, json: bool) {
    let filter = if verbose {
        "permitpool=debug,info"
    } else {
        "permitpool=info,warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

fn exit_code(error: &anyhow::Error) -> u8 {
    error
        .downcast_ref::<PermitPoolError>()
        .map(PermitPoolError::exit_code)
        .unwrap_or(1)
}

fn load(ws_url: Option<String>, rpc_url: Option<String>) -> Result<(YellowConfig, FlowConfig, AccountSigner)> {
    let mut network = YellowConfig::from_env()?;
    if let Some(url) = ws_url {
        network.ws_url = url;
    }
    if let Some(url) = rpc_url {
        network.rpc_url = url;
    }
    network.validate()?;

    let flow = FlowConfig::from_env()?;
    let key = account_key_from_env()?;
    let account = AccountSigner::from_private_key(&key)?;
    debug!(account = %account.address_string(), "Configuration loaded");

    Ok((network, flow, account))
}

/// Full channel lifecycle
async fn cmd_flow(ws_url: Option<String>, rpc_url: Option<String>, yes: bool) -> Result<()> {
    let (network, flow, account) = load(ws_url, rpc_url)?;

    println!("{}", "⚡ PermitPool channel flow".cyan().bold());
    println!("   {} {}", "Account:".dimmed(), account.address_string());
    println!("   {} {}", "Node:".dimmed(), network.ws_url);
    println!("   {} {}", "Chain:".dimmed(), network.chain_id);
    println!(
        "   {} {} {}",
        "Allocate:".dimmed(),
        flow.allocate_amount,
        flow.funding_asset
    );

    if !yes {
        let proceed = Confirm::new()
            .with_prompt("This submits three custody transactions. Continue?")
            .default(false)
            .interact()
            .context("Confirmation prompt failed (pass --yes when not on a terminal)")?;
        if !proceed {
            bail!("Aborted by user");
        }
    }

    let report = run_live(&network, &flow, account, SessionMode::FullFlow).await?;
    print_report(&report);
    Ok(())
}

/// Auth handshake only
async fn cmd_auth_check(ws_url: Option<String>) -> Result<()> {
    let (network, flow, account) = load(ws_url, None)?;

    println!("{}", "🔐 Checking authentication...".cyan().bold());
    println!("   {} {}", "Account:".dimmed(), account.address_string());
    println!("   {} {}", "Node:".dimmed(), network.ws_url);

    let report = run_live(&network, &flow, account, SessionMode::AuthOnly).await?;

    println!("\n{}", "✅ Authenticated".green().bold());
    println!("   {} {}", "Session key:".dimmed(), report.auth.session_key);
    println!(
        "   {} {}",
        "JWT:".dimmed(),
        if report.auth.jwt_token.is_some() { "issued" } else { "none" }
    );
    Ok(())
}

fn print_report(report: &SessionReport) {
    println!("\n{}", "✅ Channel flow complete".green().bold());
    println!("   {} {}", "Session:".dimmed(), report.session_id);
    if let Some(channel_id) = &report.channel_id {
        println!("   {} {}", "Channel:".yellow(), channel_id);
    }
    if let Some(version) = report.final_version {
        println!("   {} {}", "Final version:".dimmed(), version);
    }

    println!("\n{}", "📋 On-chain submissions:".yellow().bold());
    for (i, submission) in report.submissions.iter().enumerate() {
        println!(
            "   {}. {:<7} v{:<3} {:?} (block {})",
            i + 1,
            submission.kind.as_str(),
            submission.version,
            submission.receipt.tx_hash,
            submission
                .receipt
                .block_number
                .map(|b| b.to_string())
                .unwrap_or_else(|| "pending".into())
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_exit_code_from_session_error() {
        let err = anyhow::Error::new(PermitPoolError::Precondition("no funds".into()))
            .context("running flow");
        assert_eq!(exit_code(&err), 4);
        assert_eq!(exit_code(&anyhow::anyhow!("other")), 1);
    }

    #[test]
    fn test_parse_flow_flags() {
        let cli = Cli::try_parse_from(["permitpool", "--verbose", "flow", "--yes"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Flow { yes: true, .. }));
    }
}
