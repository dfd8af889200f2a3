//! riddle: console client for an OnchainRiddle deployment.
//!
//! Talks to the node over JSON-RPC (HTTP for calls and transactions,
//! WebSocket for log subscriptions). Transactions are signed by the node,
//! so `--from` must be an account the node manages.
//!
//! ## Usage
//!
//! ```bash
//! # Current riddle
//! riddle --contract 0x... show
//!
//! # Answer once
//! riddle --contract 0x... submit paris --from 0x...
//!
//! # Follow the riddle live and answer from stdin
//! riddle --contract 0x... play
//!
//! # Publish the next riddle from the bot account
//! riddle --contract 0x... publish "What has keys?" piano --from 0x...
//!
//! # Same, against an in-process ledger
//! riddle --demo play
//! ```

mod play;
mod session;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use riddle_core::prelude::*;
use riddle_telemetry::{init_telemetry, render_metrics, TelemetryConfig};
use serde::Serialize;
use tracing::error;

use session::{Endpoints, Session};

/// OnchainRiddle console client
#[derive(Parser, Debug)]
#[command(name = "riddle")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON-RPC endpoint URL (overrides RIDDLE_RPC_URL)
    #[arg(long, global = true)]
    rpc_url: Option<String>,

    /// WebSocket endpoint URL (defaults to the RPC URL with a ws scheme)
    #[arg(long, global = true)]
    ws_url: Option<String>,

    /// Riddle contract address (overrides RIDDLE_CONTRACT_ADDRESS)
    #[arg(long, global = true, value_parser = parse_address)]
    contract: Option<Address>,

    /// ABI JSON file to use instead of the bundled one
    #[arg(long, global = true)]
    abi: Option<PathBuf>,

    /// Give up waiting for a receipt after this many seconds
    #[arg(long, global = true)]
    finalization_timeout_secs: Option<u64>,

    /// Run against an in-process ledger instead of a node
    #[arg(long, global = true)]
    demo: bool,

    /// Print Prometheus metrics to stderr on exit
    #[arg(long, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the current riddle and whether it is still open
    Show {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Submit one answer and wait for the verdict
    Submit {
        answer: String,
        /// Sending account (defaults to the node's first account)
        #[arg(long, value_parser = parse_address)]
        from: Option<Address>,
    },
    /// Publish a new riddle (bot account only; the previous one must be solved)
    Publish {
        riddle: String,
        answer: String,
        /// Bot account (defaults to the node's first account)
        #[arg(long, value_parser = parse_address)]
        from: Option<Address>,
    },
    /// Follow riddle events and answer interactively
    Play {
        /// Sending account (defaults to the node's first account)
        #[arg(long, value_parser = parse_address)]
        from: Option<Address>,
    },
}

impl Args {
    fn endpoints(&self) -> Endpoints {
        Endpoints {
            rpc_url: self.rpc_url.clone(),
            ws_url: self.ws_url.clone(),
            contract: self.contract,
            abi: self.abi.clone(),
            finalization_timeout: self.finalization_timeout_secs.map(Duration::from_secs),
        }
    }
}

#[derive(Serialize)]
struct ShowOutput<'a> {
    contract: String,
    riddle: &'a str,
    is_open: bool,
    winner: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_telemetry(&TelemetryConfig::from_env())?;

    let print_metrics = args.metrics;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(run(args));

    if print_metrics {
        eprint!("{}", render_metrics()?);
    }
    result
}

async fn run(args: Args) -> Result<()> {
    let endpoints = args.endpoints();
    let session = if args.demo {
        Session::demo(&endpoints)?
    } else {
        Session::connect(&endpoints).await?
    };

    match args.command {
        Command::Show { json } => show(&session, json).await,
        Command::Submit { answer, from } => submit(&session, &answer, from).await,
        Command::Publish {
            riddle,
            answer,
            from,
        } => publish(&session, &riddle, &answer, from).await,
        Command::Play { from } => play::run(&session, from).await,
    }
}

async fn show(session: &Session, json: bool) -> Result<()> {
    let client = session.client();
    let state = client.puzzle_state().await?;
    let winner = client.winner().await?;

    if json {
        let output = ShowOutput {
            contract: checksum_address(&client.contract().address()),
            riddle: &state.text,
            is_open: state.is_open,
            winner: winner.as_ref().map(checksum_address),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("{}", state.text);
    if state.is_open {
        println!("Status: open");
    } else {
        println!("Status: solved");
    }
    if let Some(winner) = winner {
        println!("Winner: {}", checksum_address(&winner));
    }
    Ok(())
}

async fn submit(session: &Session, answer: &str, from: Option<Address>) -> Result<()> {
    let identity = session.identity(from).await;
    let request = match SubmissionRequest::checked(answer, identity) {
        Ok(request) => request,
        Err(e) => {
            println!("{}", e.user_message());
            return Err(e.into());
        }
    };

    match session.client().submit_answer(&request).await {
        Ok(correct) => {
            println!("{}", verdict_message(correct));
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Submission failed");
            println!("{}", e.user_message());
            bail!("submission failed: {e}")
        }
    }
}

async fn publish(session: &Session, riddle: &str, answer: &str, from: Option<Address>) -> Result<()> {
    let publisher = session.publisher(from).await;
    let request = match PublishRequest::checked(riddle, answer, publisher) {
        Ok(request) => request,
        Err(e) => {
            println!("{}", e.user_message());
            return Err(e.into());
        }
    };

    match session.client().publish_riddle(&request).await {
        Ok(tx_hash) => {
            println!("Published in {}", hash_hex(&tx_hash));
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Publication failed");
            println!("{}", e.user_message());
            bail!("publication failed: {e}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = Args::try_parse_from([
            "riddle",
            "submit",
            "paris",
            "--from",
            "0x0000000000000000000000000000000000000abc",
            "--demo",
            "--finalization-timeout-secs",
            "30",
        ])
        .unwrap();

        assert!(args.demo);
        let endpoints = args.endpoints();
        assert_eq!(endpoints.finalization_timeout, Some(Duration::from_secs(30)));
        match args.command {
            Command::Submit { answer, from } => {
                assert_eq!(answer, "paris");
                assert_eq!(from, Some(Address::from_low_u64_be(0xABC)));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_publish_and_metrics_flags() {
        let args = Args::try_parse_from([
            "riddle",
            "--metrics",
            "publish",
            "What has keys?",
            "piano",
        ])
        .unwrap();

        assert!(args.metrics);
        match args.command {
            Command::Publish {
                riddle,
                answer,
                from,
            } => {
                assert_eq!(riddle, "What has keys?");
                assert_eq!(answer, "piano");
                assert_eq!(from, None);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_bad_address_is_rejected() {
        let result = Args::try_parse_from(["riddle", "--contract", "0x12", "show"]);
        assert!(result.is_err());
    }
}
