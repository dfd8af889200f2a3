//! Client construction for live endpoints or the in-process demo ledger.

use anyhow::{bail, Context, Result};
use riddle_core::prelude::*;
use riddle_rpc::RpcClient;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Demo deployment address.
const DEMO_CONTRACT: u64 = 0xC0DE;
/// Demo riddle bot.
const DEMO_BOT: u64 = 0xB07;
/// Identity used in demo mode when `--from` is not given.
const DEMO_PLAYER: u64 = 0xABC;

const DEMO_RIDDLE: &str = "What is the capital of France?";
const DEMO_ANSWER: &str = "paris";

/// Connection settings from the command line. `None` keeps the
/// environment or default value.
#[derive(Debug, Default, Clone)]
pub struct Endpoints {
    pub rpc_url: Option<String>,
    pub ws_url: Option<String>,
    pub contract: Option<Address>,
    pub abi: Option<PathBuf>,
    pub finalization_timeout: Option<Duration>,
}

enum Backend {
    Node(RpcClient),
    Demo { bot: Address },
}

/// A connected client plus the means to pick a default identity.
pub struct Session {
    client: RiddleClient,
    backend: Backend,
}

impl Session {
    /// Connects to the configured node and checks it serves the expected
    /// chain.
    pub async fn connect(endpoints: &Endpoints) -> Result<Self> {
        let config = endpoints.apply(ClientConfig::from_env()?);
        let client = RiddleClient::from_config(&config, riddle_rpc::ledger_ports(&config))
            .context("invalid client configuration")?;
        let rpc = RpcClient::from_config(&config);

        match rpc.chain_id().await {
            Ok(reported) => check_chain(config.chain_id, reported)?,
            // the first real request reports an unreachable node
            Err(e) => warn!(error = %e, "Could not read the node's chain id"),
        }
        info!(
            contract = %checksum_address(&client.contract().address()),
            rpc = %config.rpc_endpoint_url,
            ws = %config.ws_endpoint(),
            chain_id = config.chain_id,
            "Connected"
        );

        Ok(Self {
            client,
            backend: Backend::Node(rpc),
        })
    }

    /// An in-process riddle with one puzzle published.
    pub fn demo(endpoints: &Endpoints) -> Result<Self> {
        let bot = Address::from_low_u64_be(DEMO_BOT);
        let ledger = Arc::new(InMemoryLedger::new(
            Address::from_low_u64_be(DEMO_CONTRACT),
            bot,
        )?);
        ledger.publish_riddle(DEMO_RIDDLE, DEMO_ANSWER)?;

        let mut config = ClientConfig::new(ledger.contract());
        config.finalization_timeout = endpoints.finalization_timeout;
        let client = RiddleClient::from_config(&config, LedgerPorts::from_ledger(ledger))?;
        info!("Demo ledger ready");

        Ok(Self {
            client,
            backend: Backend::Demo { bot },
        })
    }

    pub fn client(&self) -> &RiddleClient {
        &self.client
    }

    /// `explicit`, or the first account the node can sign for.
    pub async fn identity(&self, explicit: Option<Address>) -> Option<Identity> {
        if explicit.is_some() {
            return explicit;
        }
        match &self.backend {
            Backend::Demo { .. } => Some(Address::from_low_u64_be(DEMO_PLAYER)),
            Backend::Node(rpc) => match rpc.accounts().await {
                Ok(accounts) => accounts.into_iter().next(),
                Err(e) => {
                    warn!(error = %e, "Could not list node accounts");
                    None
                }
            },
        }
    }

    /// Account to publish riddles from: `explicit`, the demo bot, or the
    /// node's first account.
    pub async fn publisher(&self, explicit: Option<Address>) -> Option<Identity> {
        match (&self.backend, explicit) {
            (_, Some(account)) => Some(account),
            (Backend::Demo { bot }, None) => Some(*bot),
            (Backend::Node(_), None) => self.identity(None).await,
        }
    }
}

/// Fails when the node serves a different chain than configured.
fn check_chain(expected: u64, reported: u64) -> Result<()> {
    if expected != reported {
        bail!("node reports chain id {reported}, expected {expected} (set CHAIN_ID to override)");
    }
    Ok(())
}

impl Endpoints {
    fn apply(&self, mut config: ClientConfig) -> ClientConfig {
        if let Some(url) = &self.rpc_url {
            config.rpc_endpoint_url.clone_from(url);
        }
        if let Some(url) = &self.ws_url {
            config.ws_endpoint_url = Some(url.clone());
        }
        if let Some(contract) = self.contract {
            config.contract_address = Some(contract);
        }
        if let Some(path) = &self.abi {
            config.abi_path = Some(path.clone());
        }
        if let Some(timeout) = self.finalization_timeout {
            config.finalization_timeout = Some(timeout);
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let endpoints = Endpoints {
            rpc_url: Some("https://sepolia.base.org".into()),
            contract: Some(Address::from_low_u64_be(7)),
            ..Endpoints::default()
        };
        let config = endpoints.apply(ClientConfig::default());
        assert_eq!(config.rpc_endpoint_url, "https://sepolia.base.org");
        assert_eq!(config.ws_endpoint(), "wss://sepolia.base.org");
        assert_eq!(config.contract_address, Some(Address::from_low_u64_be(7)));
    }

    #[test]
    fn test_chain_mismatch_is_refused() {
        assert!(check_chain(8453, 8453).is_ok());
        let err = check_chain(8453, 84532).unwrap_err();
        assert!(err.to_string().contains("84532"));
    }

    #[test]
    fn test_demo_publisher_is_the_bot() {
        let session = Session::demo(&Endpoints::default()).unwrap();
        assert_eq!(
            tokio_test::block_on(session.publisher(None)),
            Some(Address::from_low_u64_be(DEMO_BOT))
        );
        let me = Address::from_low_u64_be(7);
        assert_eq!(tokio_test::block_on(session.publisher(Some(me))), Some(me));
    }

    #[test]
    fn test_demo_session_plays() {
        let session = Session::demo(&Endpoints::default()).unwrap();
        let state = tokio_test::block_on(session.client().puzzle_state()).unwrap();
        assert_eq!(state.text, DEMO_RIDDLE);
        assert!(state.is_open);

        let me = tokio_test::block_on(session.identity(None)).unwrap();
        let request = SubmissionRequest::new(DEMO_ANSWER, me);
        assert!(tokio_test::block_on(session.client().submit_answer(&request)).unwrap());
    }
}
