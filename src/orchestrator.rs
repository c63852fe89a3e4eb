use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::indexer::chain::{ChainSession, SessionSettings};
use crate::notify::dispatcher::Dispatcher;
use crate::prices::table::PriceTable;

/// A running chain session.
pub struct SessionHandle {
    pub chain: String,
    pub mode: &'static str,
    pub handle: JoinHandle<()>,
}

/// Build one session per configured chain. A chain whose configuration is
/// unusable is reported and left out; the rest are unaffected.
pub fn build_sessions(
    config: &Config,
    prices: &PriceTable,
    dispatcher: &Arc<Dispatcher>,
) -> Vec<ChainSession> {
    let settings = SessionSettings::from(config);

    config
        .chains
        .iter()
        .filter_map(|chain| {
            match ChainSession::new(chain, &settings, prices.clone(), dispatcher.clone()) {
                Ok(session) => Some(session),
                Err(e) => {
                    tracing::error!(chain = %chain.name, error = %e, "Skipping chain");
                    None
                }
            }
        })
        .collect()
}

/// Spawn every usable chain session as its own task.
pub fn spawn_sessions(
    config: &Config,
    prices: &PriceTable,
    dispatcher: &Arc<Dispatcher>,
    shutdown: &CancellationToken,
) -> Vec<SessionHandle> {
    build_sessions(config, prices, dispatcher)
        .into_iter()
        .map(|session| {
            let chain = session.name().to_string();
            let mode = session.mode();
            let handle = tokio::spawn(session.run(shutdown.clone()));
            SessionHandle {
                chain,
                mode,
                handle,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChainConfig, TokenConfig};
    use std::time::Duration;

    fn chain(name: &str, rpc_ws: Option<&str>, rpc_http: Option<&str>) -> ChainConfig {
        ChainConfig {
            name: name.to_string(),
            chain_id: 1,
            rpc_http: rpc_http.map(str::to_string),
            rpc_ws: rpc_ws.map(str::to_string),
            poll_interval_ms: 1_000,
            tokens: vec![TokenConfig {
                symbol: "USDT".to_string(),
                address: "0xdAC17F958D2ee523a2206206994597C13D831ec7".to_string(),
                decimals: 6,
                price_usd: 1.0,
            }],
        }
    }

    fn config(chains: Vec<ChainConfig>) -> Config {
        let mut config: Config = toml::from_str("chains = []").unwrap();
        config.chains = chains;
        config
    }

    fn dispatcher() -> Arc<Dispatcher> {
        Arc::new(Dispatcher::new(reqwest::Client::new(), vec![], Duration::from_secs(1)))
    }

    #[test]
    fn test_unusable_chains_are_skipped() {
        let mut bad_token = chain("BadToken", None, Some("http://127.0.0.1:8545"));
        bad_token.tokens[0].address = "0x1234".to_string();

        let config = config(vec![
            chain("Ethereum", Some("ws://127.0.0.1:8546"), Some("http://127.0.0.1:8545")),
            chain("Orphan", None, None),
            bad_token,
            chain("Avalanche", None, Some("http://127.0.0.1:9650/ext/bc/C/rpc")),
        ]);

        let sessions = build_sessions(&config, &PriceTable::new(), &dispatcher());
        let names: Vec<_> = sessions.iter().map(|s| (s.name(), s.mode())).collect();
        assert_eq!(names, vec![("Ethereum", "stream"), ("Avalanche", "poll")]);
    }

    #[tokio::test]
    async fn test_sessions_stop_on_shutdown() {
        let config = config(vec![
            chain("Ethereum", Some("ws://127.0.0.1:9"), None),
            chain("Boba", None, Some("http://127.0.0.1:9")),
        ]);
        let shutdown = CancellationToken::new();

        let handles = spawn_sessions(&config, &PriceTable::new(), &dispatcher(), &shutdown);
        assert_eq!(handles.len(), 2);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handles.iter().all(|h| !h.handle.is_finished()));

        shutdown.cancel();
        for session in handles {
            tokio::time::timeout(Duration::from_secs(2), session.handle)
                .await
                .expect("session did not stop")
                .unwrap();
        }
    }
}
