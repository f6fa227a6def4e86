//! Read-only token metadata used to resolve decimals.
//!
//! The list is held as an immutable [`TokenSnapshot`] behind an `Arc`.
//! Refreshes build a new snapshot and swap the pointer, so readers always
//! see either the old list or the new one in full.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use alloy_primitives::Address;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::TokenListError;

/// One token's metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenListEntry {
    pub address: Address,
    pub decimals: u32,
    pub symbol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub chain_id: u64,
}

/// Address → token metadata lookup.
pub trait TokenListResolver: Send + Sync {
    fn lookup(&self, address: &Address) -> Option<TokenListEntry>;
}

/// An immutable view of the token list for one chain.
#[derive(Debug, Default)]
pub struct TokenSnapshot {
    by_address: HashMap<Address, TokenListEntry>,
}

impl TokenSnapshot {
    /// Keeps only entries for `chain_id`. Later duplicates win.
    pub fn new(chain_id: u64, entries: impl IntoIterator<Item = TokenListEntry>) -> Self {
        let by_address = entries
            .into_iter()
            .filter(|e| e.chain_id == chain_id)
            .map(|e| (e.address, e))
            .collect();
        Self { by_address }
    }

    pub fn get(&self, address: &Address) -> Option<&TokenListEntry> {
        self.by_address.get(address)
    }

    pub fn len(&self) -> usize {
        self.by_address.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_address.is_empty()
    }
}

/// Something that can produce a fresh set of token entries.
#[async_trait]
pub trait TokenListLoader: Send + Sync + 'static {
    async fn load(&self) -> Result<Vec<TokenListEntry>, TokenListError>;
}

/// Loader that always returns the same entries.
#[derive(Debug, Clone, Default)]
pub struct StaticLoader {
    entries: Vec<TokenListEntry>,
}

impl StaticLoader {
    pub fn new(entries: Vec<TokenListEntry>) -> Self {
        Self { entries }
    }
}

#[async_trait]
impl TokenListLoader for StaticLoader {
    async fn load(&self) -> Result<Vec<TokenListEntry>, TokenListError> {
        Ok(self.entries.clone())
    }
}

/// The live token list for one chain.
#[derive(Debug)]
pub struct TokenList {
    chain_id: u64,
    current: RwLock<Arc<TokenSnapshot>>,
}

impl TokenList {
    pub fn new(chain_id: u64, entries: impl IntoIterator<Item = TokenListEntry>) -> Self {
        Self {
            chain_id,
            current: RwLock::new(Arc::new(TokenSnapshot::new(chain_id, entries))),
        }
    }

    pub fn empty(chain_id: u64) -> Self {
        Self::new(chain_id, Vec::new())
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// The current snapshot. Cheap: clones an `Arc`.
    pub fn snapshot(&self) -> Arc<TokenSnapshot> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Swaps in a snapshot built from `entries`. Returns the new size.
    pub fn replace(&self, entries: impl IntoIterator<Item = TokenListEntry>) -> usize {
        let next = Arc::new(TokenSnapshot::new(self.chain_id, entries));
        let len = next.len();
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = next;
        len
    }

    /// Loads once and swaps. On failure the previous snapshot stays live.
    pub async fn refresh(&self, loader: &dyn TokenListLoader) -> Result<usize, TokenListError> {
        let entries = loader.load().await?;
        Ok(self.replace(entries))
    }

    /// Refreshes every `every` until `shutdown` flips to `true`.
    pub fn spawn_refresh(
        self: Arc<Self>,
        loader: Arc<dyn TokenListLoader>,
        every: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // first tick fires immediately; the list was seeded at construction
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.refresh(loader.as_ref()).await {
                            Ok(count) => tracing::debug!(chain_id = self.chain_id, count, "token list refreshed"),
                            Err(e) => tracing::warn!(chain_id = self.chain_id, error = %e, "token list refresh failed, keeping previous snapshot"),
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }
}

impl TokenListResolver for TokenList {
    fn lookup(&self, address: &Address) -> Option<TokenListEntry> {
        self.snapshot().get(address).cloned()
    }
}

#[derive(Deserialize)]
struct TokenListDocument {
    tokens: Vec<TokenListEntry>,
}

/// Parses a standard token-list document (`{"tokens": [...]}`).
pub fn parse_token_list_json(text: &str) -> Result<Vec<TokenListEntry>, TokenListError> {
    serde_json::from_str::<TokenListDocument>(text)
        .map(|doc| doc.tokens)
        .map_err(|e| TokenListError::Parse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    fn usdc(chain_id: u64) -> TokenListEntry {
        TokenListEntry {
            address: address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"),
            decimals: 6,
            symbol: "USDC".into(),
            name: Some("USD Coin".into()),
            chain_id,
        }
    }

    #[test]
    fn filters_by_chain() {
        let list = TokenList::new(1, vec![usdc(1), usdc(10)]);
        assert_eq!(list.snapshot().len(), 1);
        assert_eq!(list.lookup(&usdc(1).address).unwrap().decimals, 6);
    }

    #[test]
    fn old_snapshot_survives_replace() {
        let list = TokenList::new(1, vec![usdc(1)]);
        let before = list.snapshot();
        assert_eq!(list.replace(Vec::new()), 0);
        assert_eq!(before.len(), 1);
        assert!(list.lookup(&usdc(1).address).is_none());
    }

    #[test]
    fn parses_standard_document() {
        let doc = r#"{"name":"x","tokens":[
            {"chainId":1,"address":"0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48","symbol":"USDC","decimals":6,"name":"USD Coin","logoURI":"ipfs://x"}
        ]}"#;
        let tokens = parse_token_list_json(doc).unwrap();
        assert_eq!(tokens, vec![usdc(1)]);
        assert!(parse_token_list_json("{}").is_err());
    }

    struct Failing;

    #[async_trait]
    impl TokenListLoader for Failing {
        async fn load(&self) -> Result<Vec<TokenListEntry>, TokenListError> {
            Err(TokenListError::Fetch("offline".into()))
        }
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous() {
        let list = TokenList::new(1, vec![usdc(1)]);
        assert!(list.refresh(&Failing).await.is_err());
        assert_eq!(list.snapshot().len(), 1);
        assert_eq!(list.refresh(&StaticLoader::new(vec![])).await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn background_refresh_swaps_and_stops() {
        let list = Arc::new(TokenList::empty(1));
        let (tx, rx) = watch::channel(false);
        let handle = list.clone().spawn_refresh(
            Arc::new(StaticLoader::new(vec![usdc(1)])),
            Duration::from_secs(60),
            rx,
        );
        tokio::time::sleep(Duration::from_secs(61)).await;
        tokio::task::yield_now().await;
        assert_eq!(list.snapshot().len(), 1);
        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
