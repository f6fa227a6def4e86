//! Token lists fetched over HTTP (Uniswap token list format).

use std::time::Duration;

use async_trait::async_trait;
use chainmetrics_core::tokenlist::parse_token_list_json;
use chainmetrics_core::{TokenListEntry, TokenListError, TokenListLoader};

pub struct HttpTokenListLoader {
    url: String,
    http: reqwest::Client,
}

impl HttpTokenListLoader {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, TokenListError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TokenListError::Fetch(e.to_string()))?;
        Ok(Self { url: url.into(), http })
    }
}

#[async_trait]
impl TokenListLoader for HttpTokenListLoader {
    async fn load(&self) -> Result<Vec<TokenListEntry>, TokenListError> {
        let resp = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(|e| TokenListError::Fetch(format!("{}: {e}", self.url)))?;
        if !resp.status().is_success() {
            return Err(TokenListError::Fetch(format!("{}: HTTP {}", self.url, resp.status())));
        }
        let text = resp
            .text()
            .await
            .map_err(|e| TokenListError::Fetch(format!("{}: {e}", self.url)))?;
        let tokens = parse_token_list_json(&text)?;
        tracing::debug!(url = %self.url, tokens = tokens.len(), "token list fetched");
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn fetches_and_parses() {
        let body = r#"{"name":"t","tokens":[{"chainId":1,"address":"0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48","decimals":6,"symbol":"USDC"}]}"#;
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/list.json", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let _ = sock.read(&mut buf).await.unwrap();
            let resp = format!(
                "HTTP/1.1 200 OK\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            sock.write_all(resp.as_bytes()).await.unwrap();
        });

        let loader = HttpTokenListLoader::new(url, Duration::from_secs(5)).unwrap();
        let tokens = loader.load().await.unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].decimals, 6);
    }

    #[tokio::test]
    async fn unreachable_is_fetch_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/list.json", listener.local_addr().unwrap());
        drop(listener);
        let loader = HttpTokenListLoader::new(url, Duration::from_secs(5)).unwrap();
        assert!(matches!(loader.load().await, Err(TokenListError::Fetch(_))));
    }
}
