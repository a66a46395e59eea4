use std::future::Future;
use std::time::Duration;

use log::debug;
use tokio::net::TcpStream;
use tokio_native_tls::TlsStream;
use tokio_socks::tcp::Socks5Stream;

use crate::error::{RelayError, Result};
use crate::settings::AccountConfig;

/// Produces connected transports for one account, optionally tunneled
/// through a SOCKS5 proxy. Every operation run through it is bounded by
/// the same timeout.
#[derive(Debug, Clone)]
pub struct Connector {
    proxy: Option<(String, u16)>,
    timeout: Duration,
}

impl Connector {
    pub fn new(proxy: Option<(String, u16)>, timeout: Duration) -> Self {
        Self { proxy, timeout }
    }

    pub fn for_account(account: &AccountConfig, timeout: Duration) -> Self {
        let proxy = account.proxy().map(|(host, port)| (host.to_string(), port));
        Self::new(proxy, timeout)
    }

    pub fn is_proxied(&self) -> bool {
        self.proxy.is_some()
    }

    /// Run `operation`, turning an elapsed timeout into a connection error.
    pub async fn bounded<T, F>(&self, what: &str, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.timeout, operation).await {
            Ok(result) => result,
            Err(_) => Err(RelayError::Connection(format!(
                "{} timed out after {}s",
                what,
                self.timeout.as_secs()
            ))),
        }
    }

    pub async fn dial(&self, host: &str, port: u16) -> Result<TcpStream> {
        let stream = match &self.proxy {
            Some((proxy_host, proxy_port)) => {
                self.bounded("proxy connect", async {
                    let tunnel = Socks5Stream::connect((proxy_host.as_str(), *proxy_port), (host, port))
                        .await
                        .map_err(|e| {
                            RelayError::Connection(format!(
                                "socks5 {}:{} -> {}:{}: {}",
                                proxy_host, proxy_port, host, port, e
                            ))
                        })?;
                    Ok(tunnel.into_inner())
                })
                .await?
            }
            None => {
                self.bounded("connect", async {
                    TcpStream::connect((host, port))
                        .await
                        .map_err(|e| RelayError::Connection(format!("{}:{}: {}", host, port, e)))
                })
                .await?
            }
        };

        debug!("-- connected to {}:{} (proxied: {})", host, port, self.is_proxied());
        Ok(stream)
    }

    pub async fn tls(&self, host: &str, stream: TcpStream) -> Result<TlsStream<TcpStream>> {
        let connector = native_tls::TlsConnector::new()
            .map_err(|e| RelayError::Connection(format!("tls setup: {}", e)))?;
        let tls = tokio_native_tls::TlsConnector::from(connector);
        self.bounded("tls handshake", async {
            tls.connect(host, stream)
                .await
                .map_err(|e| RelayError::Connection(format!("tls handshake with {}: {}", host, e)))
        })
        .await
    }
}
