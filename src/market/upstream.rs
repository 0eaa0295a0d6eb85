use crate::error::StreamError;
use crate::market::transport::{
    PushConnector, PushEventSink, PushHandle, ReferenceLookup, SpotSource,
};
use crate::market::types::{
    parse_spot_payload, RawQuote, ReferencePrice, ReferencePricesWire,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const REFERENCE_LOOKUP_LIMIT: usize = 2;

pub type QuoteWsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn reference_endpoint(base: &str, asset: &str, currency: &str) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    format!(
        "{base}{separator}asset={}&currency={}&limit={REFERENCE_LOOKUP_LIMIT}",
        asset.to_ascii_uppercase(),
        currency.to_ascii_uppercase()
    )
}

fn http_client(request_timeout: Duration) -> Result<Client, StreamError> {
    Ok(Client::builder().timeout(request_timeout).build()?)
}

/// WebSocket push transport.
#[derive(Debug, Default)]
pub struct WsPushConnector;

impl PushConnector for WsPushConnector {
    fn open(&self, endpoint: &str, sink: PushEventSink) -> Result<PushHandle, StreamError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|error| StreamError::Resource(format!("no async runtime: {error}")))?;

        let cancel_token = CancellationToken::new();
        let task_token = cancel_token.clone();
        let endpoint = endpoint.to_string();
        runtime.spawn(async move {
            run_push_socket(endpoint, sink, task_token).await;
        });

        Ok(PushHandle::new(cancel_token))
    }
}

pub async fn connect_quote_stream(endpoint: &str) -> Result<QuoteWsStream, StreamError> {
    let ws_config = WebSocketConfig {
        max_message_size: Some(1 << 20),
        max_frame_size: Some(1 << 20),
        ..Default::default()
    };

    let (stream, _) = connect_async_with_config(endpoint, Some(ws_config), true).await?;
    Ok(stream)
}

async fn run_push_socket(endpoint: String, sink: PushEventSink, cancel_token: CancellationToken) {
    let connected = tokio::select! {
        _ = cancel_token.cancelled() => return,
        connected = connect_quote_stream(&endpoint) => connected,
    };

    let mut websocket_stream = match connected {
        Ok(stream) => stream,
        Err(error) => {
            sink.error(format!("websocket connect error: {error}"));
            return;
        }
    };

    if !sink.opened() {
        let _ = websocket_stream.close(None).await;
        return;
    }
    debug!(%endpoint, "push socket open");

    loop {
        let frame = tokio::select! {
            _ = cancel_token.cancelled() => {
                let _ = websocket_stream.close(None).await;
                break;
            }
            next_message = websocket_stream.next() => next_message,
        };

        let delivered = match frame {
            Some(Ok(Message::Text(text_payload))) => sink.message(text_payload.into_bytes()),
            Some(Ok(Message::Binary(binary_payload))) => sink.message(binary_payload),
            Some(Ok(Message::Close(_))) | None => {
                sink.error("websocket closed by server");
                break;
            }
            Some(Ok(_)) => true,
            Some(Err(error)) => {
                sink.error(format!("websocket frame error: {error}"));
                break;
            }
        };

        if !delivered {
            warn!("push sink closed, dropping socket");
            let _ = websocket_stream.close(None).await;
            break;
        }
    }
}

/// `GET /spot` pull transport.
#[derive(Debug, Clone)]
pub struct HttpSpotSource {
    client: Client,
    endpoint: String,
}

impl HttpSpotSource {
    pub fn new(endpoint: impl Into<String>, request_timeout: Duration) -> Result<Self, StreamError> {
        Ok(Self {
            client: http_client(request_timeout)?,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl SpotSource for HttpSpotSource {
    async fn fetch_spot(&self) -> Result<RawQuote, StreamError> {
        let response = self
            .client
            .get(&self.endpoint)
            .send()
            .await?
            .error_for_status()?;
        let mut payload = response.bytes().await?.to_vec();
        Ok(parse_spot_payload(&mut payload)?.into())
    }
}

/// Reference lookup against `GET /prices?asset=..&currency=..&limit=2`.
#[derive(Debug, Clone)]
pub struct HttpReferenceLookup {
    client: Client,
    base: String,
}

impl HttpReferenceLookup {
    pub fn new(base: impl Into<String>, request_timeout: Duration) -> Result<Self, StreamError> {
        Ok(Self {
            client: http_client(request_timeout)?,
            base: base.into(),
        })
    }
}

#[async_trait]
impl ReferenceLookup for HttpReferenceLookup {
    async fn last_prices(
        &self,
        asset: &str,
        currency: &str,
    ) -> Result<Vec<ReferencePrice>, StreamError> {
        let endpoint = reference_endpoint(&self.base, asset, currency);
        let response = self.client.get(endpoint).send().await?.error_for_status()?;
        let mut payload = response.bytes().await?.to_vec();
        let wire: ReferencePricesWire = simd_json::serde::from_slice(&mut payload)?;
        Ok(wire.into_reference_prices())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_endpoint_appends_query() {
        let endpoint = reference_endpoint("http://127.0.0.1:8001/prices", "xau", "usd");
        assert_eq!(
            endpoint,
            "http://127.0.0.1:8001/prices?asset=XAU&currency=USD&limit=2"
        );
    }

    #[test]
    fn reference_endpoint_extends_existing_query() {
        let endpoint = reference_endpoint("http://host/prices?source=cache", "XAU", "INR");
        assert!(endpoint.starts_with("http://host/prices?source=cache&asset=XAU"));
        assert!(endpoint.ends_with("&limit=2"));
    }

    #[test]
    fn push_connector_requires_runtime() {
        let (inbox, _receiver) = tokio::sync::mpsc::unbounded_channel();
        let sink = PushEventSink::new(1, inbox);
        let result = WsPushConnector.open("ws://127.0.0.1:1/ws", sink);

        assert!(matches!(result, Err(StreamError::Resource(_))));
    }
}
