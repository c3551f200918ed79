//! Remote wallet backend over HTTP
//!
//! Unary calls are JSON request/response. Streaming calls (unspent outputs,
//! transaction ranges, sync and rescan) return newline-delimited JSON bodies
//! that are decoded line by line as chunks arrive.

use std::io::{self, Cursor};

use async_trait::async_trait;
use futures::future;
use futures::stream::{Stream, StreamExt};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;

use super::{
    AccountRecord, AddressValidation, BackendResult, BackendStream, BlockInfo, BlockStamp,
    ConstructRequest, RescanUpdate, SyncNotification, TransactionBatch, TransactionLookup,
    UnspentRecord, UnspentRequest, WalletBackend,
};
use crate::config::BridgeConfig;
use crate::error::{BackendError, BridgeError, Stage};
use crate::types::{Balance, Hash, Network};

/// Longest streamed record accepted from the backend
pub const MAX_STREAM_LINE: usize = 4 * 1024 * 1024;

pub struct RemoteBackend {
    client: reqwest::Client,
    base_url: String,
    network: Network,
}

// ============================================================================
// Wire envelopes
// ============================================================================

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Serialize, Deserialize)]
struct RawTransaction {
    #[serde(with = "super::hex_bytes")]
    transaction: Vec<u8>,
}

#[derive(Serialize)]
struct SignBody<'a> {
    #[serde(with = "super::hex_bytes")]
    transaction: Vec<u8>,
    passphrase: &'a str,
}

#[derive(Deserialize)]
struct PublishResponse {
    hash: Hash,
}

#[derive(Serialize)]
struct NewAccountBody<'a> {
    name: &'a str,
    passphrase: &'a str,
}

#[derive(Deserialize)]
struct AccountNumber {
    number: u32,
}

#[derive(Deserialize)]
struct NewAddress {
    address: String,
}

#[derive(Serialize)]
struct RescanBody {
    begin_height: i32,
}

/// One line of a streamed body: either an item or a server-side error
#[derive(Deserialize)]
#[serde(untagged)]
enum StreamLine<T> {
    Error { error: String },
    Item(T),
}

impl RemoteBackend {
    pub fn new(base_url: impl Into<String>, network: Network) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            network,
        }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Make one connection attempt, bounded by the configured timeout
    ///
    /// The result belongs to this caller alone; concurrent attempts do not
    /// observe each other. Cancelling `cancel` abandons the wait.
    pub async fn connect(config: &BridgeConfig, cancel: &CancellationToken) -> Result<Self, BridgeError> {
        let backend = Self::new(config.backend_url.clone(), config.network);
        log::info!("🔌 Connecting to wallet backend at {}", backend.base_url);

        let outcome = {
            let attempt = tokio::time::timeout(config.connect_timeout, backend.best_block());
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = attempt => Some(result),
            }
        };

        match outcome {
            None => {
                log::warn!("Connection to {} cancelled", backend.base_url);
                Err(BridgeError::Cancelled)
            }
            Some(Err(_)) => Err(BridgeError::transport(
                Stage::Connecting,
                BackendError::unavailable(format!(
                    "no response from {} within {:?}",
                    backend.base_url, config.connect_timeout
                )),
            )),
            Some(Ok(Err(e))) => Err(BridgeError::transport(Stage::Connecting, e)),
            Some(Ok(Ok(best))) => {
                log::info!("✅ Connected to wallet backend (best block {})", best.height);
                Ok(backend)
            }
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, request: RequestBuilder) -> BackendResult<Response> {
        let response = request.send().await.map_err(request_error)?;
        check_status(response).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> BackendResult<T> {
        let response = self.send(self.client.get(self.url(path))).await?;
        response.json::<T>().await.map_err(decode_error)
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> BackendResult<T> {
        let response = self.send(self.client.post(self.url(path)).json(body)).await?;
        response.json::<T>().await.map_err(decode_error)
    }

    async fn open_stream<T>(&self, request: RequestBuilder) -> BackendResult<BackendStream<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let response = self.send(request).await?;
        let chunks = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(request_error));
        Ok(ndjson_lines(chunks.boxed()))
    }
}

#[async_trait]
impl WalletBackend for RemoteBackend {
    async fn accounts(&self) -> BackendResult<Vec<AccountRecord>> {
        self.get_json("/accounts").await
    }

    async fn account_balance(&self, account: u32, required_confirmations: i32) -> BackendResult<Balance> {
        self.get_json(&format!(
            "/accounts/{}/balance?required_confirmations={}",
            account, required_confirmations
        ))
        .await
    }

    async fn account_number(&self, name: &str) -> BackendResult<u32> {
        let request = self
            .client
            .get(self.url("/accounts/by-name"))
            .query(&[("name", name)]);
        let response = self.send(request).await?;
        let number: AccountNumber = response.json().await.map_err(decode_error)?;
        Ok(number.number)
    }

    async fn next_account(&self, name: &str, passphrase: &str) -> BackendResult<u32> {
        let number: AccountNumber = self
            .post_json("/accounts", &NewAccountBody { name, passphrase })
            .await?;
        Ok(number.number)
    }

    async fn validate_address(&self, address: &str) -> BackendResult<AddressValidation> {
        let request = self
            .client
            .get(self.url("/addresses/validate"))
            .query(&[("address", address)]);
        let response = self.send(request).await?;
        response.json().await.map_err(decode_error)
    }

    async fn next_address(&self, account: u32) -> BackendResult<String> {
        let address: NewAddress = self
            .post_json(&format!("/accounts/{}/addresses/next", account), &serde_json::json!({}))
            .await?;
        Ok(address.address)
    }

    async fn unspent_outputs(&self, request: UnspentRequest) -> BackendResult<BackendStream<UnspentRecord>> {
        let http = self
            .client
            .get(self.url(&format!("/accounts/{}/unspent", request.account)))
            .query(&[
                ("target_amount", request.target_amount.atoms().to_string()),
                ("required_confirmations", request.required_confirmations.to_string()),
                ("include_immature_coinbases", request.include_immature_coinbases.to_string()),
            ]);
        self.open_stream(http).await
    }

    async fn construct_transaction(&self, request: ConstructRequest) -> BackendResult<Vec<u8>> {
        let raw: RawTransaction = self.post_json("/transactions/construct", &request).await?;
        Ok(raw.transaction)
    }

    async fn sign_transaction(&self, unsigned: Vec<u8>, passphrase: &str) -> BackendResult<Vec<u8>> {
        let body = SignBody {
            transaction: unsigned,
            passphrase,
        };
        let raw: RawTransaction = self.post_json("/transactions/sign", &body).await?;
        Ok(raw.transaction)
    }

    async fn publish_transaction(&self, signed: Vec<u8>) -> BackendResult<Hash> {
        let published: PublishResponse = self
            .post_json("/transactions/publish", &RawTransaction { transaction: signed })
            .await?;
        Ok(published.hash)
    }

    async fn get_transaction(&self, hash: Hash) -> BackendResult<TransactionLookup> {
        self.get_json(&format!("/transactions/{}", hash)).await
    }

    async fn get_transactions(
        &self,
        start_height: i32,
        end_height: i32,
    ) -> BackendResult<BackendStream<TransactionBatch>> {
        let http = self
            .client
            .get(self.url("/transactions"))
            .query(&[("start_height", start_height), ("end_height", end_height)]);
        self.open_stream(http).await
    }

    async fn best_block(&self) -> BackendResult<BlockStamp> {
        self.get_json("/blocks/best").await
    }

    async fn block_info(&self, hash: Hash) -> BackendResult<BlockInfo> {
        self.get_json(&format!("/blocks/{}", hash)).await
    }

    async fn spv_sync(&self) -> BackendResult<BackendStream<SyncNotification>> {
        self.open_stream(self.client.post(self.url("/sync"))).await
    }

    async fn rescan(&self, begin_height: i32) -> BackendResult<BackendStream<RescanUpdate>> {
        let http = self
            .client
            .post(self.url("/rescan"))
            .json(&RescanBody { begin_height });
        self.open_stream(http).await
    }
}

// ============================================================================
// Status and stream decoding
// ============================================================================

fn request_error(e: reqwest::Error) -> BackendError {
    if e.is_connect() || e.is_timeout() {
        BackendError::unavailable(e.to_string())
    } else {
        BackendError::internal(e.to_string())
    }
}

fn decode_error(e: reqwest::Error) -> BackendError {
    BackendError::internal(format!("invalid response body: {}", e))
}

fn error_for_status(status: StatusCode, message: String) -> BackendError {
    match status {
        StatusCode::NOT_FOUND => BackendError::not_found(message),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => BackendError::invalid_argument(message),
        StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY | StatusCode::GATEWAY_TIMEOUT => {
            BackendError::unavailable(message)
        }
        _ => BackendError::internal(message),
    }
}

async fn check_status(response: Response) -> BackendResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|body| body.error)
        .unwrap_or_else(|_| if text.is_empty() { status.to_string() } else { text });
    Err(error_for_status(status, message))
}

fn parse_line<T: DeserializeOwned>(line: &[u8]) -> BackendResult<T> {
    match serde_json::from_slice::<StreamLine<T>>(line) {
        Ok(StreamLine::Item(item)) => Ok(item),
        Ok(StreamLine::Error { error }) => Err(BackendError::internal(error)),
        Err(e) => Err(BackendError::internal(format!("invalid stream line: {}", e))),
    }
}

fn codec_error(e: LinesCodecError, max_length: usize) -> BackendError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            BackendError::internal(format!("stream line longer than {} bytes", max_length))
        }
        LinesCodecError::Io(e) => {
            let message = e.to_string();
            match e.into_inner().map(|inner| inner.downcast::<BackendError>()) {
                Some(Ok(backend)) => *backend,
                _ => BackendError::internal(message),
            }
        }
    }
}

/// Split a chunked body into newline-delimited JSON records
///
/// A transport or framing error is yielded once and ends the stream.
fn ndjson_lines<S, T>(chunks: S) -> BackendStream<T>
where
    S: Stream<Item = BackendResult<Vec<u8>>> + Send + Unpin + 'static,
    T: DeserializeOwned + Send + 'static,
{
    ndjson_lines_limited(chunks, MAX_STREAM_LINE)
}

fn ndjson_lines_limited<S, T>(chunks: S, max_length: usize) -> BackendStream<T>
where
    S: Stream<Item = BackendResult<Vec<u8>>> + Send + Unpin + 'static,
    T: DeserializeOwned + Send + 'static,
{
    let body = chunks.map(|chunk| {
        chunk
            .map(Cursor::new)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    });
    FramedRead::new(StreamReader::new(body), LinesCodec::new_with_max_length(max_length))
        .filter(|line| future::ready(!matches!(line, Ok(l) if l.trim().is_empty())))
        .scan(false, move |failed, line| {
            if *failed {
                return future::ready(None);
            }
            let item = match line {
                Ok(line) => parse_line(line.as_bytes()),
                Err(e) => {
                    *failed = true;
                    Err(codec_error(e, max_length))
                }
            };
            future::ready(Some(item))
        })
        .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use futures::TryStreamExt;

    fn chunks(parts: Vec<BackendResult<&str>>) -> impl Stream<Item = BackendResult<Vec<u8>>> + Send + Unpin {
        stream::iter(
            parts
                .into_iter()
                .map(|p| p.map(|s| s.as_bytes().to_vec()))
                .collect::<Vec<_>>(),
        )
    }

    #[tokio::test]
    async fn test_lines_split_across_chunks() {
        let body = chunks(vec![
            Ok("{\"rescanned_through\":1"),
            Ok("0}\n{\"rescanned_"),
            Ok("through\":20}\n\n{\"rescanned_through\":30}"),
        ]);
        let updates: Vec<RescanUpdate> = ndjson_lines::<_, RescanUpdate>(body).try_collect().await.unwrap();
        let heights: Vec<i32> = updates.iter().map(|u| u.rescanned_through).collect();
        assert_eq!(heights, vec![10, 20, 30]);
    }

    #[tokio::test]
    async fn test_error_line_and_transport_error() {
        let body = chunks(vec![Ok("{\"error\":\"wallet locked\"}\n")]);
        let mut lines = ndjson_lines::<_, RescanUpdate>(body);
        let err = lines.next().await.unwrap().unwrap_err();
        assert_eq!(err.message, "wallet locked");

        let body = chunks(vec![
            Ok("{\"rescanned_through\":5}\n"),
            Err(BackendError::unavailable("reset")),
            Ok("{\"rescanned_through\":6}\n"),
        ]);
        let items: Vec<_> = ndjson_lines::<_, RescanUpdate>(body).collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert_eq!(items[1].as_ref().unwrap_err().kind, crate::error::BackendErrorKind::Unavailable);
    }

    #[tokio::test]
    async fn test_oversized_line_ends_the_stream() {
        let body = chunks(vec![
            Ok("{\"rescanned_through\":1}\n"),
            Ok("9".repeat(64).as_str()),
            Ok("\n{\"rescanned_through\":2}\n"),
        ]);
        let items: Vec<_> = ndjson_lines_limited::<_, RescanUpdate>(body, 32).collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap().rescanned_through, 1);
        assert!(items[1].as_ref().unwrap_err().message.contains("longer than 32 bytes"));
    }

    #[test]
    fn test_status_mapping() {
        use crate::error::BackendErrorKind;
        assert_eq!(error_for_status(StatusCode::NOT_FOUND, "x".into()).kind, BackendErrorKind::NotFound);
        assert_eq!(error_for_status(StatusCode::BAD_REQUEST, "x".into()).kind, BackendErrorKind::InvalidArgument);
        assert_eq!(error_for_status(StatusCode::SERVICE_UNAVAILABLE, "x".into()).kind, BackendErrorKind::Unavailable);
        assert_eq!(error_for_status(StatusCode::INTERNAL_SERVER_ERROR, "x".into()).kind, BackendErrorKind::Internal);
    }

    #[tokio::test]
    async fn test_connect_cancelled() {
        let config = BridgeConfig {
            backend_url: "http://10.255.255.1:19111".to_string(),
            ..BridgeConfig::default()
        };
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = RemoteBackend::connect(&config, &cancel).await;
        assert!(matches!(result, Err(BridgeError::Cancelled)));
    }
}
