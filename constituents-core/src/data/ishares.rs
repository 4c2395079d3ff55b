//! iShares direct-download fetcher.
//!
//! Each fund's holdings are served as a CSV file from a fixed product URL.
//! The request is retried with exponential backoff on connection failures,
//! timeouts, 429 and 5xx responses; any other non-success status fails the
//! fund immediately.

use super::provider::{DataError, HoldingsFetcher, RawHoldingsTable};
use crate::config::PipelineConfig;
use crate::domain::{FundSpec, ProviderKind};
use std::time::Duration;
use tracing::debug;

const MAX_BACKOFF: Duration = Duration::from_secs(60);

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// iShares holdings fetcher.
pub struct ISharesFetcher {
    client: reqwest::blocking::Client,
    funds: Vec<FundSpec>,
    api_key: Option<String>,
    max_retries: u32,
    base_delay: Duration,
}

impl ISharesFetcher {
    pub fn new(config: &PipelineConfig) -> Result<Self, DataError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| DataError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            funds: config.fund_specs(ProviderKind::IShares),
            api_key: config.api_key(ProviderKind::IShares).map(String::from),
            max_retries: config.max_retries,
            base_delay: config.retry_base_delay(),
        })
    }

    /// Execute the download with retry logic and return the body bytes.
    fn fetch_with_retry(&self, fund: &FundSpec) -> Result<Vec<u8>, DataError> {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = backoff_delay(self.base_delay, attempt);
                debug!(fund = %fund.name, attempt, ?delay, "retrying holdings download");
                std::thread::sleep(delay);
            }

            let mut request = self.client.post(&fund.url);
            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key);
            }

            match request.send() {
                Ok(resp) => {
                    let status = resp.status();

                    if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
                    {
                        last_error = Some(DataError::Network(format!(
                            "HTTP {status} for {}",
                            fund.name
                        )));
                        continue;
                    }

                    if !status.is_success() {
                        return Err(DataError::Network(format!(
                            "HTTP {status} for {}",
                            fund.name
                        )));
                    }

                    let body = resp.bytes().map_err(|e| {
                        DataError::Network(format!("failed to read body for {}: {e}", fund.name))
                    })?;
                    return Ok(body.to_vec());
                }
                Err(e) => {
                    if e.is_connect() || e.is_timeout() {
                        last_error = Some(DataError::Network(e.to_string()));
                        continue;
                    }
                    return Err(DataError::Network(e.to_string()));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| DataError::Network("max retries exceeded".into())))
    }
}

/// `base * 2^(attempt - 1)`, saturating at `MAX_BACKOFF`.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.checked_pow(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
    base.checked_mul(factor)
        .map_or(MAX_BACKOFF, |d| d.min(MAX_BACKOFF))
}

impl HoldingsFetcher for ISharesFetcher {
    fn name(&self) -> &str {
        "ishares_csv"
    }

    fn provider(&self) -> ProviderKind {
        ProviderKind::IShares
    }

    fn funds(&self) -> &[FundSpec] {
        &self.funds
    }

    fn fetch(&self, fund: &FundSpec) -> Result<RawHoldingsTable, DataError> {
        let bytes = self.fetch_with_retry(fund)?;
        decode_csv_payload(fund, &bytes)
    }
}

/// Decode a CSV payload into raw rows without assuming any header layout.
pub fn decode_csv_payload(fund: &FundSpec, bytes: &[u8]) -> Result<RawHoldingsTable, DataError> {
    let text = std::str::from_utf8(bytes).map_err(|e| {
        DataError::Network(format!("payload for '{}' is not UTF-8: {e}", fund.name))
    })?;
    let text = text.trim_start_matches('\u{feff}');

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| {
            DataError::Network(format!("failed to decode CSV for '{}': {e}", fund.name))
        })?;
        rows.push(
            record
                .iter()
                .map(|cell| cell.trim_matches(|c: char| c.is_whitespace()).to_string())
                .collect(),
        );
    }

    if rows.is_empty() {
        return Err(DataError::Network(format!("empty payload for '{}'", fund.name)));
    }

    Ok(RawHoldingsTable {
        fund: fund.name.clone(),
        provider: fund.provider,
        source: fund.url.clone(),
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::sync::{Arc, Mutex};

    fn fund() -> FundSpec {
        FundSpec {
            name: "iwm".into(),
            provider: ProviderKind::IShares,
            url: "https://example.com/iwm.csv".into(),
        }
    }

    #[test]
    fn decodes_ragged_rows_and_strips_bom() {
        let payload = "\u{feff}iShares Russell 2000 ETF\n\
                       Fund Holdings as of,\"Jan 05, 2024\"\n\
                       \n\
                       Ticker,Name,Market Value\n\
                       \"AAPL\",\"APPLE INC\",\"1,234.56\"\n";
        let table = decode_csv_payload(&fund(), payload.as_bytes()).unwrap();

        assert_eq!(table.rows[0], vec!["iShares Russell 2000 ETF".to_string()]);
        assert_eq!(table.cell(1, 1), Some("Jan 05, 2024"));
        assert_eq!(table.width(), 3);
        assert_eq!(table.rows.last().unwrap()[2], "1,234.56");
    }

    #[test]
    fn non_utf8_payload_is_network_error() {
        let result = decode_csv_payload(&fund(), &[0xff, 0xfe, 0x00, 0x41]);
        assert!(matches!(result, Err(DataError::Network(_))));
    }

    #[test]
    fn empty_payload_is_network_error() {
        let result = decode_csv_payload(&fund(), b"");
        assert!(matches!(result, Err(DataError::Network(_))));
    }

    #[test]
    fn backoff_doubles_and_saturates() {
        let base = Duration::from_millis(500);
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(500));
        assert_eq!(backoff_delay(base, 3), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, 40), MAX_BACKOFF);
        assert_eq!(backoff_delay(base, u32::MAX), MAX_BACKOFF);
    }

    /// Serves one canned response per connection and records each request head.
    struct CannedServer {
        url: String,
        requests: Arc<Mutex<Vec<String>>>,
    }

    impl CannedServer {
        fn start(responses: Vec<(u16, &'static str)>) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let url = format!("http://{}/iwm.ajax", listener.local_addr().unwrap());
            let requests = Arc::new(Mutex::new(Vec::new()));
            let seen = Arc::clone(&requests);

            std::thread::spawn(move || {
                for (status, body) in responses {
                    let Ok((mut stream, _)) = listener.accept() else {
                        return;
                    };
                    let head = read_request_head(&mut stream);
                    seen.lock().unwrap().push(head);
                    let reply = format!(
                        "HTTP/1.1 {status} Canned\r\nContent-Type: text/csv\r\n\
                         Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = stream.write_all(reply.as_bytes());
                }
            });

            Self { url, requests }
        }

        fn requests(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }
    }

    fn read_request_head(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
            match stream.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
            }
        }
        String::from_utf8_lossy(&buf).to_string()
    }

    fn local_fetcher(url: &str, api_key: Option<&str>) -> (ISharesFetcher, FundSpec) {
        let fund = FundSpec {
            name: "iwm".into(),
            provider: ProviderKind::IShares,
            url: url.to_string(),
        };
        let fetcher = ISharesFetcher {
            client: reqwest::blocking::Client::builder()
                .no_proxy()
                .timeout(Duration::from_secs(5))
                .build()
                .unwrap(),
            funds: vec![fund.clone()],
            api_key: api_key.map(String::from),
            max_retries: 3,
            base_delay: Duration::from_millis(1),
        };
        (fetcher, fund)
    }

    const HOLDINGS: &str = "Fund Holdings as of,\"Jan 05, 2024\"\n\
                            Ticker,Name,Market Value\n\
                            \"AAPL\",\"APPLE INC\",\"1,234.56\"\n";

    #[test]
    fn server_errors_are_retried_until_success() {
        let server = CannedServer::start(vec![
            (503, "busy"),
            (503, "busy"),
            (200, HOLDINGS),
        ]);
        let (fetcher, fund) = local_fetcher(&server.url, Some("secret-key"));

        let table = fetcher.fetch(&fund).unwrap();

        assert_eq!(table.cell(1, 0), Some("Ticker"));
        assert_eq!(table.cell(2, 2), Some("1,234.56"));
        assert_eq!(table.source, server.url);

        let requests = server.requests();
        assert_eq!(requests.len(), 3);
        for head in &requests {
            assert!(head.starts_with("POST /iwm.ajax "), "{head}");
            assert!(
                head.to_ascii_lowercase()
                    .contains("authorization: bearer secret-key"),
                "{head}"
            );
        }
    }

    #[test]
    fn client_error_fails_without_retry() {
        let server = CannedServer::start(vec![(404, "missing"), (200, HOLDINGS)]);
        let (fetcher, fund) = local_fetcher(&server.url, None);

        let err = fetcher.fetch(&fund).unwrap_err();

        assert!(matches!(err, DataError::Network(ref m) if m.contains("404")), "{err}");
        let requests = server.requests();
        assert_eq!(requests.len(), 1);
        assert!(!requests[0].to_ascii_lowercase().contains("authorization:"));
    }

    #[test]
    fn retries_are_bounded() {
        let server = CannedServer::start(vec![(429, "slow down"); 4]);
        let (fetcher, fund) = local_fetcher(&server.url, None);

        let err = fetcher.fetch(&fund).unwrap_err();

        assert!(matches!(err, DataError::Network(ref m) if m.contains("429")), "{err}");
        assert_eq!(server.requests().len(), 4);
    }
}
