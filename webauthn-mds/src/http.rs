//! The HTTP seam used by remote metadata sources.

use crate::error::{MdsError, MdsResult};
use std::fmt;
use std::time::Duration;
use url::Url;

/// The default time allowed for a metadata request to complete.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// The response to a GET request.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

/// A minimal blocking HTTP client. Implement this to route metadata requests through your
/// own transport.
pub trait HttpClient: fmt::Debug + Send + Sync {
    /// Perform a GET of `uri` with the additional `headers`.
    fn get(&self, uri: &Url, headers: &[(String, String)]) -> MdsResult<HttpResponse>;
}

/// An [HttpClient] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: reqwest::blocking::Client,
}

impl ReqwestHttpClient {
    /// Build a client whose requests fail after `timeout`.
    pub fn new(timeout: Duration) -> MdsResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("webauthn-mds/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| MdsError::Transport(e.to_string()))?;
        Ok(ReqwestHttpClient { client })
    }
}

impl HttpClient for ReqwestHttpClient {
    fn get(&self, uri: &Url, headers: &[(String, String)]) -> MdsResult<HttpResponse> {
        let mut request = self.client.get(uri.clone());
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().map_err(|e| {
            if e.is_timeout() {
                warn!(%uri, "metadata request timed out");
            } else {
                warn!(%uri, ?e, "metadata request failed");
            }
            MdsError::Transport(e.to_string())
        })?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .map_err(|e| MdsError::Transport(e.to_string()))?
            .to_vec();

        Ok(HttpResponse { status, body })
    }
}

/// GET `uri`, requiring a 200 status and a non-empty body.
pub(crate) fn fetch(
    client: &dyn HttpClient,
    uri: &Url,
    headers: &[(String, String)],
) -> MdsResult<Vec<u8>> {
    debug!(%uri, "fetching metadata resource");
    let response = client.get(uri, headers)?;
    if response.status != 200 {
        warn!(%uri, status = response.status, "unexpected metadata response status");
        return Err(MdsError::HttpStatus(response.status));
    }
    if response.body.is_empty() {
        warn!(%uri, "empty metadata response");
        return Err(MdsError::EmptyBody);
    }
    Ok(response.body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::test_utils::MockHttpClient;

    #[test]
    fn fetch_requires_ok_and_body() {
        let client = MockHttpClient::default()
            .with("https://mds.example.com/ok", 200, b"data".to_vec())
            .with("https://mds.example.com/empty", 200, Vec::new())
            .with("https://mds.example.com/gone", 404, b"not found".to_vec());

        let url = |s: &str| Url::parse(s).expect("url");

        assert_eq!(
            fetch(&client, &url("https://mds.example.com/ok"), &[]).expect("ok"),
            b"data"
        );

        let err = fetch(&client, &url("https://mds.example.com/empty"), &[]).expect_err("empty");
        assert_eq!(err.kind(), ErrorKind::MetadataLoadFailure);

        let err = fetch(&client, &url("https://mds.example.com/gone"), &[]).expect_err("404");
        assert!(matches!(err, MdsError::HttpStatus(404)));

        let err = fetch(&client, &url("https://mds.example.com/down"), &[]).expect_err("down");
        assert_eq!(err.kind(), ErrorKind::MetadataLoadFailure);
    }

    #[test]
    fn reqwest_timeout_is_load_failure() {
        // A listener that accepts but never answers.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");

        let client = ReqwestHttpClient::new(Duration::from_millis(200)).expect("client");
        let uri = Url::parse(&format!("http://{}/blob.jwt", addr)).expect("url");
        let err = fetch(&client, &uri, &[]).expect_err("timeout");
        assert_eq!(err.kind(), ErrorKind::MetadataLoadFailure);
        drop(listener);
    }
}
