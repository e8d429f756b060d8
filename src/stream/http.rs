use reqwest::blocking::Client;
use reqwest::header::{CONTENT_LENGTH, RANGE};
use reqwest::StatusCode;

use super::{check_bounds, ByteStream};
use crate::error::{ReadError, Result};

/// Read-only remote file fetched with HTTP range requests
///
/// The content length is resolved once with a `HEAD` request. Every `read_at` issues
/// one ranged `GET`, so concurrent readers never share connection state beyond the
/// pooled client.
pub struct HttpStream {
    client: Client,
    url: String,
    size: u64,
}
impl HttpStream {
    /// Connects to `url` and resolves its content length
    ///
    /// # Errors
    ///
    /// Returns [`ReadError::BadPath`] if the server does not report the resource or
    /// its size.
    pub fn open(url: &str) -> Result<Self> {
        let client = Client::builder().build()?;
        let response = client.head(url).send()?;
        if response.status() == StatusCode::NOT_FOUND || !response.status().is_success() {
            return Err(ReadError::BadPath(url.to_string()).into());
        }
        let size = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| ReadError::BadPath(url.to_string()))?;
        tracing::debug!("opened remote stream {url} ({size} bytes)");
        Ok(Self {
            client,
            url: url.to_string(),
            size,
        })
    }

    /// URL of the remote resource
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl ByteStream for HttpStream {
    fn len(&self) -> u64 {
        self.size
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_bounds(offset, buf.len(), self.size)?;
        if buf.is_empty() {
            return Ok(());
        }
        let last = offset + buf.len() as u64 - 1;
        let response = self
            .client
            .get(&self.url)
            .header(RANGE, format!("bytes={offset}-{last}"))
            .send()?
            .error_for_status()?;
        let bytes = response.bytes()?;
        if bytes.len() < buf.len() {
            return Err(ReadError::Bounds {
                offset,
                len: buf.len(),
                size: offset + bytes.len() as u64,
            }
            .into());
        }
        buf.copy_from_slice(&bytes[..buf.len()]);
        Ok(())
    }
}
