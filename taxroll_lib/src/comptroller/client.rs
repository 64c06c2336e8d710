//! Bulk-data client implementation.

use std::io::Read;
use std::time::Duration;

use super::error::ComptrollerError;
use super::types::FileEntry;

/// Timeout for the listing and redirect requests.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for signed-URL payload downloads (large county files).
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(90);

/// Client for the comptroller's bulk data service.
///
/// Holds two HTTP clients: one with redirects disabled (the download
/// endpoint answers with a redirect to a signed URL that must be followed
/// manually) and one for fetching the signed payload itself.
pub struct ComptrollerClient {
    listing_client: reqwest::Client,
    download_client: reqwest::Client,
    base_url: String,
}

impl ComptrollerClient {
    pub fn new() -> Result<Self, ComptrollerError> {
        Self::with_base_url("https://data.comptroller.texas.gov")
    }

    /// Create a client with a custom base URL (for testing with wiremock).
    pub fn with_base_url(base_url: &str) -> Result<Self, ComptrollerError> {
        let listing_client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(ComptrollerError::Network)?;
        let download_client = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()
            .map_err(ComptrollerError::Network)?;
        Ok(Self {
            listing_client,
            download_client,
            base_url: base_url.to_string(),
        })
    }

    /// Lists available files for a dataset ("rates" or "addresses").
    pub async fn list_files(&self, dataset: &str) -> Result<Vec<FileEntry>, ComptrollerError> {
        let url = format!("{}/api/files", self.base_url);
        let response = self
            .listing_client
            .get(&url)
            .query(&[("dataset", dataset)])
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ComptrollerError::RateLimited);
        }
        if !status.is_success() {
            return Err(ComptrollerError::InvalidRequest(format!(
                "file listing returned HTTP {}",
                status
            )));
        }
        response
            .json::<Vec<FileEntry>>()
            .await
            .map_err(|e| ComptrollerError::InvalidRequest(format!("bad listing payload: {}", e)))
    }

    /// Downloads one file via the two-step signed flow and returns the
    /// decoded payload bytes (ZIP archives are unpacked to their first
    /// CSV/TXT member).
    pub async fn download(&self, file_path: &str) -> Result<Vec<u8>, ComptrollerError> {
        let url = format!("{}/api/download", self.base_url);
        let response = self
            .listing_client
            .get(&url)
            .query(&[("file", file_path)])
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ComptrollerError::RateLimited);
        }
        if !status.is_redirection() {
            return Err(ComptrollerError::MissingRedirect);
        }
        let signed_url = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(ComptrollerError::MissingRedirect)?
            .to_string();

        // Signed URLs may be relative to the service host.
        let signed_url = if signed_url.starts_with("http") {
            signed_url
        } else {
            format!("{}{}", self.base_url, signed_url)
        };

        tracing::debug!(file = file_path, "following signed download URL");
        let payload = self.download_client.get(&signed_url).send().await?;
        if !payload.status().is_success() {
            return Err(ComptrollerError::InvalidRequest(format!(
                "signed download returned HTTP {}",
                payload.status()
            )));
        }
        let bytes = payload.bytes().await?.to_vec();
        decode_payload(bytes)
    }
}

/// ZIP archives are detected by magic and unpacked in memory; plain
/// delimited text passes through unchanged.
pub fn decode_payload(bytes: Vec<u8>) -> Result<Vec<u8>, ComptrollerError> {
    if !bytes.starts_with(b"PK\x03\x04") {
        return Ok(bytes);
    }

    let cursor = std::io::Cursor::new(bytes);
    let mut archive = zip::ZipArchive::new(cursor)
        .map_err(|e| ComptrollerError::Archive(format!("unreadable archive: {}", e)))?;

    let member_name = (0..archive.len())
        .filter_map(|i| archive.by_index(i).ok().map(|f| f.name().to_string()))
        .find(|name| {
            let lower = name.to_lowercase();
            lower.ends_with(".csv") || lower.ends_with(".txt")
        })
        .ok_or_else(|| ComptrollerError::Archive("no CSV/TXT member in archive".to_string()))?;

    let mut member = archive
        .by_name(&member_name)
        .map_err(|e| ComptrollerError::Archive(format!("member {}: {}", member_name, e)))?;
    let mut out = Vec::with_capacity(member.size() as usize);
    member
        .read_to_end(&mut out)
        .map_err(|e| ComptrollerError::Archive(format!("member {}: {}", member_name, e)))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn plain_text_passes_through() {
        let bytes = b"name,taid,rate\n".to_vec();
        assert_eq!(decode_payload(bytes.clone()).unwrap(), bytes);
    }

    #[test]
    fn zip_payload_extracts_csv_member() {
        let mut buf = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buf);
            let options = zip::write::SimpleFileOptions::default();
            writer.start_file("readme.pdf", options).unwrap();
            writer.write_all(b"ignore me").unwrap();
            writer.start_file("rates_2025q3.csv", options).unwrap();
            writer.write_all(b"name,taid,rate\nTEXAS STATE,1,0.0625\n").unwrap();
            writer.finish().unwrap();
        }
        let decoded = decode_payload(buf.into_inner()).unwrap();
        assert!(String::from_utf8(decoded).unwrap().contains("TEXAS STATE"));
    }

    #[test]
    fn zip_without_text_member_is_archive_error() {
        let mut buf = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buf);
            let options = zip::write::SimpleFileOptions::default();
            writer.start_file("data.bin", options).unwrap();
            writer.write_all(&[0u8; 8]).unwrap();
            writer.finish().unwrap();
        }
        assert!(matches!(
            decode_payload(buf.into_inner()),
            Err(ComptrollerError::Archive(_))
        ));
    }
}
