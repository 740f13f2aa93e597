use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Url;
use std::error::Error;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{error, info};
use uuid::Uuid;

/// Errors raised while fetching or unpacking a model archive
#[derive(Debug)]
pub enum ArchiveError {
    /// The archive could not be downloaded
    Download(String),
    /// The downloaded file is not a readable zip archive
    Extract(String),
    /// An entry would be written outside the destination
    UnsafeEntry(String),
    Io(io::Error),
}

impl fmt::Display for ArchiveError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ArchiveError::Download(msg) => write!(f, "Archive download failed: {}", msg),
            ArchiveError::Extract(msg) => write!(f, "Archive extraction failed: {}", msg),
            ArchiveError::UnsafeEntry(name) => write!(f, "Archive entry '{}' escapes destination", name),
            ArchiveError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl Error for ArchiveError {}

impl From<io::Error> for ArchiveError {
    fn from(err: io::Error) -> Self {
        ArchiveError::Io(err)
    }
}

impl From<reqwest::Error> for ArchiveError {
    fn from(err: reqwest::Error) -> Self {
        ArchiveError::Download(err.to_string())
    }
}

impl From<zip::result::ZipError> for ArchiveError {
    fn from(err: zip::result::ZipError) -> Self {
        ArchiveError::Extract(err.to_string())
    }
}

/// Source of model archives, addressed by an opaque file identifier.
#[async_trait]
pub trait ArchiveSource: Send + Sync {
    /// Fetches archive `id` and unpacks it into `destination`.
    async fn download_and_extract(&self, id: &str, destination: &Path) -> Result<(), ArchiveError>;
}

/// Unpacks a zip file into `destination`, refusing entries that escape it.
pub fn extract_zip(archive_path: &Path, destination: &Path) -> Result<usize, ArchiveError> {
    let file = fs::File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(file)?;
    let mut written = 0;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let relative: PathBuf = entry
            .enclosed_name()
            .ok_or_else(|| ArchiveError::UnsafeEntry(entry.name().to_string()))?;
        let target = destination.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = fs::File::create(&target)?;
        io::copy(&mut entry, &mut out)?;
        written += 1;
    }

    Ok(written)
}

/// Stands in for `{id}` while the template is parsed
const ID_MARKER: &str = "__modelhub_archive_id__";

/// Downloads archives over HTTP from a URL template containing `{id}`.
pub struct HttpArchiveSource {
    client: reqwest::Client,
    url_template: String,
}

impl HttpArchiveSource {
    pub fn new(url_template: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url_template,
        }
    }

    /// Download URL for archive `id`, percent-encoded where it is placed
    pub fn url_for(&self, id: &str) -> Result<Url, ArchiveError> {
        let mut url = Url::parse(&self.url_template.replace("{id}", ID_MARKER))
            .map_err(|e| ArchiveError::Download(format!("Invalid URL template: {}", e)))?;

        if url.query().is_some_and(|q| q.contains(ID_MARKER)) {
            let pairs: Vec<(String, String)> = url
                .query_pairs()
                .map(|(k, v)| (k.into_owned(), v.replace(ID_MARKER, id)))
                .collect();
            url.query_pairs_mut().clear().extend_pairs(&pairs);
        }
        if url.path().contains(ID_MARKER) {
            let segments: Vec<String> = url
                .path_segments()
                .map(|segments| segments.map(|s| s.replace(ID_MARKER, id)).collect())
                .unwrap_or_default();
            url.path_segments_mut()
                .map_err(|_| ArchiveError::Download("URL template cannot carry a path".to_string()))?
                .clear()
                .extend(&segments);
        }
        Ok(url)
    }

    async fn download(&self, url: Url, target: &Path) -> Result<(), ArchiveError> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        let mut file = tokio::fs::File::create(target).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl ArchiveSource for HttpArchiveSource {
    async fn download_and_extract(&self, id: &str, destination: &Path) -> Result<(), ArchiveError> {
        let url = self.url_for(id)?;
        // The id is caller-supplied; never let it into a file name
        let zip_path = destination.join(format!(".download-{}.zip", Uuid::new_v4()));

        info!("Downloading archive '{}' into {}", id, destination.display());
        if let Err(e) = self.download(url, &zip_path).await {
            error!("Download of archive '{}' failed: {}", id, e);
            let _ = tokio::fs::remove_file(&zip_path).await;
            return Err(e);
        }

        info!("Extracting archive '{}'", id);
        let (zip, dest) = (zip_path.clone(), destination.to_path_buf());
        let extracted = tokio::task::spawn_blocking(move || extract_zip(&zip, &dest))
            .await
            .map_err(|e| ArchiveError::Extract(e.to_string()))?;

        tokio::fs::remove_file(&zip_path).await?;
        let files = extracted?;
        info!("Archive '{}' extracted ({} files)", id, files);
        Ok(())
    }
}
