// THEORY:
// Remote clips are either streamed by OpenCV straight from their URL or, by
// default, downloaded first. Downloads land in `<event_id>-video.mp4` inside the
// download directory and are wrapped in a temporary `MaterializedClip` *before*
// the first byte is written, so a transfer that fails halfway is removed the same
// way a fully processed clip is.
//
// The orchestrator is synchronous; the transfer runs on the binary's tokio
// runtime through a handle and blocks until the file is complete.

use crate::zm_api::mask_secrets;
use futures::StreamExt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::runtime::Handle;
use tracing::info;
use zm_magik::{ClipProvider, Event, MagikError, MaterializedClip, Result};

pub struct DownloadClipProvider {
    runtime: Handle,
    http: reqwest::Client,
    dir: PathBuf,
    download: bool,
}

impl DownloadClipProvider {
    pub fn new(runtime: Handle, dir: impl Into<PathBuf>, download: bool) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(600))
            .build()
            .map_err(|e| MagikError::Configuration(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            runtime,
            http,
            dir: dir.into(),
            download,
        })
    }

    async fn fetch(&self, url: &str, path: &std::path::Path) -> std::result::Result<u64, String> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| e.without_url().to_string())?;

        let mut file = tokio::fs::File::create(path).await.map_err(|e| e.to_string())?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| e.without_url().to_string())?;
            file.write_all(&chunk).await.map_err(|e| e.to_string())?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(|e| e.to_string())?;
        Ok(written)
    }
}

impl ClipProvider for DownloadClipProvider {
    fn materialize(&mut self, event: &Event) -> Result<MaterializedClip> {
        if !self.download {
            return Ok(MaterializedClip::borrowed(&event.video));
        }

        std::fs::create_dir_all(&self.dir)?;
        let clip = MaterializedClip::temporary(self.dir.join(format!("{}-video.mp4", event.id)));
        let locator = mask_secrets(&event.video);
        info!(event_id = event.id, url = %locator, "downloading clip");

        let written = self
            .runtime
            .block_on(self.fetch(&event.video, clip.path()))
            .map_err(|reason| MagikError::resource(locator, reason))?;
        info!(event_id = event.id, bytes = written, "download complete");
        Ok(clip)
    }
}
