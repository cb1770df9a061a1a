//! Artifact downloads from generation backends.

use std::path::Path;
use std::time::Duration;

use tracing::debug;

use crate::error::{EngineError, EngineResult};

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Fetch a generated artifact to a local file.
pub async fn download_to(client: &reqwest::Client, url: &str, target: &Path) -> EngineResult<()> {
    let response = client
        .get(url)
        .timeout(DOWNLOAD_TIMEOUT)
        .send()
        .await
        .map_err(muvi_gen::GenError::from)?;

    let status = response.status();
    if !status.is_success() {
        return Err(EngineError::Backend(muvi_gen::GenError::Http {
            status: status.as_u16(),
            body: format!("download of {} failed", url),
        }));
    }

    let bytes = response.bytes().await.map_err(muvi_gen::GenError::from)?;
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(target, &bytes).await?;
    debug!("downloaded {} ({} bytes)", target.display(), bytes.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_download_writes_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"artifact".to_vec()))
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("nested/dir/out.png");
        download_to(&reqwest::Client::new(), &server.uri(), &target)
            .await
            .unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"artifact");
    }

    #[tokio::test]
    async fn test_download_404_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let err = download_to(
            &reqwest::Client::new(),
            &server.uri(),
            &tmp.path().join("x.png"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::Backend(_)));
    }
}
