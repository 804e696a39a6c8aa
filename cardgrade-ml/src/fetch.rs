//! Image fetcher: downloads manifest images into grade-named folders.
//!
//! Each record contributes up to two files, one per [`Side`], at
//! `<output_dir>/<grade>/<id>_<side>_<basename>`. Existing files are never
//! re-fetched. Requests run one after another; a failed download is logged
//! and counted, never fatal.

use crate::error::Result;
use crate::manifest::{CardRecord, Side};
use cardgrade_core::FetcherConfig;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Final path segment of `url` as written, without query string, fragment
/// or `;params`. Percent escapes and non-ASCII characters are kept verbatim.
///
/// Strings without a `scheme://host` prefix are treated as bare paths.
pub fn safe_filename(url: &str) -> String {
    let url = url.split('#').next().unwrap_or_default();
    let url = url.split('?').next().unwrap_or_default();
    let base = url_path(url).rsplit('/').next().unwrap_or_default();
    base.split(';').next().unwrap_or_default().to_string()
}

/// Everything after `scheme:` and `//authority`, if present.
fn url_path(url: &str) -> &str {
    let rest = match url.split_once(':') {
        Some((scheme, rest)) if is_scheme(scheme) => rest,
        _ => url,
    };
    match rest.strip_prefix("//") {
        Some(authority) => authority.find('/').map_or("", |i| &authority[i..]),
        None => rest,
    }
}

fn is_scheme(s: &str) -> bool {
    let mut chars = s.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// `<id>_<side>_<basename>` for one image of `record`.
///
/// Two records sharing id, side and basename map to the same name; the
/// second one is then skipped as already present.
pub fn derive_filename(record: &CardRecord, side: Side, url: &str) -> String {
    format!("{}_{}_{}", record.id_label(), side, safe_filename(url))
}

/// Full destination path for one image of `record`.
pub fn destination(output_dir: &Path, record: &CardRecord, side: Side, url: &str) -> PathBuf {
    output_dir
        .join(record.grade_label())
        .join(derive_filename(record, side, url))
}

/// A download that did not produce a file.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedDownload {
    pub url: String,
    pub error: String,
}

/// Counters for one fetch run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchSummary {
    pub downloaded: usize,
    /// Destination already existed; no request made.
    pub skipped: usize,
    pub failed: Vec<FailedDownload>,
    pub bytes: u64,
}

impl fmt::Display for FetchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} downloaded ({} bytes), {} already present, {} failed",
            self.downloaded,
            self.bytes,
            self.skipped,
            self.failed.len()
        )
    }
}

/// Sequential HTTP downloader rooted at an output directory.
pub struct ImageFetcher {
    client: reqwest::Client,
    output_dir: PathBuf,
}

impl ImageFetcher {
    pub fn new(output_dir: impl Into<PathBuf>, config: &FetcherConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.as_str())
            .build()?;
        Ok(Self {
            client,
            output_dir: output_dir.into(),
        })
    }

    /// Ensure every non-empty image URL in `records` exists on disk.
    ///
    /// Only a failure to create a grade folder aborts the run.
    pub async fn fetch_all(&self, records: &[CardRecord]) -> Result<FetchSummary> {
        let mut summary = FetchSummary::default();

        for record in records {
            for side in Side::ALL {
                let Some(url) = record.image_url(side) else {
                    continue;
                };

                let out_path = destination(&self.output_dir, record, side, url);
                if let Some(folder) = out_path.parent() {
                    tokio::fs::create_dir_all(folder).await?;
                }

                if tokio::fs::try_exists(&out_path).await.unwrap_or(false) {
                    debug!(path = %out_path.display(), "Already present, skipping");
                    summary.skipped += 1;
                    continue;
                }

                info!("Downloading {} -> {}", url, out_path.display());
                match self.download(url, &out_path).await {
                    Ok(bytes) => {
                        summary.downloaded += 1;
                        summary.bytes += bytes;
                    }
                    Err(e) => {
                        warn!("Failed to download {}: {}", url, e);
                        summary.failed.push(FailedDownload {
                            url: url.to_string(),
                            error: e.to_string(),
                        });
                    }
                }
            }
        }

        Ok(summary)
    }

    /// GET `url` and write the full body to `out_path`.
    async fn download(&self, url: &str, out_path: &Path) -> Result<u64> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        let body = response.bytes().await?;
        tokio::fs::write(out_path, &body).await?;
        Ok(body.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::parse_manifest;
    use mockito::Matcher;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::fmt::MakeWriter;

    /// Collects formatted log lines for assertions.
    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl LogBuffer {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for LogBuffer {
        type Writer = LogBuffer;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn fetcher(dir: &Path) -> ImageFetcher {
        ImageFetcher::new(dir, &FetcherConfig::default()).unwrap()
    }

    #[test]
    fn test_safe_filename_strips_query() {
        assert_eq!(safe_filename("http://x/y/card.jpg?a=1"), "card.jpg");
        assert_eq!(safe_filename("https://i.ebayimg.com/images/g/abc/s-l1600.webp"), "s-l1600.webp");
        assert_eq!(safe_filename("http://x/y/card.jpg#frag"), "card.jpg");
    }

    #[test]
    fn test_safe_filename_without_basename() {
        assert_eq!(safe_filename("http://x"), "");
        assert_eq!(safe_filename("http://x/dir/"), "");
    }

    #[test]
    fn test_safe_filename_relative_fallback() {
        assert_eq!(safe_filename("images/front.png?size=large"), "front.png");
        assert_eq!(safe_filename("//cdn.example.com/a/back.png"), "back.png");
    }

    #[test]
    fn test_safe_filename_keeps_segment_as_written() {
        assert_eq!(safe_filename("http://x/y/my card.jpg"), "my card.jpg");
        assert_eq!(safe_filename("http://x/y/карта.jpg"), "карта.jpg");
        assert_eq!(safe_filename("http://x/y/my%20card.jpg"), "my%20card.jpg");
        assert_eq!(safe_filename("http://x/y/card.jpg;v=1"), "card.jpg");
        assert_eq!(safe_filename("http://x/a;b/card.jpg"), "card.jpg");
    }

    #[test]
    fn test_destination_matches_documented_example() {
        let records =
            parse_manifest(r#"[{"id":"42","grade":9,"imgUrlFront":"http://x/y/card.jpg?a=1"}]"#)
                .unwrap();
        let url = records[0].image_url(Side::Front).unwrap();
        let path = destination(Path::new("out"), &records[0], Side::Front, url);
        assert_eq!(path, Path::new("out").join("9").join("42_imgUrlFront_card.jpg"));
    }

    #[test]
    fn test_null_grade_and_id_render_as_none() {
        let records =
            parse_manifest(r#"[{"id":null,"grade":null,"imgUrlFront":"http://x/a.jpg"}]"#)
                .unwrap();
        let path = destination(Path::new("out"), &records[0], Side::Front, "http://x/a.jpg");
        assert_eq!(path, Path::new("out").join("None").join("None_imgUrlFront_a.jpg"));
    }

    #[test]
    fn test_same_id_side_and_basename_collide() {
        let records = parse_manifest(
            r#"[{"id":"1","grade":9,"imgUrlFront":"http://a/x/card.jpg"},
                {"id":"1","grade":9,"imgUrlFront":"http://b/y/card.jpg?v=2"}]"#,
        )
        .unwrap();
        let out = Path::new("out");
        let first = destination(out, &records[0], Side::Front, "http://a/x/card.jpg");
        let second = destination(out, &records[1], Side::Front, "http://b/y/card.jpg?v=2");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_fetch_writes_file_and_skips_on_rerun() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/y/card.jpg")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("front-bytes")
            .expect(1)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let records = parse_manifest(&format!(
            r#"[{{"id":"42","grade":9,"imgUrlFront":"{}/y/card.jpg?a=1"}}]"#,
            server.url()
        ))
        .unwrap();
        let fetcher = fetcher(dir.path());

        let first = fetcher.fetch_all(&records).await.unwrap();
        assert_eq!(first.downloaded, 1);
        assert_eq!(first.bytes, 11);
        let expected = dir.path().join("9").join("42_imgUrlFront_card.jpg");
        assert_eq!(std::fs::read(&expected).unwrap(), b"front-bytes");

        let second = fetcher.fetch_all(&records).await.unwrap();
        assert_eq!(second.downloaded, 0);
        assert_eq!(second.skipped, 1);

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_missing_grade_goes_to_unknown_folder() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/back.png")
            .with_status(200)
            .with_body("png")
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let records = parse_manifest(&format!(
            r#"[{{"id":"7","imgUrlBack":"{}/back.png"}}]"#,
            server.url()
        ))
        .unwrap();

        fetcher(dir.path()).fetch_all(&records).await.unwrap();
        assert!(dir.path().join("unknown").join("7_imgUrlBack_back.png").is_file());
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_the_run() {
        let mut server = mockito::Server::new_async().await;
        let _missing = server
            .mock("GET", "/missing.jpg")
            .with_status(404)
            .create_async()
            .await;
        let _ok = server
            .mock("GET", "/ok.jpg")
            .with_status(200)
            .with_body("ok")
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let base = server.url();
        let records = parse_manifest(&format!(
            r#"[{{"id":"1","grade":3,"imgUrlFront":"{base}/missing.jpg","imgUrlBack":"{base}/ok.jpg"}},
                {{"id":"2","grade":4,"imgUrlFront":"{base}/ok.jpg"}}]"#
        ))
        .unwrap();

        let summary = fetcher(dir.path()).fetch_all(&records).await.unwrap();
        assert_eq!(summary.downloaded, 2);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].url, format!("{base}/missing.jpg"));
        assert!(summary.failed[0].error.contains("404"));

        // Folder exists even though its front image failed.
        assert!(!dir.path().join("3").join("1_imgUrlFront_missing.jpg").exists());
        assert!(dir.path().join("3").join("1_imgUrlBack_ok.jpg").is_file());
        assert!(dir.path().join("4").join("2_imgUrlFront_ok.jpg").is_file());
    }

    #[tokio::test]
    async fn test_progress_and_failure_lines_are_logged() {
        let mut server = mockito::Server::new_async().await;
        let _missing = server
            .mock("GET", "/gone.jpg")
            .with_status(404)
            .create_async()
            .await;
        let _ok = server
            .mock("GET", "/ok.jpg")
            .with_status(200)
            .with_body("ok")
            .create_async()
            .await;

        let logs = LogBuffer::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let dir = tempfile::tempdir().unwrap();
        let base = server.url();
        let records = parse_manifest(&format!(
            r#"[{{"id":"1","grade":3,"imgUrlFront":"{base}/gone.jpg","imgUrlBack":"{base}/ok.jpg"}}]"#
        ))
        .unwrap();
        fetcher(dir.path()).fetch_all(&records).await.unwrap();

        let output = logs.contents();
        let front = dir.path().join("3").join("1_imgUrlFront_gone.jpg");
        let back = dir.path().join("3").join("1_imgUrlBack_ok.jpg");
        assert!(
            output.contains(&format!("Downloading {base}/gone.jpg -> {}", front.display())),
            "{output}"
        );
        assert!(
            output.contains(&format!("Downloading {base}/ok.jpg -> {}", back.display())),
            "{output}"
        );
        assert!(
            output.contains(&format!("Failed to download {base}/gone.jpg: ")),
            "{output}"
        );
        assert_eq!(output.matches("Failed to download").count(), 1);
    }

    #[tokio::test]
    async fn test_connection_error_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        // Port 9 (discard) on localhost is not expected to accept HTTP.
        let records =
            parse_manifest(r#"[{"id":"1","grade":5,"imgUrlFront":"http://127.0.0.1:9/a.jpg"}]"#)
                .unwrap();

        let summary = fetcher(dir.path()).fetch_all(&records).await.unwrap();
        assert_eq!(summary.downloaded, 0);
        assert_eq!(summary.failed.len(), 1);
        assert!(dir.path().join("5").is_dir());
    }

    #[tokio::test]
    async fn test_records_without_urls_create_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let records = parse_manifest(r#"[{"id":"1","grade":5,"imgUrlFront":""}]"#).unwrap();

        let summary = fetcher(dir.path()).fetch_all(&records).await.unwrap();
        assert_eq!(summary, FetchSummary::default());
        assert!(!dir.path().join("5").exists());
    }

    proptest! {
        #[test]
        fn prop_query_never_reaches_filename(
            base in "[a-z0-9_-]{1,16}\\.(jpg|png|webp)",
            query in "[a-z0-9=&]{0,24}",
        ) {
            let url = format!("https://img.example.com/cards/{base}?{query}");
            prop_assert_eq!(safe_filename(&url), base);
        }
    }
}
