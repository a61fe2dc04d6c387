use super::ffmpeg::{parse_progress_line, percent_complete};
use super::policy::{PolicyError, TranscodingPolicy};
use super::progress::ProgressHandle;
use super::scheduler::ClipProcessor;
use crate::infrastructure::storage::{BlobKey, BlobStore, MANIFEST, RAW, StorageError, THUMBNAIL};
use crate::modules::clip::model::Clip;
use crate::modules::clip::repository::{ClipStore, RepositoryError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, error, info, warn};
use url::Url;

/// Lines of ffmpeg diagnostics kept for the failure log.
const TAIL_LINES: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("thumbnail extraction exited with {status}: {stderr}")]
    Thumbnail { status: ExitStatus, stderr: String },
    #[error("probing the source failed: {0}")]
    Probe(#[from] PolicyError),
    #[error("DASH packaging exited with {status}: {tail}")]
    Package { status: ExitStatus, tail: String },
    #[error("invalid blob url: {0}")]
    Url(#[from] url::ParseError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Runs the thumbnail and DASH stages for one clip against the blob proxy and
/// finalizes the clip once packaging succeeds.
pub struct Transcoder {
    clips: Arc<dyn ClipStore>,
    blobs: Arc<dyn BlobStore>,
    policy: TranscodingPolicy,
    ffmpeg: String,
    blob_base: Url,
}

impl Transcoder {
    /// `blob_base` must end with `/`, e.g. `http://127.0.0.1:12786/s3/`.
    pub fn new(
        clips: Arc<dyn ClipStore>,
        blobs: Arc<dyn BlobStore>,
        policy: TranscodingPolicy,
        ffmpeg: impl Into<String>,
        blob_base: Url,
    ) -> Self {
        Self {
            clips,
            blobs,
            policy,
            ffmpeg: ffmpeg.into(),
            blob_base,
        }
    }

    fn blob_url(&self, clip_id: i64, name: &str) -> Result<Url, url::ParseError> {
        self.blob_base.join(&format!("{clip_id}/{name}"))
    }

    fn spawn_error(&self, source: std::io::Error) -> ProcessError {
        ProcessError::Spawn {
            program: self.ffmpeg.clone(),
            source,
        }
    }

    async fn extract_thumbnail(&self, clip_id: i64, source: &Url) -> Result<(), ProcessError> {
        let target = self.blob_url(clip_id, THUMBNAIL)?;

        let output = Command::new(&self.ffmpeg)
            .args(self.policy.thumbnail_args(source, &target))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let lines: Vec<&str> = stderr.lines().collect();
            let tail = lines[lines.len().saturating_sub(TAIL_LINES)..].join("\n");
            return Err(ProcessError::Thumbnail {
                status: output.status,
                stderr: tail,
            });
        }

        debug!(clip_id, "Thumbnail extracted");
        Ok(())
    }

    async fn package(
        &self,
        args: Vec<String>,
        duration: f64,
        progress: &ProgressHandle,
    ) -> Result<(), ProcessError> {
        let mut child = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let Some(stderr) = child.stderr.take() else {
            return Err(self.spawn_error(std::io::Error::other("stderr was not captured")));
        };

        // Both halves live in this future so nothing publishes after it returns.
        let (status, tail) = tokio::join!(
            child.wait(),
            report_progress(stderr, duration, progress.clone())
        );

        let status = status.map_err(|e| self.spawn_error(e))?;
        if !status.success() {
            return Err(ProcessError::Package {
                status,
                tail: tail.join("\n"),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl ClipProcessor for Transcoder {
    async fn process(&self, clip: &Clip, progress: ProgressHandle) -> Result<(), ProcessError> {
        info!(clip_id = clip.id, "Transcoding clip");

        let source = self.blob_url(clip.id, RAW)?;
        self.extract_thumbnail(clip.id, &source).await?;

        let stats = self.policy.probe(&source).await?;
        debug!(clip_id = clip.id, ?stats, "Probed source");

        let manifest = self.blob_url(clip.id, MANIFEST)?;
        let args = self.policy.dash_args(&source, &stats, &manifest);
        self.package(args, stats.duration, &progress).await?;

        info!(clip_id = clip.id, "Finished transcoding clip");

        self.blobs.delete(&BlobKey::raw(clip.id)).await?;
        self.clips.set_processing(clip.id, false).await?;
        progress.clear();

        Ok(())
    }
}

/// Publishes the percentage of `total` seconds reached by each stats line of
/// `stream` until it closes. A malformed time stops publishing but the stream
/// is still drained. Returns the last lines read.
pub async fn report_progress<R>(stream: R, total: f64, progress: ProgressHandle) -> Vec<String>
where
    R: AsyncRead + Unpin,
{
    progress.report(0);

    let mut tail: VecDeque<String> = VecDeque::with_capacity(TAIL_LINES);
    let mut publishing = true;
    // ffmpeg ends stats lines with '\r' and everything else with '\n'.
    let mut segments = BufReader::new(stream).split(b'\r');

    loop {
        let segment = match segments.next_segment().await {
            Ok(Some(segment)) => segment,
            Ok(None) => break,
            Err(e) => {
                warn!(clip_id = progress.clip_id(), error = %e, "Failed to read ffmpeg output");
                break;
            }
        };

        for raw in segment.split(|b| *b == b'\n') {
            let line = String::from_utf8_lossy(raw);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if publishing {
                match parse_progress_line(line) {
                    Some(Ok(elapsed)) => {
                        if let Some(percent) = percent_complete(elapsed, total) {
                            progress.report(percent);
                        }
                    }
                    Some(Err(e)) => {
                        error!(
                            clip_id = progress.clip_id(),
                            error = %e,
                            line,
                            "Failed to parse ffmpeg progress, no further progress will be reported"
                        );
                        publishing = false;
                    }
                    None => {}
                }
            }

            if tail.len() == TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line.to_string());
        }
    }

    tail.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryBlobStore, MemoryClipStore};
    use crate::workers::progress::ProgressTracker;

    struct Observed {
        tracker: Arc<ProgressTracker>,
        handle: ProgressHandle,
    }

    fn observed(clip_id: i64) -> Observed {
        let tracker = Arc::new(ProgressTracker::new(4));
        let handle = ProgressHandle::new(Arc::clone(&tracker), clip_id);
        Observed { tracker, handle }
    }

    #[tokio::test]
    async fn reports_percent_from_carriage_return_separated_stats() {
        let out = observed(3);
        let stderr = b"Input #0, mov, from 'raw':\n  Duration: 00:00:10.00\n\
            frame=1 size=1kB time=00:00:02.50 bitrate=1k\r\
            frame=2 size=2kB time=00:00:05.00 bitrate=1k\r\
            frame=3 size=3kB time=00:00:07.49 bitrate=1k\r"
            .as_slice();

        let tail = report_progress(stderr, 10.0, out.handle.clone()).await;

        assert_eq!(out.tracker.get(3), Some(75));
        assert_eq!(tail.len(), 5);
        assert!(tail[0].starts_with("Input #0"));
    }

    #[tokio::test]
    async fn parse_failure_stops_publishing_but_drains_the_stream() {
        let out = observed(4);
        let stderr = b"frame=1 time=00:00:02.00 bitrate=1k\r\
            frame=2 time=00:02.00 bitrate=1k\r\
            frame=3 time=00:00:09.00 bitrate=1k\r\
            last line\n"
            .as_slice();

        let tail = report_progress(stderr, 10.0, out.handle.clone()).await;

        assert_eq!(out.tracker.get(4), Some(20));
        assert_eq!(tail.last().map(String::as_str), Some("last line"));
    }

    #[tokio::test]
    async fn overflowing_hours_stop_publishing_without_panicking() {
        let out = observed(7);
        let stderr = b"frame=1 time=00:00:03.00 bitrate=1k\r\
            frame=2 time=6000000000000000000:00:00.00 bitrate=1k\r\
            frame=3 time=00:00:09.00 bitrate=1k\r\
            done\n"
            .as_slice();

        let tail = report_progress(stderr, 10.0, out.handle.clone()).await;

        assert_eq!(out.tracker.get(7), Some(30));
        assert_eq!(tail.last().map(String::as_str), Some("done"));
    }

    #[tokio::test]
    async fn placeholder_times_are_skipped() {
        let out = observed(5);
        let stderr = b"frame=0 time=N/A bitrate=N/A\rframe=9 time=00:00:01.00 bitrate=1k\r".as_slice();

        report_progress(stderr, 4.0, out.handle.clone()).await;
        assert_eq!(out.tracker.get(5), Some(25));
    }

    #[tokio::test]
    async fn unknown_duration_reports_zero() {
        let out = observed(6);
        let stderr = b"frame=9 time=00:00:01.00 bitrate=1k\r".as_slice();

        report_progress(stderr, 0.0, out.handle.clone()).await;
        assert_eq!(out.tracker.get(6), Some(0));
    }

    fn transcoder(
        clips: Arc<MemoryClipStore>,
        blobs: Arc<MemoryBlobStore>,
        ffmpeg: &str,
        ffprobe: &str,
    ) -> Transcoder {
        Transcoder::new(
            clips,
            blobs,
            TranscodingPolicy::new(ffprobe),
            ffmpeg,
            Url::parse("http://127.0.0.1:12786/s3/").unwrap(),
        )
    }

    #[test]
    fn blob_urls_are_scoped_by_clip() {
        let t = transcoder(Arc::default(), Arc::default(), "ffmpeg", "ffprobe");
        assert_eq!(
            t.blob_url(12, MANIFEST).unwrap().as_str(),
            "http://127.0.0.1:12786/s3/12/dash.mpd"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_thumbnail_leaves_clip_for_recovery() {
        let clips = Arc::new(MemoryClipStore::default());
        let blobs = Arc::new(MemoryBlobStore::default());
        let clip = clips.seed(1, "broken", true);
        blobs.insert(BlobKey::raw(clip.id), b"not a video".to_vec());

        let t = transcoder(Arc::clone(&clips), Arc::clone(&blobs), "false", "false");
        let out = observed(clip.id);

        let err = t.process(&clip, out.handle.clone()).await.unwrap_err();

        assert!(matches!(err, ProcessError::Thumbnail { .. }));
        assert!(blobs.contains(&BlobKey::raw(clip.id)));
        assert!(clips.row(clip.id).unwrap().processing);
    }

    #[tokio::test]
    async fn missing_tool_is_a_spawn_error() {
        let clips = Arc::new(MemoryClipStore::default());
        let clip = clips.seed(1, "c", true);
        let t = transcoder(
            Arc::clone(&clips),
            Arc::default(),
            "/nonexistent/ffmpeg-for-tests",
            "ffprobe",
        );

        let err = t.process(&clip, observed(clip.id).handle).await.unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn successful_run_finalizes_the_clip() {
        use std::os::unix::fs::PermissionsExt;

        // Stands in for both ffmpeg and ffprobe.
        let script = r#"#!/bin/sh
case "$*" in
  *-show_streams*)
    printf '%s' '{"streams":[{"codec_type":"video","width":1280,"height":720,"r_frame_rate":"30/1"}],"format":{"duration":"10.0"}}'
    ;;
  *-f\ dash*)
    printf 'frame=1 time=00:00:05.00 bitrate=1k\r' >&2
    printf 'frame=2 time=00:00:10.00 bitrate=1k\r' >&2
    ;;
esac
exit 0
"#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake-ffmpeg");
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        let tool = path.to_str().unwrap();

        let clips = Arc::new(MemoryClipStore::default());
        let blobs = Arc::new(MemoryBlobStore::default());
        let clip = clips.seed(1, "fine", true);
        blobs.insert(BlobKey::raw(clip.id), b"video".to_vec());

        let t = transcoder(Arc::clone(&clips), Arc::clone(&blobs), tool, tool);
        let out = observed(clip.id);

        t.process(&clip, out.handle.clone()).await.unwrap();

        assert_eq!(out.tracker.get(clip.id), None);
        assert!(!blobs.contains(&BlobKey::raw(clip.id)));
        assert!(!clips.row(clip.id).unwrap().processing);
    }
}
