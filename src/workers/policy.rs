use serde::Deserialize;
use std::process::Stdio;
use tokio::process::Command;
use url::Url;

const DEFAULT_FPS: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rendition {
    /// Lines on the short side of the frame (720 for 1280x720 and 720x1280).
    pub lines: u32,
    pub video_kbps: u32,
}

const LADDER: [Rendition; 6] = [
    Rendition { lines: 2160, video_kbps: 16_000 },
    Rendition { lines: 1440, video_kbps: 10_000 },
    Rendition { lines: 1080, video_kbps: 5_000 },
    Rendition { lines: 720, video_kbps: 2_800 },
    Rendition { lines: 480, video_kbps: 1_400 },
    Rendition { lines: 360, video_kbps: 800 },
];

#[derive(Debug, Clone, PartialEq)]
pub struct VideoStats {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Seconds.
    pub duration: f64,
    pub audio_streams: usize,
}

impl VideoStats {
    fn is_portrait(&self) -> bool {
        self.height > self.width
    }

    fn short_side(&self) -> u32 {
        self.width.min(self.height)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("failed to run ffprobe: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("ffprobe exited with {status}: {stderr}")]
    Failed {
        status: std::process::ExitStatus,
        stderr: String,
    },
    #[error("unreadable ffprobe output: {0}")]
    Output(#[from] serde_json::Error),
    #[error("source has no video stream")]
    NoVideo,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// `"30000/1001"` → 30.
fn parse_frame_rate(rate: &str) -> Option<u32> {
    let (num, den) = rate.split_once('/').unwrap_or((rate, "1"));
    let num: f64 = num.trim().parse().ok()?;
    let den: f64 = den.trim().parse().ok()?;
    if den <= 0.0 || num <= 0.0 {
        return None;
    }
    Some((num / den).round() as u32)
}

pub fn parse_probe(json: &[u8]) -> Result<VideoStats, PolicyError> {
    let output: ProbeOutput = serde_json::from_slice(json)?;

    let video = output
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or(PolicyError::NoVideo)?;

    let audio_streams = output
        .streams
        .iter()
        .filter(|s| s.codec_type.as_deref() == Some("audio"))
        .count();

    let duration = output
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .or(video.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
        .unwrap_or(0.0);

    Ok(VideoStats {
        width: video.width.unwrap_or(0),
        height: video.height.unwrap_or(0),
        fps: video
            .r_frame_rate
            .as_deref()
            .and_then(parse_frame_rate)
            .unwrap_or(DEFAULT_FPS),
        duration,
        audio_streams,
    })
}

/// Chooses output resolutions and builds the two ffmpeg invocations.
#[derive(Debug, Clone)]
pub struct TranscodingPolicy {
    ffprobe: String,
}

impl TranscodingPolicy {
    pub fn new(ffprobe: impl Into<String>) -> Self {
        Self {
            ffprobe: ffprobe.into(),
        }
    }

    pub async fn probe(&self, source: &Url) -> Result<VideoStats, PolicyError> {
        let output = Command::new(&self.ffprobe)
            .args(["-v", "error", "-print_format", "json", "-show_streams", "-show_format"])
            .arg(source.as_str())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(PolicyError::Failed {
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_probe(&output.stdout)
    }

    /// Rungs no taller than the source; the smallest rung is always kept.
    pub fn renditions(&self, stats: &VideoStats) -> Vec<Rendition> {
        let short_side = stats.short_side();
        let mut selected: Vec<Rendition> = LADDER
            .iter()
            .copied()
            .filter(|r| r.lines <= short_side)
            .collect();

        if selected.is_empty() {
            selected.push(LADDER[LADDER.len() - 1]);
        }
        selected
    }

    pub fn thumbnail_args(&self, source: &Url, target: &Url) -> Vec<String> {
        [
            "-hide_banner",
            "-i",
            source.as_str(),
            "-ss",
            "00:00:01",
            "-s",
            "1280x720",
            "-qscale:v",
            "5",
            "-frames:v",
            "1",
            "-method",
            "PUT",
            "-f",
            "image2",
            target.as_str(),
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }

    pub fn dash_args(&self, source: &Url, stats: &VideoStats, manifest: &Url) -> Vec<String> {
        let fps = (if stats.fps == 0 { DEFAULT_FPS } else { stats.fps }).to_string();

        let mut args: Vec<String> = [
            "-hide_banner",
            "-i",
            source.as_str(),
            "-preset",
            "medium",
            "-tune",
            "film",
            "-c:v",
            "libx264",
            "-pix_fmt",
            "yuv420p",
            "-x264opts",
            "no-scenecut",
            "-keyint_min",
            fps.as_str(),
            "-g",
            fps.as_str(),
            "-sc_threshold",
            "0",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        for (index, rendition) in self.renditions(stats).iter().enumerate() {
            let scale = if stats.is_portrait() {
                format!("scale={}:-2", rendition.lines)
            } else {
                format!("scale=-2:{}", rendition.lines)
            };
            let kbps = rendition.video_kbps;
            args.extend([
                "-map".to_string(),
                "0:v:0".to_string(),
                format!("-filter:v:{index}"),
                scale,
                format!("-b:v:{index}"),
                format!("{kbps}k"),
                format!("-maxrate:v:{index}"),
                format!("{}k", kbps * 3 / 2),
                format!("-bufsize:v:{index}"),
                format!("{}k", kbps * 2),
            ]);
        }

        match stats.audio_streams {
            0 => {}
            1 => args.extend(["-map".to_string(), "0:a:0".to_string()]),
            n => args.extend([
                "-filter_complex".to_string(),
                format!("[0:a]amerge=inputs={n}[merged]"),
                "-map".to_string(),
                "[merged]".to_string(),
            ]),
        }

        if stats.audio_streams > 0 {
            args.extend(
                ["-c:a", "aac", "-b:a", "128k", "-ac", "1", "-ar", "48000"].map(String::from),
            );
        }

        let adaptation_sets = if stats.audio_streams > 0 {
            "id=0,streams=v id=1,streams=a"
        } else {
            "id=0,streams=v"
        };

        args.extend(
            [
                "-seg_duration",
                "1",
                "-use_template",
                "1",
                "-use_timeline",
                "1",
                "-single_file",
                "1",
                "-streaming",
                "0",
                "-adaptation_sets",
                adaptation_sets,
                "-method",
                "PUT",
                "-f",
                "dash",
                manifest.as_str(),
            ]
            .map(String::from),
        );

        args
    }
}
