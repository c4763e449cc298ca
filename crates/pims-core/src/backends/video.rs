use std::collections::{HashMap, VecDeque};
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::frame::{Frame, PixelData, PixelType};
use crate::reader::FramesSource;

/// Forward jumps longer than this restart the decoder instead of reading
/// through the skipped frames.
const MAX_FORWARD_SKIP: usize = 64;

/// Most recent ffmpeg stderr lines kept for error messages.
const STDERR_TAIL_LINES: usize = 32;
/// Longer stderr lines are split at this many bytes.
const STDERR_LINE_BYTES: u64 = 4096;

/// Locations of the ffmpeg executables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FfmpegConfig {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

/// Video metadata obtained by probing with ffprobe.
#[derive(Debug, Clone, PartialEq)]
struct ProbeResult {
    width: u32,
    height: u32,
    fps: f64,
    frame_count: usize,
}

fn run_ffprobe(config: &FfmpegConfig, path: &Path, extra: &[&str], entries: &str) -> Result<HashMap<String, String>> {
    let output = Command::new(&config.ffprobe)
        .args(["-v", "error", "-select_streams", "v:0"])
        .args(extra)
        .args(["-show_entries", entries, "-of", "default=noprint_wrappers=1"])
        .arg(path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| {
            Error::Ffmpeg(format!(
                "failed to run {}: {e}; is ffmpeg installed?",
                config.ffprobe.display()
            ))
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        error!(%stderr, ?path, "ffprobe failed");
        return Err(Error::Ffmpeg(format!("ffprobe failed: {}", stderr.trim())));
    }
    Ok(parse_key_values(&String::from_utf8_lossy(&output.stdout)))
}

fn probe(config: &FfmpegConfig, path: &Path) -> Result<ProbeResult> {
    info!(?path, "probing video metadata with ffprobe");

    let values = run_ffprobe(config, path, &[], "stream=width,height,r_frame_rate,nb_frames")?;
    let width = parse_field::<u32>(&values, "width")?;
    let height = parse_field::<u32>(&values, "height")?;
    let fps = values
        .get("r_frame_rate")
        .and_then(|rate| parse_frame_rate(rate))
        .unwrap_or(0.0);
    if fps <= 0.0 {
        warn!(?path, "video has no usable frame rate, timestamps will be 0.0");
    }

    let frame_count = match count_field(&values, "nb_frames") {
        Some(n) => n,
        None => {
            debug!(?path, "container has no frame count, counting packets");
            let packets = run_ffprobe(config, path, &["-count_packets"], "stream=nb_read_packets")?;
            count_field(&packets, "nb_read_packets")
                .ok_or_else(|| Error::Ffmpeg(format!("could not determine the frame count of {}", path.display())))?
        }
    };

    if width == 0 || height == 0 {
        return Err(Error::Ffmpeg(format!("invalid video dimensions: {width}x{height}")));
    }

    info!(width, height, fps, frame_count, "probe completed");
    Ok(ProbeResult {
        width,
        height,
        fps,
        frame_count,
    })
}

/// Parse ffprobe's `key=value` output, one pair per line.
fn parse_key_values(text: &str) -> HashMap<String, String> {
    text.lines()
        .filter_map(|line| line.trim().split_once('='))
        .map(|(k, v)| (k.trim().to_owned(), v.trim().to_owned()))
        .collect()
}

fn parse_field<T: std::str::FromStr>(values: &HashMap<String, String>, key: &str) -> Result<T> {
    values
        .get(key)
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| Error::Ffmpeg(format!("ffprobe did not report a valid {key}")))
}

/// A positive count, or `None` for `N/A`, missing or zero.
fn count_field(values: &HashMap<String, String>, key: &str) -> Option<usize> {
    values.get(key)?.parse().ok().filter(|&n| n > 0)
}

/// `"30000/1001"` or `"25"` to frames per second.
fn parse_frame_rate(text: &str) -> Option<f64> {
    let fps = match text.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den > 0.0 {
                num / den
            } else {
                0.0
            }
        }
        None => text.trim().parse().ok()?,
    };
    fps.is_finite().then_some(fps)
}

type StderrTail = Arc<Mutex<VecDeque<String>>>;

/// Read ffmpeg's stderr until it closes, keeping only the last lines.
/// ffmpeg would stall on a full stderr pipe otherwise.
fn drain_stderr(stderr: ChildStderr, tail: StderrTail) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut reader = BufReader::new(stderr);
        let mut line = Vec::new();
        loop {
            line.clear();
            match (&mut reader).take(STDERR_LINE_BYTES).read_until(b'\n', &mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&line).trim_end().to_owned();
                    if text.is_empty() {
                        continue;
                    }
                    let Ok(mut tail) = tail.lock() else { break };
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(text);
                }
            }
        }
    })
}

/// A running ffmpeg process and the index of the next frame it will emit.
struct Pipe {
    child: Child,
    next: usize,
    stderr_tail: StderrTail,
    stderr_reader: Option<JoinHandle<()>>,
}

impl Pipe {
    fn stdout(&mut self) -> Result<&mut ChildStdout> {
        self.child
            .stdout
            .as_mut()
            .ok_or_else(|| Error::Ffmpeg("ffmpeg stdout not available".to_owned()))
    }

    /// Stop the process and return the tail of its stderr.
    fn finish(&mut self) -> String {
        let _ = self.child.kill();
        let _ = self.child.wait();
        if let Some(reader) = self.stderr_reader.take() {
            let _ = reader.join();
        }
        self.stderr_tail
            .lock()
            .map(|tail| tail.iter().map(String::as_str).collect::<Vec<_>>().join("\n"))
            .unwrap_or_default()
    }

    fn stop(mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Decodes video frames by piping raw RGB24 data from the ffmpeg CLI.
pub struct VideoReader {
    path: PathBuf,
    config: FfmpegConfig,
    width: u32,
    height: u32,
    fps: f64,
    len: usize,
    frame_bytes: usize,
    pipe: Option<Pipe>,
}

impl VideoReader {
    pub fn open(path: &Path, config: &FfmpegConfig) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("video file does not exist: {}", path.display()),
            )));
        }

        let info = probe(config, path)?;
        let frame_bytes = (info.width as usize) * (info.height as usize) * 3;
        info!(
            ?path,
            width = info.width,
            height = info.height,
            fps = info.fps,
            frames = info.frame_count,
            frame_bytes,
            "video reader opened"
        );

        Ok(Self {
            path: path.to_path_buf(),
            config: config.clone(),
            width: info.width,
            height: info.height,
            fps: info.fps,
            len: info.frame_count,
            frame_bytes,
            pipe: None,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    fn spawn(&self, start: usize) -> Result<Pipe> {
        info!(path = ?self.path, start, "spawning ffmpeg decoder process");

        let mut cmd = Command::new(&self.config.ffmpeg);
        cmd.args(["-v", "error", "-i"]).arg(&self.path);
        if start > 0 {
            let select = format!("select=gte(n\\,{start})");
            cmd.args(["-vf", select.as_str(), "-fps_mode", "passthrough"]);
        }
        let mut child = cmd
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24", "pipe:1"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                Error::Ffmpeg(format!(
                    "failed to spawn {}: {e}; is ffmpeg installed?",
                    self.config.ffmpeg.display()
                ))
            })?;

        let stderr_tail = StderrTail::default();
        let stderr_reader = child
            .stderr
            .take()
            .map(|stderr| drain_stderr(stderr, Arc::clone(&stderr_tail)));
        Ok(Pipe {
            child,
            next: start,
            stderr_tail,
            stderr_reader,
        })
    }

    /// Position the pipe so that its next frame is `index`.
    fn seek(&mut self, index: usize) -> Result<&mut Pipe> {
        let reuse = matches!(
            &self.pipe,
            Some(pipe) if pipe.next <= index && index - pipe.next <= MAX_FORWARD_SKIP
        );
        if !reuse {
            if let Some(old) = self.pipe.take() {
                debug!(from = old.next, to = index, "restarting decoder");
                old.stop();
            }
            self.pipe = Some(self.spawn(index)?);
        }

        let frame_bytes = self.frame_bytes;
        let pipe = self
            .pipe
            .as_mut()
            .ok_or_else(|| Error::Ffmpeg("decoder is not running".to_owned()))?;
        let mut scratch = vec![0u8; frame_bytes];
        while pipe.next < index {
            if !read_exact_frame(pipe, &mut scratch)? {
                return Err(Error::Ffmpeg(format!(
                    "stream ended at frame {} while seeking to {index}",
                    pipe.next
                )));
            }
            pipe.next += 1;
        }
        Ok(pipe)
    }

    fn read_frame(&mut self, index: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.frame_bytes];
        let pipe = self.seek(index)?;
        if !read_exact_frame(pipe, &mut buf)? {
            let stderr = pipe.finish();
            return Err(Error::Ffmpeg(format!("no frame {index} in stream: {stderr}")));
        }
        pipe.next += 1;
        Ok(buf)
    }
}

/// Fill `buf` with one frame. `Ok(false)` on a clean end of stream.
fn read_exact_frame(pipe: &mut Pipe, buf: &mut [u8]) -> Result<bool> {
    let mut read = 0;
    while read < buf.len() {
        match pipe.stdout()?.read(&mut buf[read..]) {
            Ok(0) if read == 0 => return Ok(false),
            Ok(0) => {
                let stderr = pipe.finish();
                error!(
                    read_bytes = read,
                    expected_bytes = buf.len(),
                    frame = pipe.next,
                    %stderr,
                    "ffmpeg stream ended mid-frame"
                );
                return Err(Error::Ffmpeg(format!(
                    "stream ended mid-frame (read {read}/{} bytes): {stderr}",
                    buf.len()
                )));
            }
            Ok(n) => read += n,
            Err(e) => {
                error!(frame = pipe.next, %e, "failed to read from ffmpeg pipe");
                return Err(Error::Ffmpeg(format!("failed to read from ffmpeg pipe: {e}")));
            }
        }
    }
    Ok(true)
}

impl FramesSource for VideoReader {
    fn len(&self) -> usize {
        self.len
    }

    fn frame_shape(&self) -> Vec<usize> {
        vec![self.height as usize, self.width as usize, 3]
    }

    fn pixel_type(&self) -> PixelType {
        PixelType::U8
    }

    fn get_frame(&mut self, index: usize) -> Result<Frame> {
        if index >= self.len {
            return Err(Error::IndexOutOfRange {
                index: index as isize,
                len: self.len,
            });
        }

        let buf = match self.read_frame(index) {
            Ok(buf) => buf,
            Err(e) => {
                // the pipe position is unknown after a failure
                if let Some(pipe) = self.pipe.take() {
                    pipe.stop();
                }
                return Err(e);
            }
        };

        let timestamp_s = if self.fps > 0.0 {
            index as f64 / self.fps
        } else {
            0.0
        };
        debug!(frame = index, timestamp_s, "decoded frame");

        let mut frame = Frame::new(PixelData::U8(buf), self.frame_shape())?.with_frame_no(index);
        frame.insert_metadata("timestamp_s", timestamp_s);
        Ok(frame)
    }

    fn source_name(&self) -> String {
        self.path.display().to_string()
    }

    fn summary_lines(&self) -> Vec<(String, String)> {
        vec![("Frame Rate".to_owned(), format!("{:.3} fps", self.fps))]
    }

    fn close(&mut self) -> Result<()> {
        if let Some(pipe) = self.pipe.take() {
            info!(next_frame = pipe.next, "closing video decoder");
            pipe.stop();
        }
        Ok(())
    }
}

impl Drop for VideoReader {
    fn drop(&mut self) {
        if let Some(pipe) = self.pipe.take() {
            pipe.stop();
        }
    }
}
