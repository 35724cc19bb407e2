#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

#[macro_use]
extern crate tracing;

use std::collections::HashMap;
use std::fs::File;
use std::hash::{Hash, Hasher};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use once_cell::sync::OnceCell;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use sysinfo::SystemExt;

pub mod aom_kf;
pub mod broker;
pub mod chunk;
pub mod concat;
pub mod encoder;
pub mod ffmpeg;
pub mod file_validation;
pub mod logging;
pub mod parse;
pub mod progress_bar;
pub mod scene_detect;
pub mod scenes;
pub mod settings;
pub mod split;
pub mod target_quality;
#[macro_use]
pub mod util;
pub mod vapoursynth;
pub mod vmaf;

pub use broker::{Broker, EncoderCrash};
pub use chunk::Chunk;
pub use concat::ConcatMethod;
pub use encoder::Encoder;
pub use target_quality::TargetQuality;

/// The source of the frames that are fed to the encoder for a given chunk queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Input {
  Video(PathBuf),
  VapourSynth(PathBuf),
}

impl Input {
  pub fn as_path(&self) -> &Path {
    match self {
      Input::Video(path) | Input::VapourSynth(path) => path.as_path(),
    }
  }

  pub const fn is_vapoursynth(&self) -> bool {
    matches!(self, Input::VapourSynth(_))
  }

  pub const fn is_video(&self) -> bool {
    matches!(self, Input::Video(_))
  }

  /// Returns the frame rate of the input, probed via FFmpeg or VapourSynth
  /// depending on the kind of input.
  pub fn frame_rate(&self) -> f64 {
    match self {
      Input::Video(path) => ffmpeg::frame_rate(path).unwrap_or(24.0),
      Input::VapourSynth(path) => vapoursynth::frame_rate(path).unwrap_or(24.0),
    }
  }

  /// Returns the total frame count of the input, probed via FFmpeg or
  /// VapourSynth depending on the kind of input.
  pub fn frames(&self) -> anyhow::Result<usize> {
    match self {
      Input::Video(path) => ffmpeg::num_frames(path),
      Input::VapourSynth(path) => vapoursynth::num_frames(path),
    }
  }
}

impl From<&Path> for Input {
  fn from(path: &Path) -> Self {
    if is_vapoursynth(path) {
      Input::VapourSynth(path.to_path_buf())
    } else {
      Input::Video(path.to_path_buf())
    }
  }
}

/// Returns true if the input path looks like a VapourSynth script.
pub fn is_vapoursynth(path: &Path) -> bool {
  matches!(
    path.extension().and_then(std::ffi::OsStr::to_str),
    Some("vpy" | "py")
  )
}

/// How much progress output should be printed to the terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verbosity {
  Quiet,
  Normal,
  Verbose,
}

/// The algorithm used to decide where scenecuts occur.
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumString, Display)]
pub enum ScenecutMethod {
  #[strum(serialize = "fast")]
  Fast,
  #[strum(serialize = "standard")]
  Standard,
}

/// How a chunk queue is built from the scenecut list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumString, Display)]
pub enum SplitMethod {
  #[strum(serialize = "av-scenechange")]
  AvScenechange,
  #[strum(serialize = "firstpass-keyframes")]
  FirstpassKeyframes,
  #[strum(serialize = "none")]
  None,
}

/// The method used to pipe an exact range of frames to the encoder for a chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumString, Display)]
pub enum ChunkMethod {
  #[strum(serialize = "segment")]
  Segment,
  #[strum(serialize = "select")]
  Select,
  #[strum(serialize = "ffms2")]
  FFMS2,
  #[strum(serialize = "lsmash")]
  LSMASH,
  #[strum(serialize = "hybrid")]
  Hybrid,
}

/// The persisted resume state for a run, serialized to `done.json`.
///
/// All reads and read-modify-writes go through [`get_done`]/[`init_done`], which
/// serialize access through a single process-wide mutex rather than per-key locking,
/// so that "is this chunk already done" and "mark this chunk done" are never interleaved
/// across worker threads.
#[derive(Serialize, Deserialize)]
pub struct DoneJson {
  pub frame_rate: f64,
  pub done: HashMap<String, usize>,
  pub audio_done: AtomicBool,
}

static DONE_JSON: OnceCell<Mutex<DoneJson>> = OnceCell::new();

/// Locks and returns the global resume state. Panics if [`init_done`] has not been called yet.
pub fn get_done() -> MutexGuard<'static, DoneJson> {
  DONE_JSON
    .get()
    .expect("done.json state was read before being initialized")
    .lock()
}

/// Initializes the global resume state exactly once, then locks and returns it.
pub fn init_done(done: DoneJson) -> MutexGuard<'static, DoneJson> {
  DONE_JSON.get_or_init(|| Mutex::new(done)).lock()
}

/// Loads the chunk queue (written by the splitter) from `chunks.json`.
pub fn read_chunk_queue(temp: &Path) -> anyhow::Result<Vec<Chunk>> {
  let file = Path::new(temp).join("chunks.json");
  let contents = std::fs::read(file)?;
  Ok(serde_json::from_slice(&contents)?)
}

/// Persists the chunk queue (so a later `--resume` run can reload it) to `chunks.json`.
pub fn save_chunk_queue(temp: &str, chunk_queue: &[Chunk]) -> anyhow::Result<()> {
  let file = Path::new(temp).join("chunks.json");
  let mut file = File::create(file)?;
  file.write_all(serde_json::to_string_pretty(&chunk_queue)?.as_bytes())?;
  Ok(())
}

/// Derives the default temporary-directory name from the input path, so re-running on
/// the same input reuses (and can resume) the same directory.
pub fn hash_path(path: &Path) -> String {
  let mut hasher = std::collections::hash_map::DefaultHasher::new();
  path.hash(&mut hasher);
  format!("{:x}", hasher.finish())[..8].to_string()
}

/// Determines the optimal number of worker processes to run concurrently for a
/// given encoder, based on available CPU cores and system memory.
pub fn determine_workers(encoder: Encoder) -> u64 {
  let mut system = sysinfo::System::new();
  system.refresh_memory();

  let cpu = num_cpus::get() as u64;
  let ram_gb = system.total_memory() / 10_u64.pow(6);

  std::cmp::max(
    match encoder {
      Encoder::aom | Encoder::rav1e | Encoder::vpx => std::cmp::min(
        (cpu as f64 / 3.0).round() as u64,
        (ram_gb as f64 / 1.5).round() as u64,
      ),
      Encoder::svt_av1 | Encoder::svt_vp9 | Encoder::x264 | Encoder::x265 | Encoder::vvc => {
        std::cmp::min(cpu, ram_gb) / 8
      }
    },
    1,
  )
}
