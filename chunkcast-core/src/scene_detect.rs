use crate::Encoder;
use crate::{ffmpeg, into_vec, progress_bar, Input, ScenecutMethod, Verbosity};
use av_scenechange::{detect_scene_changes, DetectionOptions, SceneDetectionSpeed};
use ffmpeg_next::format::Pixel;

use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Runs scene detection over the whole input and returns the split points
/// together with the total frame count discovered while decoding (the input's
/// frame count may not be known up front, e.g. for a VapourSynth script).
pub fn av_scenechange_detect(
  input: &Input,
  encoder: Encoder,
  total_frames: usize,
  min_scene_len: usize,
  verbosity: Verbosity,
  sc_pix_format: Option<Pixel>,
  sc_method: ScenecutMethod,
  sc_downscale_height: Option<usize>,
) -> anyhow::Result<(Vec<usize>, usize)> {
  if verbosity != Verbosity::Quiet {
    println!("Scene detection");
    progress_bar::init_progress_bar(total_frames as u64);
  }

  let frames_seen = Arc::new(AtomicUsize::new(0));
  let callback: Option<Box<dyn Fn(usize, usize)>> = if verbosity == Verbosity::Quiet {
    let frames_seen = Arc::clone(&frames_seen);
    Some(Box::new(move |frames, _keyframes| {
      frames_seen.store(frames, Ordering::Relaxed);
    }))
  } else {
    let frames_seen = Arc::clone(&frames_seen);
    Some(Box::new(move |frames, _keyframes| {
      frames_seen.store(frames, Ordering::Relaxed);
      progress_bar::set_pos(frames as u64);
    }))
  };

  let mut frames = scene_detect(
    input,
    encoder,
    callback,
    min_scene_len,
    sc_pix_format,
    sc_method,
    sc_downscale_height,
  )?;

  progress_bar::finish_progress_bar();

  if frames.first() == Some(&0) {
    // TODO refactor the chunk creation to not require this
    // Currently, this is required for compatibility with create_video_queue_vs
    frames.remove(0);
  }

  let total_frames = frames_seen.load(Ordering::Relaxed).max(total_frames);

  Ok((frames, total_frames))
}

/// Detect scene changes using rav1e scene detector.
pub fn scene_detect(
  input: &Input,
  encoder: Encoder,
  callback: Option<Box<dyn Fn(usize, usize)>>,
  min_scene_len: usize,
  sc_pix_format: Option<Pixel>,
  sc_method: ScenecutMethod,
  sc_downscale_height: Option<usize>,
) -> anyhow::Result<Vec<usize>> {
  let bit_depth;
  let filters: Vec<String> = match (sc_downscale_height, sc_pix_format) {
    (Some(sdh), Some(spf)) => into_vec![
      "-vf",
      format!(
        "format={},scale=-2:'min({},ih)'",
        spf.descriptor().map_or("yuv420p", |d| d.name()),
        sdh,
      )
    ],
    (Some(sdh), None) => into_vec!["-vf", format!("scale=-2:'min({},ih)'", sdh)],
    (None, Some(spf)) => into_vec!["-pix_fmt", spf.descriptor().map_or("yuv420p", |d| d.name())],
    (None, None) => Vec::new(),
  };
  let decoder = &mut y4m::Decoder::new(match input {
    Input::VapourSynth(path) => {
      bit_depth = crate::vapoursynth::bit_depth(path.as_ref())?;
      let vspipe = Command::new("vspipe")
        .arg("-y")
        .arg(path)
        .arg("-")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()?
        .stdout
        .unwrap();
      if filters.is_empty() {
        vspipe
      } else {
        Command::new("ffmpeg")
          .stdin(vspipe)
          .args(["-i", "pipe:", "-f", "yuv4mpegpipe", "-strict", "-1"])
          .args(filters)
          .arg("-")
          .stdout(Stdio::piped())
          .stderr(Stdio::null())
          .spawn()?
          .stdout
          .unwrap()
      }
    }
    Input::Video(path) => {
      let input_pix_format = ffmpeg::get_pixel_format(path.as_ref())
        .unwrap_or_else(|e| panic!("FFmpeg failed to get pixel format for input video: {:?}", e));
      bit_depth = encoder.get_format_bit_depth(sc_pix_format.unwrap_or(input_pix_format))?;
      Command::new("ffmpeg")
        .args(["-r", "1", "-i"])
        .arg(path)
        .args(filters)
        .args(["-f", "yuv4mpegpipe", "-strict", "-1", "-"])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()?
        .stdout
        .unwrap()
    }
  })?;

  let options = DetectionOptions {
    min_scenecut_distance: Some(min_scene_len),
    analysis_speed: match sc_method {
      ScenecutMethod::Fast => SceneDetectionSpeed::Fast,
      ScenecutMethod::Standard => SceneDetectionSpeed::Standard,
    },
    ..DetectionOptions::default()
  };
  Ok(if bit_depth > 8 {
    detect_scene_changes::<_, u16>(decoder, options, callback).scene_changes
  } else {
    detect_scene_changes::<_, u8>(decoder, options, callback).scene_changes
  })
}
