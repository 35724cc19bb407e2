use std::fs;
use std::path::Path;
use std::process::{Command, Stdio};

use anyhow::{ensure, Context};

use crate::Input;

/// One 208-byte record from aomenc's first-pass statistics file.
/// Field names and order are copied verbatim from `av1/encoder/firstpass.h`.
#[derive(Debug, Clone, Copy, Default)]
struct FirstPassStats {
  frame: f64,
  weight: f64,
  intra_error: f64,
  frame_avg_wavelet_energy: f64,
  coded_error: f64,
  sr_coded_error: f64,
  tr_coded_error: f64,
  pcnt_inter: f64,
  pcnt_motion: f64,
  pcnt_second_ref: f64,
  pcnt_third_ref: f64,
  pcnt_neutral: f64,
  intra_skip_pct: f64,
  inactive_zone_rows: f64,
  inactive_zone_cols: f64,
  mvr: f64,
  mvr_abs: f64,
  mvc: f64,
  mvc_abs: f64,
  mvrv: f64,
  mvcv: f64,
  mv_in_out_count: f64,
  new_mv_count: f64,
  duration: f64,
  count: f64,
  raw_error_stdev: f64,
}

const RECORD_LEN: usize = 208;
const NUM_FIELDS: usize = 26;

fn parse_record(buf: &[u8; RECORD_LEN]) -> FirstPassStats {
  let mut doubles = [0.0_f64; NUM_FIELDS];
  for (i, chunk) in buf.chunks_exact(8).enumerate() {
    doubles[i] = f64::from_le_bytes(chunk.try_into().unwrap());
  }

  FirstPassStats {
    frame: doubles[0],
    weight: doubles[1],
    intra_error: doubles[2],
    frame_avg_wavelet_energy: doubles[3],
    coded_error: doubles[4],
    sr_coded_error: doubles[5],
    tr_coded_error: doubles[6],
    pcnt_inter: doubles[7],
    pcnt_motion: doubles[8],
    pcnt_second_ref: doubles[9],
    pcnt_third_ref: doubles[10],
    pcnt_neutral: doubles[11],
    intra_skip_pct: doubles[12],
    inactive_zone_rows: doubles[13],
    inactive_zone_cols: doubles[14],
    mvr: doubles[15],
    mvr_abs: doubles[16],
    mvc: doubles[17],
    mvc_abs: doubles[18],
    mvrv: doubles[19],
    mvcv: doubles[20],
    mv_in_out_count: doubles[21],
    new_mv_count: doubles[22],
    duration: doubles[23],
    count: doubles[24],
    raw_error_stdev: doubles[25],
  }
}

fn parse_stats_file(path: &Path) -> anyhow::Result<Vec<FirstPassStats>> {
  let bytes = fs::read(path)?;

  Ok(
    bytes
      .chunks_exact(RECORD_LEN)
      .map(|chunk| parse_record(chunk.try_into().unwrap()))
      .collect(),
  )
}

/// Sign-preserving bias applied before any division, matching aomenc's
/// `DOUBLE_DIVIDE_CHECK` so a near-zero denominator doesn't blow up the ratio.
fn double_divide_check(x: f64) -> f64 {
  if x < 0.0 {
    x - 0.000_001
  } else {
    x + 0.000_001
  }
}

fn second_ref_usage_thresh(frame_count_so_far: usize) -> f64 {
  const ADAPT_UPTO: usize = 32;
  const MIN_THRESH: f64 = 0.085;
  const MAX_DELTA: f64 = 0.035;

  if frame_count_so_far >= ADAPT_UPTO {
    MIN_THRESH + MAX_DELTA
  } else {
    MIN_THRESH + (frame_count_so_far as f64 / (ADAPT_UPTO - 1) as f64) * MAX_DELTA
  }
}

fn test_candidate_kf(stats: &[FirstPassStats], i: usize, frame_count_so_far: usize) -> bool {
  const BOOST_FACTOR: f64 = 12.5;
  const MIN_INTRA_LEVEL: f64 = 0.25;
  const INTRA_VS_INTER_THRESH: f64 = 2.0;
  const VERY_LOW_INTER_THRESH: f64 = 0.05;
  const KF_II_ERR_THRESHOLD: f64 = 2.5;
  const ERR_CHANGE_THRESHOLD: f64 = 0.4;
  const II_IMPROVEMENT_THRESHOLD: f64 = 3.5;
  const KF_II_MAX: f64 = 128.0;

  let p = &stats[i - 1];
  let c = &stats[i];
  let f = &stats[i + 1];

  let pcnt_intra = 1.0 - c.pcnt_inter;
  let modified_pcnt_inter = c.pcnt_inter - c.pcnt_neutral;
  let thresh = second_ref_usage_thresh(frame_count_so_far);

  let is_candidate = c.pcnt_second_ref < thresh
    && f.pcnt_second_ref < thresh
    && (c.pcnt_inter < VERY_LOW_INTER_THRESH
      || (pcnt_intra > MIN_INTRA_LEVEL
        && pcnt_intra > INTRA_VS_INTER_THRESH * modified_pcnt_inter
        && (c.intra_error / double_divide_check(c.coded_error)) < KF_II_ERR_THRESHOLD
        && ((p.coded_error - c.coded_error).abs() / double_divide_check(c.coded_error)
          > ERR_CHANGE_THRESHOLD
          || (p.intra_error - c.intra_error).abs() / double_divide_check(c.intra_error)
            > ERR_CHANGE_THRESHOLD
          || (f.intra_error / double_divide_check(f.coded_error)) > II_IMPROVEMENT_THRESHOLD)));

  if !is_candidate {
    return false;
  }

  let mut boost_score = 0.0_f64;
  let mut old_boost_score;
  let mut decay_accumulator = 1.0_f64;
  let mut last_loop_index = 0;

  for loop_index in 0..16 {
    old_boost_score = boost_score;
    let lnf = &stats[i + 1 + loop_index];

    let next_ratio = (BOOST_FACTOR * lnf.intra_error / double_divide_check(lnf.coded_error))
      .min(KF_II_MAX);

    decay_accumulator *= if lnf.pcnt_inter > 0.85 {
      lnf.pcnt_inter
    } else {
      (0.85 + lnf.pcnt_inter) / 2.0
    };

    boost_score += decay_accumulator * next_ratio;
    last_loop_index = loop_index;

    if lnf.pcnt_inter < 0.05
      || next_ratio < 1.5
      || (lnf.pcnt_inter - lnf.pcnt_neutral < 0.20 && next_ratio < 3.0)
      || boost_score - old_boost_score < 3.0
      || lnf.intra_error < 200.0
    {
      break;
    }
  }

  boost_score > 30.0 && last_loop_index > 3
}

fn spawn_source_pipe(input: &Input) -> anyhow::Result<Stdio> {
  let child = match input {
    Input::VapourSynth(path) => Command::new("vspipe")
      .arg("-y")
      .arg(path)
      .arg("-")
      .stdout(Stdio::piped())
      .stderr(Stdio::null())
      .spawn()?,
    Input::Video(path) => Command::new("ffmpeg")
      .args(["-y", "-hide_banner", "-loglevel", "error", "-i"])
      .arg(path)
      .args(["-f", "yuv4mpegpipe", "-strict", "-1", "-"])
      .stdout(Stdio::piped())
      .stderr(Stdio::null())
      .spawn()?,
  };

  Ok(Stdio::from(child.stdout.unwrap()))
}

/// Runs an aomenc first-pass encode over the whole input and scans the
/// resulting statistics file for the keyframes aomenc would place, without
/// running the (much slower) real pass-2 encode.
pub fn aom_keyframes(
  input: &Input,
  temp: &str,
  min_scene_len: usize,
  video_params: &[String],
) -> anyhow::Result<Vec<usize>> {
  let stat_file = Path::new(temp).join("split").join("keyframes.stat");

  let source = spawn_source_pipe(input)?;

  let status = Command::new("aomenc")
    .stdin(source)
    .args(["--passes=2", "--pass=1"])
    .args(video_params)
    .arg(format!("--fpf={}", stat_file.display()))
    .args(["-o", "-"])
    .stdout(Stdio::null())
    .stderr(Stdio::null())
    .status()
    .context("failed to spawn aomenc for first-pass keyframe detection")?;

  ensure!(
    status.success() || stat_file.exists(),
    "aomenc first pass failed and produced no statistics file"
  );

  find_aom_keyframes(&stat_file, min_scene_len)
}

/// Scans an aomenc first-pass statistics file and returns the 0-based frame
/// indices that aomenc would likely choose as keyframes, without running the
/// actual pass-2 encode.
pub fn find_aom_keyframes(stat_file: &Path, key_freq_min: usize) -> anyhow::Result<Vec<usize>> {
  let records = parse_stats_file(stat_file)?;

  // the trailing record is an end-of-sequence packet, not a frame
  let num_frames = records.len().saturating_sub(1);
  let mut keyframes = Vec::new();
  let mut frame_count_so_far = 1_usize;

  // skip frame 0 and the last 16 frames, as a confirmation loop needs 16 frames of lookahead
  for i in 1..num_frames.saturating_sub(16) {
    let is_keyframe =
      frame_count_so_far >= key_freq_min && test_candidate_kf(&records, i, frame_count_so_far);

    if is_keyframe {
      keyframes.push(i);
      frame_count_so_far = 0;
    }
    frame_count_so_far += 1;
  }

  Ok(keyframes)
}
