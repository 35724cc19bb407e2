#![allow(clippy::mutex_atomic)]
// This is a mostly drop-in reimplementation of vspipe.
// The main difference is what the errors look like.

// Modified from vspipe example in vapoursynth crate
// https://github.com/YaLTeR/vapoursynth-rs/blob/master/vapoursynth/examples/vspipe.rs
extern crate vapoursynth;

use std::collections::HashSet;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

use self::vapoursynth::prelude::*;
use super::ChunkMethod;

use anyhow::anyhow;

/// Writes (or reuses) a `loadscript.vpy` that indexes `source` with the indexer
/// plugin matching `chunk_method`, and returns the path to the script.
pub fn create_vs_file(
  temp: &str,
  source: &Path,
  chunk_method: ChunkMethod,
) -> anyhow::Result<String> {
  let temp = Path::new(temp);
  let source = source.canonicalize()?;

  let load_script_path = temp.join("split").join("loadscript.vpy");

  if load_script_path.exists() {
    return Ok(load_script_path.to_string_lossy().to_string());
  }

  let mut load_script = File::create(&load_script_path)?;

  let cache_file = std::env::current_dir()?.join(temp.join("split").join(format!(
    "cache.{}",
    match chunk_method {
      ChunkMethod::FFMS2 => "ffindex",
      ChunkMethod::LSMASH => "lwi",
      _ => return Err(anyhow!("invalid chunk method for vapoursynth indexing: {chunk_method}")),
    }
  )));

  load_script.write_all(
    format!(
      "from vapoursynth import core\n\
core.{}({:?}, cachefile={:?}).set_output()",
      match chunk_method {
        ChunkMethod::FFMS2 => "ffms2.Source",
        ChunkMethod::LSMASH => "lsmas.LWLibavSource",
        _ => unreachable!(),
      },
      source,
      cache_file
    )
    .as_bytes(),
  )?;

  Command::new("vspipe")
    .arg("-i")
    .arg(&load_script_path)
    .args(["-i", "-"])
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .spawn()?
    .wait()?;

  Ok(load_script_path.to_string_lossy().to_string())
}

fn loaded_plugin_namespaces() -> anyhow::Result<HashSet<String>> {
  let environment = Environment::new().map_err(|e| anyhow!("{}", e))?;
  let core = environment.get_core().map_err(|e| anyhow!("{}", e))?;

  let plugins = core.plugins();
  Ok(
    plugins
      .keys()
      .filter_map(|plugin| {
        plugins
          .get::<&[u8]>(plugin)
          .ok()
          .and_then(|slice| std::str::from_utf8(slice).ok())
          .and_then(|s| s.split(';').nth(1))
          .map(str::to_owned)
      })
      .collect(),
  )
}

pub fn select_chunk_method() -> anyhow::Result<ChunkMethod> {
  let plugins = loaded_plugin_namespaces()?;

  if plugins.contains("systems.innocent.lsmas") {
    Ok(ChunkMethod::LSMASH)
  } else if plugins.contains("com.vapoursynth.ffms2") {
    Ok(ChunkMethod::FFMS2)
  } else {
    Ok(ChunkMethod::Hybrid)
  }
}

/// Returns true if the `lsmas` (LSMASHSource) VapourSynth plugin is loaded.
pub fn is_lsmash_installed() -> bool {
  loaded_plugin_namespaces()
    .map(|plugins| plugins.contains("systems.innocent.lsmas"))
    .unwrap_or(false)
}

/// Returns true if the `ffms2` VapourSynth plugin is loaded.
pub fn is_ffms2_installed() -> bool {
  loaded_plugin_namespaces()
    .map(|plugins| plugins.contains("com.vapoursynth.ffms2"))
    .unwrap_or(false)
}

/// Returns the bit depth of the clip output by a VapourSynth script.
pub fn bit_depth(path: &Path) -> anyhow::Result<usize> {
  let mut environment = Environment::new().map_err(|e| anyhow!("{}", e))?;
  environment
    .eval_file(path, EvalFlags::SetWorkingDir)
    .map_err(|e| anyhow!("{}", e))?;

  let (node, _) = (environment.get_output(0).map_err(|e| anyhow!("{}", e))?, None::<Node>);

  match node.info().format {
    Property::Constant(format) => Ok(format.bits_per_sample() as usize),
    Property::Variable => Err(anyhow!("Cannot output clips with varying format")),
  }
}

/// Returns the frame rate of the clip output by a VapourSynth script.
pub fn frame_rate(path: &Path) -> anyhow::Result<f64> {
  let mut environment = Environment::new().map_err(|e| anyhow!("{}", e))?;
  environment
    .eval_file(path, EvalFlags::SetWorkingDir)
    .map_err(|e| anyhow!("{}", e))?;

  let (node, _) = (environment.get_output(0).map_err(|e| anyhow!("{}", e))?, None::<Node>);

  match node.info().framerate {
    Property::Constant(fr) => Ok(fr.numerator as f64 / fr.denominator as f64),
    Property::Variable => Err(anyhow!("Cannot output clips with varying framerate")),
  }
}

pub fn num_frames(path: &Path) -> anyhow::Result<usize> {
  // Create a new VSScript environment.
  let mut environment = Environment::new().unwrap();

  // Evaluate the script.
  environment
    .eval_file(path, EvalFlags::SetWorkingDir)
    .unwrap();

  // Get the output node.
  let output_index = 0;

  #[cfg(feature = "gte-vsscript-api-31")]
  let (node, alpha_node) = environment.get_output(output_index).context(format!(
    "Couldn't get the output node at index {}",
    output_index
  ))?;
  #[cfg(not(feature = "gte-vsscript-api-31"))]
  let (node, _) = (environment.get_output(output_index).unwrap(), None::<Node>);

  let num_frames = {
    let info = node.info();

    if let Property::Variable = info.format {
      panic!("Cannot output clips with varying format");
    }
    if let Property::Variable = info.resolution {
      panic!("Cannot output clips with varying dimensions");
    }
    if let Property::Variable = info.framerate {
      panic!("Cannot output clips with varying framerate");
    }

    #[cfg(feature = "gte-vapoursynth-api-32")]
    let num_frames = info.num_frames;

    #[cfg(not(feature = "gte-vapoursynth-api-32"))]
    let num_frames = {
      match info.num_frames {
        Property::Variable => {
          // TODO: make it possible?
          panic!("Cannot output clips with unknown length");
        }
        Property::Constant(x) => x,
      }
    };

    num_frames
  };

  Ok(num_frames)
}
