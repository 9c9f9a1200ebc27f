/// Command-line runner for water-body studies over a local scene archive.
///
/// Scenes and historical layers are listed in a JSON manifest; each band is
/// either inline or a single-band TIFF on disk.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use env_logger::{Builder, Env};
use log::info;
use serde::Deserialize;
use tiff::decoder::{Decoder, DecodingResult};

use limnos_core::{GridSpec, HistoricalLayer, Raster, Scene, SceneArchive, StudyConfig, StudyRunner};

// ── Arguments ────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "limnos", about = "Surface-water extent and water-quality studies")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a study and write its report as JSON.
    Run {
        /// Study configuration JSON.
        #[arg(short, long)]
        config: PathBuf,

        /// Scene manifest JSON.
        #[arg(short, long)]
        manifest: PathBuf,

        /// Report destination; stdout when omitted.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Give up after this many seconds.
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// Parse and validate a study configuration without running it.
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
}

// ── Manifest ─────────────────────────────────────────────────────────────────

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum BandSource {
    /// Path to a single-band TIFF, relative to the manifest.
    File(PathBuf),
    /// Row-major samples; `null` marks no data.
    Inline(Vec<Option<f32>>),
}

#[derive(Deserialize, Debug)]
struct SceneEntry {
    id: String,
    acquired: NaiveDate,
    cloud_cover: f64,
    grid: GridSpec,
    bands: BTreeMap<String, BandSource>,
}

#[derive(Deserialize, Debug)]
struct LayerEntry {
    year: i32,
    grid: GridSpec,
    bands: BTreeMap<String, BandSource>,
}

#[derive(Deserialize, Debug, Default)]
struct Manifest {
    #[serde(default)]
    scenes: Vec<SceneEntry>,
    #[serde(default)]
    historical: Vec<LayerEntry>,
    /// Sample value treated as no data in TIFF bands.
    #[serde(default)]
    nodata: Option<f32>,
}

// ── Loading ──────────────────────────────────────────────────────────────────

fn read_tiff(path: &Path, nodata: Option<f32>) -> Result<(usize, usize, Vec<f32>)> {
    let file = fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut decoder = Decoder::new(io::BufReader::new(file)).with_context(|| format!("{} is not a TIFF", path.display()))?;
    let (width, height) = decoder.dimensions()?;
    let data: Vec<f32> = match decoder.read_image()? {
        DecodingResult::F32(v) => v,
        DecodingResult::U16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I16(v) => v.into_iter().map(f32::from).collect(),
        _ => bail!("{}: unsupported pixel type (expected F32, U16, I16 or U8)", path.display()),
    };
    let width = width as usize;
    if width == 0 || data.len() % width != 0 {
        bail!("{}: {} samples do not fill rows of width {width}", path.display(), data.len());
    }
    // TIFF rows run north to south; raster row 0 is the southern edge.
    let data = data
        .chunks(width)
        .rev()
        .flatten()
        .map(|&v| if nodata == Some(v) { f32::NAN } else { v })
        .collect();
    Ok((width, height as usize, data))
}

fn load_raster(
    name: &str,
    grid: GridSpec,
    bands: &BTreeMap<String, BandSource>,
    base: &Path,
    nodata: Option<f32>,
) -> Result<Raster> {
    let mut raster = Raster::new(name, grid);
    for (band, source) in bands {
        let data = match source {
            BandSource::Inline(values) => values.iter().map(|v| v.unwrap_or(f32::NAN)).collect(),
            BandSource::File(path) => {
                let (w, h, data) = read_tiff(&base.join(path), nodata)?;
                if (w, h) != (grid.width, grid.height) {
                    bail!("{name}/{band}: TIFF is {w}×{h} but the grid is {}×{}", grid.width, grid.height);
                }
                data
            }
        };
        raster = raster.with_band(band, data).with_context(|| format!("{name}/{band}"))?;
    }
    Ok(raster)
}

fn load_manifest(path: &Path) -> Result<(SceneArchive, Vec<HistoricalLayer>)> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let manifest: Manifest = serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));

    let mut scenes = Vec::with_capacity(manifest.scenes.len());
    for s in &manifest.scenes {
        let raster = load_raster(&s.id, s.grid, &s.bands, base, manifest.nodata)?;
        scenes.push(Scene { id: s.id.clone(), acquired: s.acquired, cloud_cover: s.cloud_cover, raster });
    }
    let mut layers = Vec::with_capacity(manifest.historical.len());
    for l in &manifest.historical {
        let raster = load_raster(&format!("historical_{}", l.year), l.grid, &l.bands, base, manifest.nodata)?;
        layers.push(HistoricalLayer { year: l.year, raster });
    }
    info!("loaded {} scenes and {} historical layers from {}", scenes.len(), layers.len(), path.display());
    Ok((SceneArchive::new(scenes), layers))
}

fn load_config(path: &Path) -> Result<StudyConfig> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(StudyConfig::from_json(&text)?)
}

// ── Main ─────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));
    builder.format_timestamp_secs();
    builder.init();

    match Args::parse().command {
        Command::Validate { config } => {
            let c = load_config(&config)?;
            info!("study '{}' is valid", c.name);
        }
        Command::Run { config, manifest, output, timeout_secs } => {
            let config = load_config(&config)?;
            let (archive, layers) = load_manifest(&manifest)?;
            let mut runner = StudyRunner::new(config)?;
            if let Some(secs) = timeout_secs {
                runner = runner.with_cancel(limnos_core::CancelToken::with_timeout(std::time::Duration::from_secs(secs)));
            }
            let report = runner.run(&archive, &layers)?;
            for note in &report.notes {
                log::warn!("{note}");
            }
            let json = serde_json::to_string_pretty(&report)?;
            match output {
                Some(path) => {
                    fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
                    info!("report written to {}", path.display());
                }
                None => println!("{json}"),
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_manifest_loads_with_null_as_no_data() {
        let dir = std::env::temp_dir().join(format!("limnos-cli-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("manifest.json");
        fs::write(
            &path,
            r#"{
                "scenes": [{
                    "id": "s1",
                    "acquired": "2020-08-01",
                    "cloud_cover": 2.5,
                    "grid": {"width": 2, "height": 1, "bounds": {"min_x": 0, "min_y": 0, "max_x": 2000, "max_y": 1000}, "crs": "projected"},
                    "bands": {"B3": [0.1, null], "B8": [0.3, 0.2]}
                }]
            }"#,
        )
        .unwrap();
        let (archive, layers) = load_manifest(&path).unwrap();
        assert_eq!(archive.len(), 1);
        assert!(layers.is_empty());
        let b3 = archive.scenes()[0].raster.band("B3").unwrap();
        assert!(b3.data[1].is_nan());
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn tiff_rows_are_flipped_to_south_up() {
        use tiff::encoder::{colortype::Gray32Float, TiffEncoder};

        let dir = std::env::temp_dir().join(format!("limnos-cli-tiff-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        {
            let mut file = fs::File::create(dir.join("band.tif")).unwrap();
            // one column, north sample first
            TiffEncoder::new(&mut file).unwrap().write_image::<Gray32Float>(1, 2, &[1.0, 0.0]).unwrap();
        }
        let grid: GridSpec = serde_json::from_str(
            r#"{"width": 1, "height": 2, "bounds": {"min_x": 0, "min_y": 0, "max_x": 1000, "max_y": 2000}, "crs": "projected"}"#,
        )
        .unwrap();
        let mut bands = BTreeMap::new();
        bands.insert("B3".to_string(), BandSource::File(PathBuf::from("band.tif")));
        let raster = load_raster("flip", grid, &bands, &dir, None).unwrap();
        let band = raster.band("B3").unwrap();
        assert_eq!(raster.sample(band, 500.0, 1500.0), Some(1.0));
        assert_eq!(raster.sample(band, 500.0, 500.0), Some(0.0));
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn band_length_must_match_grid() {
        let grid: GridSpec = serde_json::from_str(
            r#"{"width": 2, "height": 2, "bounds": {"min_x": 0, "min_y": 0, "max_x": 2, "max_y": 2}, "crs": "projected"}"#,
        )
        .unwrap();
        let mut bands = BTreeMap::new();
        bands.insert("B3".to_string(), BandSource::Inline(vec![Some(1.0); 3]));
        assert!(load_raster("bad", grid, &bands, Path::new("."), None).is_err());
    }
}
