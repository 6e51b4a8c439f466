// config.rs — Run configuration: keyword file or JSON.
//
// Two on-disk forms describe the same `RunConfig`:
//
// Keyword file (one `KEY value…` per line, `#` starts a comment, first
// occurrence of a key wins):
//
//   DEBUG 1
//   N_FRAMES 10
//   IMAGEFILE_1 data/frame_{:04}.tif
//   IM1_FRAME_START 0
//   IM1_FRAME_STEP 2
//   IMAGEFILE_2 data/frame_{:04}.tif
//   IM2_FRAME_START 1
//   IM2_FRAME_STEP 2
//   N_PASS 3
//   WINDOW_SIZE 64 32 16
//   WINDOW_OVERLAP 0.5 0.5 0.5
//   OUTPUT_TEMPLATE out/vectors_{:04}.txt
//   N_FILTERS 1
//   FILTER_0 GAUSS_FILTER_SUBTRACTION 4 2.0
//   ENGINE gpu
//
// JSON (selected by a `.json` extension), deserialised with serde:
//
//   { "n_frames": 10,
//     "image_1": { "template": "data/frame_{:04}.tif", "start": 0, "step": 2 },
//     "image_2": { "template": "data/frame_{:04}.tif", "start": 1, "step": 2 },
//     "passes": [ { "window": 64, "overlap": 0.5 }, … ],
//     "output_template": "out/vectors_{:04}.txt",
//     "filters": [ "GAUSS_FILTER_SUBTRACTION 4 2.0" ],
//     "engine": "gpu" }
//
// Templates contain one placeholder: `{}` or `{:0N}` (zero-padded to N).
// Checks that need the frame size (window fits, grid ≥ 2×2) happen when
// the pass plan is resolved against the first frame.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::LevelFilter;
use serde::Deserialize;

use crate::error::{PivError, Result};
use crate::filters::Filter;
use crate::grid::PassSpec;

/// Which engine runs the correlation stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Cpu,
    #[default]
    Gpu,
}

impl FromStr for EngineKind {
    type Err = PivError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(EngineKind::Cpu),
            "gpu" => Ok(EngineKind::Gpu),
            other => Err(PivError::config(format!("unknown engine '{other}' (cpu|gpu)"))),
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineKind::Cpu => write!(f, "cpu"),
            EngineKind::Gpu => write!(f, "gpu"),
        }
    }
}

fn default_step() -> i64 {
    1
}

/// A numbered image sequence: frame i is `template` formatted with
/// `start + i·step`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ImageSeries {
    pub template: String,
    #[serde(default)]
    pub start: i64,
    #[serde(default = "default_step")]
    pub step: i64,
}

impl ImageSeries {
    pub fn index(&self, i: usize) -> i64 {
        self.start + i as i64 * self.step
    }

    pub fn path(&self, i: usize) -> Result<PathBuf> {
        format_template(&self.template, self.index(i)).map(PathBuf::from)
    }
}

/// Everything a run needs.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub debug: u8,
    pub n_frames: usize,
    pub image_1: ImageSeries,
    pub image_2: ImageSeries,
    pub passes: Vec<PassSpec>,
    pub output_template: String,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub engine: EngineKind,
}

impl RunConfig {
    /// Load from `path`; `.json` selects the JSON form.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        let config = if is_json {
            serde_json::from_str(&text)?
        } else {
            RunConfig::from_keywords(&text)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse the keyword form.
    pub fn from_keywords(text: &str) -> Result<Self> {
        let kw = Keywords::parse(text);

        let n_pass: usize = kw.value("N_PASS")?;
        let windows: Vec<usize> = kw.list("WINDOW_SIZE")?;
        let overlaps: Vec<f32> = kw.list("WINDOW_OVERLAP")?;
        if windows.len() != n_pass || overlaps.len() != n_pass {
            return Err(PivError::config(format!(
                "N_PASS is {n_pass} but {} window sizes and {} overlaps are given",
                windows.len(),
                overlaps.len()
            )));
        }
        let passes = windows
            .into_iter()
            .zip(overlaps)
            .map(|(w, o)| PassSpec::new(w, o))
            .collect();

        let n_filters: usize = kw.value_or("N_FILTERS", 0)?;
        let filters = (0..n_filters)
            .map(|i| {
                let key = format!("FILTER_{i}");
                let line = kw.rest(&key)?;
                line.parse::<Filter>()
                    .map_err(|e| PivError::config(format!("problem loading {key}: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        let config = RunConfig {
            debug: kw.value_or("DEBUG", 0)?,
            n_frames: kw.value("N_FRAMES")?,
            image_1: ImageSeries {
                template: kw.rest("IMAGEFILE_1")?.to_string(),
                start: kw.value("IM1_FRAME_START")?,
                step: kw.value("IM1_FRAME_STEP")?,
            },
            image_2: ImageSeries {
                template: kw.rest("IMAGEFILE_2")?.to_string(),
                start: kw.value("IM2_FRAME_START")?,
                step: kw.value("IM2_FRAME_STEP")?,
            },
            passes,
            output_template: kw.rest("OUTPUT_TEMPLATE")?.to_string(),
            filters,
            engine: kw.value_or("ENGINE", EngineKind::default())?,
        };
        Ok(config)
    }

    /// Frame-size-independent checks.
    pub fn validate(&self) -> Result<()> {
        if self.passes.is_empty() {
            return Err(PivError::config("at least one pass is required"));
        }
        for (k, p) in self.passes.iter().enumerate() {
            if p.window < 2 || !p.window.is_power_of_two() {
                return Err(PivError::config(format!(
                    "pass {k}: window size {} must be a power of two >= 2",
                    p.window
                )));
            }
            if !(0.0..1.0).contains(&p.overlap) {
                return Err(PivError::config(format!(
                    "pass {k}: overlap {} must lie in [0, 1)",
                    p.overlap
                )));
            }
        }
        for t in [&self.image_1.template, &self.image_2.template, &self.output_template] {
            format_template(t, 0)?;
        }
        Ok(())
    }

    /// Log verbosity for `DEBUG n`.
    pub fn log_level(&self) -> LevelFilter {
        match self.debug {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}

// ---------------------------------------------------------------------------
// Keyword lookup
// ---------------------------------------------------------------------------

struct Keywords<'a> {
    entries: HashMap<&'a str, &'a str>,
}

impl<'a> Keywords<'a> {
    fn parse(text: &'a str) -> Self {
        let mut entries = HashMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, rest) = match line.split_once(char::is_whitespace) {
                Some((k, r)) => (k, r.trim()),
                None => (line, ""),
            };
            entries.entry(key).or_insert(rest);
        }
        Keywords { entries }
    }

    fn rest(&self, key: &str) -> Result<&'a str> {
        self.entries
            .get(key)
            .copied()
            .ok_or_else(|| PivError::config(format!("keyword '{key}' not found")))
    }

    fn value<T: FromStr>(&self, key: &str) -> Result<T> {
        let raw = self.rest(key)?;
        let word = raw.split_whitespace().next().unwrap_or("");
        word.parse().map_err(|_| {
            PivError::config(format!("found keyword '{key}' but could not parse '{raw}'"))
        })
    }

    fn value_or<T: FromStr>(&self, key: &str, default: T) -> Result<T> {
        if self.entries.contains_key(key) {
            self.value(key)
        } else {
            Ok(default)
        }
    }

    fn list<T: FromStr>(&self, key: &str) -> Result<Vec<T>> {
        self.rest(key)?
            .split_whitespace()
            .map(|w| {
                w.parse().map_err(|_| {
                    PivError::config(format!("keyword '{key}': could not parse '{w}'"))
                })
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

/// Substitute `index` into the first `{}` / `{:N}` / `{:0N}` placeholder.
///
/// A template without a placeholder is returned unchanged.
pub fn format_template(template: &str, index: i64) -> Result<String> {
    let Some(open) = template.find('{') else {
        return Ok(template.to_string());
    };
    let close = template[open..]
        .find('}')
        .map(|c| open + c)
        .ok_or_else(|| PivError::config(format!("unclosed placeholder in '{template}'")))?;

    let spec = &template[open + 1..close];
    let formatted = match spec.strip_prefix(':') {
        None if spec.is_empty() => index.to_string(),
        Some(width) => {
            let (zero, digits) = match width.strip_prefix('0') {
                Some(d) if !d.is_empty() => (true, d),
                _ => (false, width),
            };
            let n: usize = digits.parse().map_err(|_| {
                PivError::config(format!("bad placeholder '{{{spec}}}' in '{template}'"))
            })?;
            if zero {
                format!("{index:0n$}")
            } else {
                format!("{index:n$}")
            }
        }
        None => {
            return Err(PivError::config(format!(
                "bad placeholder '{{{spec}}}' in '{template}'"
            )))
        }
    };
    Ok(format!("{}{}{}", &template[..open], formatted, &template[close + 1..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEYWORDS: &str = "\
# sample run
DEBUG 1
N_FRAMES 4
IMAGEFILE_1 data/cam_{:04}.tif
IM1_FRAME_START 1
IM1_FRAME_STEP 2
IMAGEFILE_2 data/cam_{:04}.tif
IM2_FRAME_START 2
IM2_FRAME_STEP 2
N_PASS 3
WINDOW_SIZE 64 32 16
WINDOW_OVERLAP 0.5 0.5 0.75
OUTPUT_TEMPLATE out/vec_{}.txt
N_FILTERS 2
FILTER_0 MEAN_FILTER_SUBTRACTION 3
FILTER_1 GAUSS_FILTER 2 1.0
ENGINE cpu
";

    #[test]
    fn keyword_file_parses() {
        let cfg = RunConfig::from_keywords(KEYWORDS).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.n_frames, 4);
        assert_eq!(cfg.passes.len(), 3);
        assert_eq!(cfg.passes[2], PassSpec::new(16, 0.75));
        assert_eq!(cfg.filters.len(), 2);
        assert_eq!(cfg.engine, EngineKind::Cpu);
        assert_eq!(cfg.log_level(), LevelFilter::Debug);
        assert_eq!(cfg.image_1.path(2).unwrap(), PathBuf::from("data/cam_0005.tif"));
        assert_eq!(cfg.image_2.path(2).unwrap(), PathBuf::from("data/cam_0006.tif"));
        assert_eq!(cfg.output_template, "out/vec_{}.txt");
    }

    #[test]
    fn optional_keys_default() {
        let text: String = KEYWORDS
            .lines()
            .filter(|l| !l.starts_with("DEBUG") && !l.starts_with("ENGINE") && !l.starts_with("N_FILTERS"))
            .map(|l| format!("{l}\n"))
            .collect();
        let cfg = RunConfig::from_keywords(&text).unwrap();
        assert_eq!(cfg.debug, 0);
        assert_eq!(cfg.engine, EngineKind::Gpu);
        assert!(cfg.filters.is_empty());
    }

    #[test]
    fn missing_key_is_config_error() {
        let text = KEYWORDS.replace("N_FRAMES 4\n", "");
        let err = RunConfig::from_keywords(&text).unwrap_err();
        assert!(err.to_string().contains("N_FRAMES"), "{err}");
    }

    #[test]
    fn pass_count_mismatch_is_config_error() {
        let text = KEYWORDS.replace("N_PASS 3", "N_PASS 2");
        assert!(matches!(RunConfig::from_keywords(&text), Err(PivError::Config(_))));
    }

    #[test]
    fn bad_window_rejected_by_validate() {
        let text = KEYWORDS.replace("WINDOW_SIZE 64 32 16", "WINDOW_SIZE 64 24 16");
        let cfg = RunConfig::from_keywords(&text).unwrap();
        assert!(matches!(cfg.validate(), Err(PivError::Config(_))));
    }

    #[test]
    fn bad_filter_names_the_key() {
        let text = KEYWORDS.replace("FILTER_1 GAUSS_FILTER 2 1.0", "FILTER_1 BLUR 2");
        let err = RunConfig::from_keywords(&text).unwrap_err();
        assert!(err.to_string().contains("FILTER_1"), "{err}");
    }

    #[test]
    fn json_form_matches_keywords() {
        let json = r#"{
            "debug": 1,
            "n_frames": 4,
            "image_1": { "template": "data/cam_{:04}.tif", "start": 1, "step": 2 },
            "image_2": { "template": "data/cam_{:04}.tif", "start": 2, "step": 2 },
            "passes": [
                { "window": 64, "overlap": 0.5 },
                { "window": 32, "overlap": 0.5 },
                { "window": 16, "overlap": 0.75 }
            ],
            "output_template": "out/vec_{}.txt",
            "filters": ["MEAN_FILTER_SUBTRACTION 3", "GAUSS_FILTER 2 1.0"],
            "engine": "cpu"
        }"#;
        let from_json: RunConfig = serde_json::from_str(json).unwrap();
        let from_kw = RunConfig::from_keywords(KEYWORDS).unwrap();
        assert_eq!(from_json, from_kw);
    }

    #[test]
    fn json_bad_filter_fails() {
        let json = r#"{ "n_frames": 1,
            "image_1": { "template": "a.tif" }, "image_2": { "template": "b.tif" },
            "passes": [ { "window": 32, "overlap": 0.5 } ],
            "output_template": "o.txt", "filters": ["SHARPEN"] }"#;
        assert!(serde_json::from_str::<RunConfig>(json).is_err());
    }

    #[test]
    fn template_forms() {
        assert_eq!(format_template("f_{}.tif", 7).unwrap(), "f_7.tif");
        assert_eq!(format_template("f_{:05}.tif", 42).unwrap(), "f_00042.tif");
        assert_eq!(format_template("f_{:3}.tif", 5).unwrap(), "f_  5.tif");
        assert_eq!(format_template("fixed.tif", 5).unwrap(), "fixed.tif");
        assert!(format_template("f_{x}.tif", 1).is_err());
        assert!(format_template("f_{:04.tif", 1).is_err());
    }

    #[test]
    fn engine_parses_case_insensitively() {
        assert_eq!("GPU".parse::<EngineKind>().unwrap(), EngineKind::Gpu);
        assert!("tpu".parse::<EngineKind>().is_err());
    }
}
