use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

use reflcore::data::profile::PixelProfile;
use serde::Deserialize;

/// On-disk JSON profile, either a bare count array or an object carrying one.
#[derive(Deserialize)]
#[serde(untagged)]
enum JsonProfile {
    Bare(Vec<f64>),
    Tagged { counts: Vec<f64> },
}

/// Handle to a count-profile file.
///
/// The format is inferred from the extension: `.json` files hold either a
/// bare array of counts or an object `{"counts": [...]}`; anything else is
/// read as whitespace text, one count per line or two columns
/// `pixel count`, with `#` comment lines and blank lines skipped.
pub struct ProfileFileHandle {
    pub data_path: PathBuf,
}

impl ProfileFileHandle {
    pub fn new<P: AsRef<Path>>(data_path: P) -> ProfileFileHandle {
        ProfileFileHandle {
            data_path: data_path.as_ref().to_path_buf(),
        }
    }

    /// Reads the file into a validated profile.
    ///
    /// Counts must be finite and non-negative; in two-column text files the
    /// pixel column must equal the 0-based data-line index.
    pub fn read_profile(&self) -> Result<PixelProfile, Box<dyn Error>> {
        let raw = fs::read_to_string(&self.data_path)?;
        let is_json = self
            .data_path
            .extension()
            .map(|e| e.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let counts = if is_json {
            parse_json_counts(&raw)?
        } else {
            parse_text_counts(&raw)?
        };
        validate_counts(&counts)?;

        Ok(PixelProfile::new(counts))
    }
}

pub fn parse_json_counts(raw: &str) -> Result<Vec<f64>, Box<dyn Error>> {
    let profile: JsonProfile = serde_json::from_str(raw)?;
    match profile {
        JsonProfile::Bare(counts) => Ok(counts),
        JsonProfile::Tagged { counts } => Ok(counts),
    }
}

pub fn parse_text_counts(raw: &str) -> Result<Vec<f64>, Box<dyn Error>> {
    let mut counts = Vec::new();

    for (line_no, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        let count_field = match fields.as_slice() {
            [count] => count,
            [pixel, count] => {
                let pixel: usize = pixel
                    .parse()
                    .map_err(|e| format!("line {}: bad pixel index: {}", line_no + 1, e))?;
                if pixel != counts.len() {
                    return Err(format!(
                        "line {}: pixel column is {}, expected {}",
                        line_no + 1,
                        pixel,
                        counts.len()
                    )
                    .into());
                }
                count
            }
            _ => {
                return Err(format!(
                    "line {}: expected 1 or 2 columns, got {}",
                    line_no + 1,
                    fields.len()
                )
                .into())
            }
        };

        let count: f64 = count_field
            .parse()
            .map_err(|e| format!("line {}: bad count: {}", line_no + 1, e))?;
        counts.push(count);
    }

    Ok(counts)
}

fn validate_counts(counts: &[f64]) -> Result<(), Box<dyn Error>> {
    for (i, &c) in counts.iter().enumerate() {
        if !c.is_finite() {
            return Err(format!("pixel {}: count is not finite", i).into());
        }
        if c < 0.0 {
            return Err(format!("pixel {}: negative count {}", i, c).into());
        }
    }
    Ok(())
}
