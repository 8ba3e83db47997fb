use crate::error::{ProcessingError, Result};

/// Default purple-to-red temperature ramp as `(position, "#rrggbb")` stops.
pub const DEFAULT_COLOR_STOPS: [(f64, &str); 15] = [
    (0.0, "#4E00A6"),
    (1.0 / 14.0, "#3600D0"),
    (2.0 / 14.0, "#1107F4"),
    (3.0 / 14.0, "#0032F7"),
    (4.0 / 14.0, "#0467FF"),
    (5.0 / 14.0, "#04A3FF"),
    (6.0 / 14.0, "#04D27F"),
    (7.0 / 14.0, "#1BEC38"),
    (8.0 / 14.0, "#63FF00"),
    (9.0 / 14.0, "#F4FB0D"),
    (10.0 / 14.0, "#FBE316"),
    (11.0 / 14.0, "#F7C41B"),
    (12.0 / 14.0, "#FC871D"),
    (13.0 / 14.0, "#DB4F08"),
    (1.0, "#A00000"),
];

pub fn default_color_stops() -> Vec<(f64, String)> {
    DEFAULT_COLOR_STOPS
        .iter()
        .map(|(pos, hex)| (*pos, hex.to_string()))
        .collect()
}

/// Parse `#rrggbb` (leading `#` optional).
pub fn hex_to_rgb(hex: &str) -> Option<[u8; 3]> {
    let hex = hex.trim().trim_start_matches('#');
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
    let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
    let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
    Some([r, g, b])
}

/// Linear-segmented colormap sampled into a fixed number of discrete levels.
#[derive(Debug, Clone, PartialEq)]
pub struct Colormap {
    levels: Vec<[u8; 3]>,
}

impl Colormap {
    /// Stops must start at 0, end at 1 and be non-decreasing.
    pub fn from_stops(stops: &[(f64, String)], n_levels: usize) -> Result<Self> {
        if stops.len() < 2 {
            return Err(ProcessingError::InvalidConfig(
                "Colormap needs at least two stops".to_string(),
            ));
        }
        if n_levels < 2 {
            return Err(ProcessingError::InvalidConfig(format!(
                "Colormap needs at least two levels, got {}",
                n_levels
            )));
        }

        let mut parsed = Vec::with_capacity(stops.len());
        for (pos, hex) in stops {
            let rgb = hex_to_rgb(hex).ok_or_else(|| {
                ProcessingError::InvalidConfig(format!("Invalid colormap colour '{}'", hex))
            })?;
            parsed.push((*pos, rgb));
        }

        let first = parsed[0].0;
        let last = parsed[parsed.len() - 1].0;
        if first.abs() > 1e-9 || (last - 1.0).abs() > 1e-9 {
            return Err(ProcessingError::InvalidConfig(
                "Colormap stops must span positions 0 to 1".to_string(),
            ));
        }
        if parsed.windows(2).any(|w| w[1].0 < w[0].0) {
            return Err(ProcessingError::InvalidConfig(
                "Colormap stop positions must be non-decreasing".to_string(),
            ));
        }

        let levels = (0..n_levels)
            .map(|k| interpolate_stops(&parsed, k as f64 / (n_levels - 1) as f64))
            .collect();
        Ok(Self { levels })
    }

    pub fn default_with_levels(n_levels: usize) -> Result<Self> {
        Self::from_stops(&default_color_stops(), n_levels)
    }

    pub fn n_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn levels(&self) -> &[[u8; 3]] {
        &self.levels
    }

    /// Colour for `value` on the `[vmin, vmax]` scale; values outside clamp
    /// to the end colours.
    pub fn color_for(&self, value: f64, vmin: f64, vmax: f64) -> [u8; 3] {
        let span = vmax - vmin;
        let t = if span.abs() < f64::EPSILON {
            0.5
        } else {
            ((value - vmin) / span).clamp(0.0, 1.0)
        };
        let n = self.levels.len();
        let idx = ((t * n as f64) as usize).min(n - 1);
        self.levels[idx]
    }
}

fn interpolate_stops(stops: &[(f64, [u8; 3])], t: f64) -> [u8; 3] {
    let upper = stops
        .iter()
        .position(|(pos, _)| *pos >= t)
        .unwrap_or(stops.len() - 1);
    if upper == 0 {
        return stops[0].1;
    }
    let (p0, c0) = stops[upper - 1];
    let (p1, c1) = stops[upper];
    let f = if p1 > p0 { (t - p0) / (p1 - p0) } else { 1.0 };
    let mix = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * f).round() as u8;
    [mix(c0[0], c1[0]), mix(c0[1], c1[1]), mix(c0[2], c1[2])]
}

/// Colour-scale bounds centred on the grid median.
///
/// `vmin = trunc(median - offset) - half_range`, `vmax = trunc(median - offset) + half_range`.
pub fn color_scale(median: f64, median_offset: f64, half_range: i32) -> (i32, i32) {
    let centre = (median - median_offset).trunc() as i32;
    (centre - half_range, centre + half_range)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_to_rgb() {
        assert_eq!(hex_to_rgb("#4E00A6"), Some([0x4E, 0x00, 0xA6]));
        assert_eq!(hex_to_rgb("a00000"), Some([160, 0, 0]));
        assert_eq!(hex_to_rgb("#12345"), None);
        assert_eq!(hex_to_rgb("#zzzzzz"), None);
    }

    #[test]
    fn test_levels_hit_end_stops() {
        let cmap = Colormap::default_with_levels(15).unwrap();
        assert_eq!(cmap.n_levels(), 15);
        assert_eq!(cmap.levels()[0], [0x4E, 0x00, 0xA6]);
        assert_eq!(cmap.levels()[14], [0xA0, 0x00, 0x00]);
        // 15 levels over 15 evenly spaced stops reproduce the stops exactly.
        assert_eq!(cmap.levels()[7], [0x1B, 0xEC, 0x38]);
    }

    #[test]
    fn test_color_for_quantizes_and_clamps() {
        let stops = vec![(0.0, "#000000".to_string()), (1.0, "#FFFFFF".to_string())];
        let cmap = Colormap::from_stops(&stops, 2).unwrap();
        assert_eq!(cmap.color_for(-100.0, 0.0, 10.0), [0, 0, 0]);
        assert_eq!(cmap.color_for(4.9, 0.0, 10.0), [0, 0, 0]);
        assert_eq!(cmap.color_for(5.1, 0.0, 10.0), [255, 255, 255]);
        assert_eq!(cmap.color_for(100.0, 0.0, 10.0), [255, 255, 255]);
    }

    #[test]
    fn test_invalid_stops() {
        let unordered = vec![(0.0, "#000000".to_string()), (0.8, "#111111".to_string()), (0.5, "#222222".to_string()), (1.0, "#333333".to_string())];
        assert!(Colormap::from_stops(&unordered, 5).is_err());
        let short = vec![(0.0, "#000000".to_string()), (0.5, "#FFFFFF".to_string())];
        assert!(Colormap::from_stops(&short, 5).is_err());
        let bad_hex = vec![(0.0, "black".to_string()), (1.0, "#FFFFFF".to_string())];
        assert!(Colormap::from_stops(&bad_hex, 5).is_err());
    }

    #[test]
    fn test_color_scale_truncates_toward_zero() {
        assert_eq!(color_scale(19.7, 2.0, 7), (10, 24));
        assert_eq!(color_scale(1.5, 2.0, 7), (-7, 7));
        assert_eq!(color_scale(-3.9, 2.0, 7), (-12, 2));
    }
}
