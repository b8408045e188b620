//! Static catalog of broadcast quality presets.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::track::VideoConstraints;

/// Capture resolution, frame rate and encoder bitrate ceiling for a preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualitySettings {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub max_bitrate_bps: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum QualityPreset {
    #[serde(rename = "1080p")]
    P1080,
    #[default]
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "480p")]
    P480,
    #[serde(rename = "360p")]
    P360,
}

impl QualityPreset {
    /// Presets in display order, highest first.
    pub const ALL: [QualityPreset; 4] = [
        QualityPreset::P1080,
        QualityPreset::P720,
        QualityPreset::P480,
        QualityPreset::P360,
    ];

    pub const fn settings(self) -> QualitySettings {
        match self {
            QualityPreset::P1080 => QualitySettings {
                width: 1920,
                height: 1080,
                frame_rate: 30,
                max_bitrate_bps: 8_000_000,
            },
            QualityPreset::P720 => QualitySettings {
                width: 1280,
                height: 720,
                frame_rate: 30,
                max_bitrate_bps: 4_000_000,
            },
            QualityPreset::P480 => QualitySettings {
                width: 854,
                height: 480,
                frame_rate: 24,
                max_bitrate_bps: 1_500_000,
            },
            QualityPreset::P360 => QualitySettings {
                width: 640,
                height: 360,
                frame_rate: 20,
                max_bitrate_bps: 600_000,
            },
        }
    }

    /// Ideal capture constraints for this preset.
    pub const fn constraints(self) -> VideoConstraints {
        let s = self.settings();
        VideoConstraints {
            width: s.width,
            height: s.height,
            frame_rate: s.frame_rate,
        }
    }

    pub const fn max_bitrate_bps(self) -> u64 {
        self.settings().max_bitrate_bps
    }

    /// Bitrate ceiling in Mbps as shown next to the preset picker.
    pub const fn bitrate_label(self) -> &'static str {
        match self {
            QualityPreset::P1080 => "8",
            QualityPreset::P720 => "4",
            QualityPreset::P480 => "1.5",
            QualityPreset::P360 => "0.6",
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            QualityPreset::P1080 => "1080p",
            QualityPreset::P720 => "720p",
            QualityPreset::P480 => "480p",
            QualityPreset::P360 => "360p",
        }
    }
}

impl fmt::Display for QualityPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown quality preset {0:?} (expected one of 1080p, 720p, 480p, 360p)")]
pub struct UnknownPreset(pub String);

impl FromStr for QualityPreset {
    type Err = UnknownPreset;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        QualityPreset::ALL
            .into_iter()
            .find(|preset| preset.name() == wanted)
            .ok_or_else(|| UnknownPreset(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_720p() {
        assert_eq!(QualityPreset::default(), QualityPreset::P720);
    }

    #[test]
    fn test_catalog_values() {
        let p1080 = QualityPreset::P1080.settings();
        assert_eq!((p1080.width, p1080.height, p1080.frame_rate), (1920, 1080, 30));
        assert_eq!(p1080.max_bitrate_bps, 8_000_000);

        let p360 = QualityPreset::P360.settings();
        assert_eq!((p360.width, p360.height, p360.frame_rate), (640, 360, 20));
        assert_eq!(p360.max_bitrate_bps, 600_000);
    }

    #[test]
    fn test_bitrate_strictly_decreases_down_the_list() {
        let rates: Vec<u64> = QualityPreset::ALL
            .iter()
            .map(|preset| preset.max_bitrate_bps())
            .collect();
        assert!(rates.windows(2).all(|pair| pair[0] > pair[1]));
    }

    #[test]
    fn test_names_parse_back() {
        for preset in QualityPreset::ALL {
            assert_eq!(preset.to_string().parse::<QualityPreset>().unwrap(), preset);
        }
        assert_eq!(" 480P ".parse::<QualityPreset>().unwrap(), QualityPreset::P480);
        assert!("4k".parse::<QualityPreset>().is_err());
    }

    #[test]
    fn test_serde_uses_preset_names() {
        let json = serde_json::to_string(&QualityPreset::P480).unwrap();
        assert_eq!(json, "\"480p\"");
        let back: QualityPreset = serde_json::from_str("\"1080p\"").unwrap();
        assert_eq!(back, QualityPreset::P1080);
    }

    #[test]
    fn test_constraints_follow_settings() {
        let c = QualityPreset::P480.constraints();
        assert_eq!((c.width, c.height, c.frame_rate), (854, 480, 24));
    }
}
