use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The closed set of supported output resolutions, descending.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Resolution {
    #[serde(rename = "1080p")]
    P1080,
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "480p")]
    P480,
    #[serde(rename = "360p")]
    P360,
    #[serde(rename = "240p")]
    P240,
}

pub const ALL_RESOLUTIONS: [Resolution; 5] = [
    Resolution::P1080,
    Resolution::P720,
    Resolution::P480,
    Resolution::P360,
    Resolution::P240,
];

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::P1080 => "1080p",
            Resolution::P720 => "720p",
            Resolution::P480 => "480p",
            Resolution::P360 => "360p",
            Resolution::P240 => "240p",
        }
    }

    pub fn height(&self) -> u32 {
        self.profile().height
    }

    pub fn profile(&self) -> &'static RenditionProfile {
        match self {
            Resolution::P1080 => &PROFILE_1080P,
            Resolution::P720 => &PROFILE_720P,
            Resolution::P480 => &PROFILE_480P,
            Resolution::P360 => &PROFILE_360P,
            Resolution::P240 => &PROFILE_240P,
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1080p" => Ok(Resolution::P1080),
            "720p" => Ok(Resolution::P720),
            "480p" => Ok(Resolution::P480),
            "360p" => Ok(Resolution::P360),
            "240p" => Ok(Resolution::P240),
            other => Err(format!("unknown resolution: {other}")),
        }
    }
}

/// Fixed encoding parameters per rendition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenditionProfile {
    pub resolution: Resolution,
    pub width: u32,
    pub height: u32,
    pub video_kbps: u32,
    pub audio_kbps: u32,
    pub h264_profile: &'static str,
    pub h264_level: &'static str,
    pub codecs: &'static str,
}

impl RenditionProfile {
    /// BANDWIDTH attribute value for the master playlist.
    pub fn bandwidth(&self) -> u64 {
        self.video_kbps as u64 * 1000
    }
}

pub static PROFILE_1080P: RenditionProfile = RenditionProfile {
    resolution: Resolution::P1080,
    width: 1920,
    height: 1080,
    video_kbps: 6593,
    audio_kbps: 192,
    h264_profile: "high",
    h264_level: "4.0",
    codecs: "avc1.640028,mp4a.40.5",
};

pub static PROFILE_720P: RenditionProfile = RenditionProfile {
    resolution: Resolution::P720,
    width: 1280,
    height: 720,
    video_kbps: 2766,
    audio_kbps: 128,
    h264_profile: "high",
    h264_level: "4.0",
    codecs: "avc1.640028,mp4a.40.5",
};

pub static PROFILE_480P: RenditionProfile = RenditionProfile {
    resolution: Resolution::P480,
    width: 854,
    height: 480,
    video_kbps: 1395,
    audio_kbps: 128,
    h264_profile: "main",
    h264_level: "3.1",
    codecs: "avc1.42001f,mp4a.40.5",
};

pub static PROFILE_360P: RenditionProfile = RenditionProfile {
    resolution: Resolution::P360,
    width: 640,
    height: 360,
    video_kbps: 1038,
    audio_kbps: 96,
    h264_profile: "main",
    h264_level: "3.1",
    codecs: "avc1.4d001f,mp4a.40.5",
};

pub static PROFILE_240P: RenditionProfile = RenditionProfile {
    resolution: Resolution::P240,
    width: 426,
    height: 240,
    video_kbps: 400,
    audio_kbps: 64,
    h264_profile: "baseline",
    h264_level: "3.0",
    codecs: "avc1.42001e,mp4a.40.5",
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolutions_descend_by_height() {
        let heights: Vec<u32> = ALL_RESOLUTIONS.iter().map(|r| r.height()).collect();
        let mut sorted = heights.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(heights, sorted);
    }

    #[test]
    fn profile_table_matches_labels() {
        assert_eq!(Resolution::P1080.profile().width, 1920);
        assert_eq!(Resolution::P720.profile().video_kbps, 2766);
        assert_eq!(Resolution::P240.profile().h264_profile, "baseline");
        assert_eq!(Resolution::P480.profile().codecs, "avc1.42001f,mp4a.40.5");
        for resolution in ALL_RESOLUTIONS {
            assert_eq!(resolution.profile().resolution, resolution);
        }
    }

    #[test]
    fn bandwidth_is_kbps_times_thousand() {
        assert_eq!(Resolution::P1080.profile().bandwidth(), 6_593_000);
        assert_eq!(Resolution::P240.profile().bandwidth(), 400_000);
    }

    #[test]
    fn parse_labels() {
        for resolution in ALL_RESOLUTIONS {
            assert_eq!(resolution.as_str().parse::<Resolution>(), Ok(resolution));
        }
        assert!("4k".parse::<Resolution>().is_err());
    }
}
