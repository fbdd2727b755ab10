/// Discrete playback speeds exposed to applications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackSpeed {
    X0_75,
    #[default]
    X1_00,
    X1_25,
    X1_75,
    X2_00,
}

impl PlaybackSpeed {
    pub const ALL: [PlaybackSpeed; 5] = [
        PlaybackSpeed::X0_75,
        PlaybackSpeed::X1_00,
        PlaybackSpeed::X1_25,
        PlaybackSpeed::X1_75,
        PlaybackSpeed::X2_00,
    ];

    /// Continuous rate handed to the backend.
    pub fn rate(&self) -> f64 {
        match self {
            PlaybackSpeed::X0_75 => 0.75,
            PlaybackSpeed::X1_00 => 1.0,
            PlaybackSpeed::X1_25 => 1.25,
            PlaybackSpeed::X1_75 => 1.75,
            PlaybackSpeed::X2_00 => 2.0,
        }
    }

    /// Inverse of [`rate`](Self::rate). Rates between modes are rejected.
    pub fn from_rate(rate: f64) -> Option<PlaybackSpeed> {
        Self::ALL
            .into_iter()
            .find(|mode| (mode.rate() - rate).abs() < 1e-6)
    }

    /// Parse the textual multiplier used on the command line ("1.25", "2x").
    pub fn parse(text: &str) -> Option<PlaybackSpeed> {
        let value: f64 = text.trim().trim_end_matches(['x', 'X']).parse().ok()?;
        Self::from_rate(value)
    }
}

impl std::fmt::Display for PlaybackSpeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x", self.rate())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_round_trip() {
        for mode in PlaybackSpeed::ALL {
            let back = PlaybackSpeed::from_rate(mode.rate()).unwrap();
            assert_eq!(PlaybackSpeed::from_rate(back.rate()), Some(mode));
        }
    }

    #[test]
    fn test_rates_between_modes() {
        assert_eq!(PlaybackSpeed::from_rate(1.5), None);
        assert_eq!(PlaybackSpeed::from_rate(0.0), None);
    }

    #[test]
    fn test_parse() {
        assert_eq!(PlaybackSpeed::parse("1.25"), Some(PlaybackSpeed::X1_25));
        assert_eq!(PlaybackSpeed::parse("2x"), Some(PlaybackSpeed::X2_00));
        assert_eq!(PlaybackSpeed::parse("3"), None);
        assert_eq!(PlaybackSpeed::parse("fast"), None);
    }
}
