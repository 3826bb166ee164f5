use gleaner_core::config::AntiDetectionSection;
use std::time::Duration;

// Common desktop user agents
const USER_AGENTS: [&str; 4] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
];

// Common viewport sizes
const VIEWPORTS: [(u32, u32); 4] = [(1920, 1080), (1366, 768), (1536, 864), (1440, 900)];

// Timezone and locale go together so the pair stays plausible
const REGIONS: [(&str, &str); 4] = [
    ("America/New_York", "en-US"),
    ("America/Chicago", "en-US"),
    ("Europe/London", "en-GB"),
    ("Europe/Berlin", "de-DE"),
];

/// Client fingerprint for one session, with the pacing between page actions.
#[derive(Debug, Clone)]
pub struct AntiDetectionProfile {
    pub user_agent: String,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub timezone: String,
    pub locale: String,
    pub min_action_delay: Duration,
    pub max_action_delay: Duration,
    rng: fastrand::Rng,
}

impl AntiDetectionProfile {
    /// Generate a randomized profile
    pub fn randomized() -> Self {
        Self::with_rng(fastrand::Rng::new())
    }

    /// Same seed, same profile and delay sequence.
    pub fn from_seed(seed: u64) -> Self {
        Self::with_rng(fastrand::Rng::with_seed(seed))
    }

    fn with_rng(mut rng: fastrand::Rng) -> Self {
        let user_agent = USER_AGENTS[rng.usize(..USER_AGENTS.len())];
        let (width, height) = VIEWPORTS[rng.usize(..VIEWPORTS.len())];
        let (timezone, locale) = REGIONS[rng.usize(..REGIONS.len())];
        let defaults = AntiDetectionSection::default();

        Self {
            user_agent: user_agent.to_string(),
            viewport_width: width,
            viewport_height: height,
            timezone: timezone.to_string(),
            locale: locale.to_string(),
            min_action_delay: Duration::from_millis(defaults.min_action_delay_ms),
            max_action_delay: Duration::from_millis(defaults.max_action_delay_ms),
            rng,
        }
    }

    pub fn with_delay_range(mut self, min: Duration, max: Duration) -> Self {
        self.min_action_delay = min.min(max);
        self.max_action_delay = max.max(min);
        self
    }

    pub fn with_section(self, section: &AntiDetectionSection) -> Self {
        self.with_delay_range(
            Duration::from_millis(section.min_action_delay_ms),
            Duration::from_millis(section.max_action_delay_ms),
        )
    }

    /// Uniform pick inside the configured delay range.
    pub fn next_action_delay(&mut self) -> Duration {
        let min = self.min_action_delay.as_millis() as u64;
        let max = self.max_action_delay.as_millis() as u64;
        Duration::from_millis(self.rng.u64(min..=max))
    }
}
