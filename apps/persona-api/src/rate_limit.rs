//! Per-user request quotas, one keyed limiter per endpoint tier.

use std::{num::NonZeroU32, time::Duration};

use governor::{
	DefaultKeyedRateLimiter, Quota, RateLimiter,
	clock::{Clock, DefaultClock},
};

use persona_config::RateLimit;

/// Keys tracked per tier before idle users are pruned.
const PRUNE_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
	Upload,
	Expensive,
	Standard,
}

pub struct RateLimits {
	upload: DefaultKeyedRateLimiter<String>,
	expensive: DefaultKeyedRateLimiter<String>,
	standard: DefaultKeyedRateLimiter<String>,
	clock: DefaultClock,
}
impl RateLimits {
	/// Returns `None` when limiting is disabled.
	pub fn from_config(cfg: &RateLimit) -> Option<Self> {
		if !cfg.enabled {
			return None;
		}

		Some(Self {
			upload: keyed(cfg.upload_per_minute),
			expensive: keyed(cfg.expensive_per_minute),
			standard: keyed(cfg.standard_per_minute),
			clock: DefaultClock::default(),
		})
	}

	/// Spends one request from the user's quota. On rejection, returns how long to wait.
	pub fn check(&self, tier: Tier, user_id: &str) -> Result<(), Duration> {
		let limiter = match tier {
			Tier::Upload => &self.upload,
			Tier::Expensive => &self.expensive,
			Tier::Standard => &self.standard,
		};

		if limiter.len() > PRUNE_THRESHOLD {
			limiter.retain_recent();
		}

		limiter
			.check_key(&user_id.to_string())
			.map_err(|not_until| not_until.wait_time_from(self.clock.now()))
	}
}

fn keyed(per_minute: u32) -> DefaultKeyedRateLimiter<String> {
	let per_minute = NonZeroU32::new(per_minute).unwrap_or(NonZeroU32::MIN);

	RateLimiter::keyed(Quota::per_minute(per_minute))
}
