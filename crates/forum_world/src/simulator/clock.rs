use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::persist::{
    default_state_version, read_json_if_exists, validate_version, write_json_atomic, PersistError,
    STATE_VERSION,
};

/// Simulated time. `tick` counts completed ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimClock {
    #[serde(default = "default_state_version")]
    pub version: u32,
    pub sim_time: DateTime<Utc>,
    pub tick: u64,
    pub step_seconds: i64,
}

impl SimClock {
    pub fn new(start: DateTime<Utc>, step_seconds: i64) -> Self {
        Self {
            version: STATE_VERSION,
            sim_time: start,
            tick: 0,
            step_seconds: step_seconds.max(1),
        }
    }

    pub fn step(&self) -> Duration {
        Duration::seconds(self.step_seconds)
    }

    /// Moves one step forward and returns the new tick count.
    pub fn advance(&mut self) -> u64 {
        self.sim_time += self.step();
        self.tick += 1;
        self.tick
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<(), PersistError> {
        write_json_atomic(self, path.as_ref())
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Option<Self>, PersistError> {
        let Some(clock) = read_json_if_exists::<SimClock>(path.as_ref())? else {
            return Ok(None);
        };
        validate_version("sim state", clock.version)?;
        Ok(Some(clock))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn advance_moves_time_and_tick() {
        let start = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let mut clock = SimClock::new(start, 900);
        assert_eq!(clock.advance(), 1);
        assert_eq!(clock.advance(), 2);
        assert_eq!(clock.sim_time, start + Duration::minutes(30));
    }

    #[test]
    fn clock_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sim_state.json");
        let mut clock = SimClock::new(Utc.with_ymd_and_hms(2030, 5, 1, 8, 0, 0).unwrap(), 60);
        clock.advance();
        clock.save_json(&path).unwrap();
        assert_eq!(SimClock::load_json(&path).unwrap(), Some(clock));
        assert_eq!(SimClock::load_json(dir.path().join("none.json")).unwrap(), None);
    }
}
