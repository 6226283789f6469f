// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use time::OffsetDateTime;
use time::macros::format_description;

use crate::app::ports::ClockPort;

pub fn format_run_id(at: OffsetDateTime) -> String {
    let stamp = at
        .format(format_description!(
            "[year][month][day]_[hour][minute][second]"
        ))
        .unwrap_or_else(|_| at.unix_timestamp().to_string());
    format!("run_{stamp}")
}

/// Issues `run_<YYYYMMDD_HHMMSS>` identifiers. A second run of the same
/// project within the same second gets `_2`, `_3`, ... appended.
pub struct RunIdGenerator {
    clock: Arc<dyn ClockPort>,
    issued: Mutex<HashMap<String, (String, u32)>>,
}

impl RunIdGenerator {
    pub fn new(clock: Arc<dyn ClockPort>) -> Self {
        Self {
            clock,
            issued: Mutex::new(HashMap::new()),
        }
    }

    pub fn next(&self, project: &str) -> String {
        let base = format_run_id(self.clock.now_utc());
        let mut issued = match self.issued.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match issued.get_mut(project) {
            Some((last, count)) if *last == base => {
                *count += 1;
                format!("{base}_{count}")
            }
            _ => {
                issued.insert(project.to_string(), (base.clone(), 1));
                base
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    struct FixedClock(Mutex<OffsetDateTime>);

    impl ClockPort for FixedClock {
        fn now_utc(&self) -> OffsetDateTime {
            *self.0.lock().unwrap()
        }
    }

    #[test]
    fn formats_timestamp() {
        assert_eq!(
            format_run_id(datetime!(2025-03-07 09:05:01 UTC)),
            "run_20250307_090501"
        );
    }

    #[test]
    fn same_second_runs_get_distinct_ids() {
        let clock = Arc::new(FixedClock(Mutex::new(datetime!(2025-03-07 09:05:01 UTC))));
        let ids = RunIdGenerator::new(clock.clone());
        assert_eq!(ids.next("demo"), "run_20250307_090501");
        assert_eq!(ids.next("demo"), "run_20250307_090501_2");
        assert_eq!(ids.next("demo"), "run_20250307_090501_3");
        assert_eq!(ids.next("other"), "run_20250307_090501");

        *clock.0.lock().unwrap() = datetime!(2025-03-07 09:05:02 UTC);
        assert_eq!(ids.next("demo"), "run_20250307_090502");
    }
}
