use std::time::{Duration, Instant};

/// Wall-clock timer for inspection phases. The elapsed time ends up both in
/// the module bundle (as a raw `Duration`) and in log lines (humanized).
pub struct Stopwatch {
    started_at: Instant,
}

impl Stopwatch {
    pub fn start_new() -> Stopwatch {
        return Stopwatch {
            started_at: Instant::now(),
        };
    }

    pub fn elapsed(&self) -> Duration {
        return self.started_at.elapsed();
    }

    /// Elapsed time for log lines, truncated to milliseconds so the output
    /// does not carry nanosecond noise ("2s 340ms", not "2s 340ms 17us").
    pub fn elapsed_human(&self) -> String {
        let millis = Duration::from_millis(self.elapsed().as_millis() as u64);
        return humantime::format_duration(millis).to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elapsed_human_has_no_sub_milli_noise() {
        let stopwatch = Stopwatch::start_new();
        std::thread::sleep(Duration::from_millis(5));
        let human = stopwatch.elapsed_human();
        assert!(!human.contains("us"), "unexpected precision: {}", human);
        assert!(!human.contains("ns"), "unexpected precision: {}", human);
        assert!(stopwatch.elapsed() >= Duration::from_millis(5));
    }
}
