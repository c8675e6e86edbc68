use std::time::Duration;

use tokio::time::{interval_at, Instant, Interval};

pub(crate) const TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerSignal {
    Tick { remaining: u32 },
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CountdownState {
    Running,
    Expired,
    Stopped,
}

/// Second-granularity countdown pinned when the test goes live.
///
/// `tick` is driven by the session loop; once the countdown expires or is stopped every
/// further tick is ignored, so the expiry signal is raised at most once.
#[derive(Debug, Clone)]
pub struct Countdown {
    total: u32,
    remaining: u32,
    state: CountdownState,
}

impl Countdown {
    pub fn start(total_seconds: u32) -> Self {
        Self { total: total_seconds, remaining: total_seconds, state: CountdownState::Running }
    }

    pub fn tick(&mut self) -> Option<TimerSignal> {
        if self.state != CountdownState::Running {
            return None;
        }

        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            self.state = CountdownState::Expired;
            return Some(TimerSignal::Expired);
        }
        Some(TimerSignal::Tick { remaining: self.remaining })
    }

    pub fn stop(&mut self) {
        if self.state == CountdownState::Running {
            self.state = CountdownState::Stopped;
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == CountdownState::Running
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn elapsed(&self) -> u32 {
        self.total - self.remaining
    }
}

/// One-second ticker whose first tick lands a full second after creation.
pub(crate) fn ticker() -> Interval {
    interval_at(Instant::now() + TICK, TICK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_minute_expires_exactly_once_after_sixty_ticks() {
        let mut countdown = Countdown::start(60);
        let signals: Vec<_> = (0..75).filter_map(|_| countdown.tick()).collect();

        assert_eq!(signals.len(), 60);
        assert_eq!(signals[0], TimerSignal::Tick { remaining: 59 });
        assert_eq!(signals[58], TimerSignal::Tick { remaining: 1 });
        assert_eq!(signals.iter().filter(|signal| **signal == TimerSignal::Expired).count(), 1);
        assert_eq!(signals.last(), Some(&TimerSignal::Expired));
        assert_eq!(countdown.remaining(), 0);
        assert_eq!(countdown.elapsed(), 60);
        assert!(!countdown.is_running());
    }

    #[test]
    fn stopped_countdown_ignores_ticks() {
        let mut countdown = Countdown::start(120);
        countdown.tick();
        countdown.tick();
        countdown.stop();

        assert_eq!(countdown.tick(), None);
        assert_eq!(countdown.remaining(), 118);
        assert_eq!(countdown.elapsed(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_waits_a_full_second_before_first_tick() {
        let started = Instant::now();
        let mut ticker = ticker();

        ticker.tick().await;
        assert_eq!(started.elapsed(), TICK);
        ticker.tick().await;
        assert_eq!(started.elapsed(), TICK * 2);
    }
}
