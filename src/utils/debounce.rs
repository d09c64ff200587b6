use std::time::{Duration, Instant};

/// Coalesces bursts of values, keeping only the last one.
///
/// A value becomes ready once no newer value arrived for `delay`.
#[derive(Debug)]
pub struct Debounce<T> {
    delay: Duration,
    pending: Option<(T, Instant)>,
}

impl<T> Debounce<T> {
    pub fn new(delay: Duration) -> Self {
        Self { delay, pending: None }
    }

    pub fn push(&mut self, value: T, now: Instant) {
        self.pending = Some((value, now));
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Takes the settled value, if the quiet period has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<T> {
        let (_, at) = self.pending.as_ref()?;
        if now.saturating_duration_since(*at) < self.delay {
            return None;
        }
        self.pending.take().map(|(value, _)| value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_the_last_value() {
        let start = Instant::now();
        let mut resize = Debounce::new(Duration::from_millis(150));
        resize.push((800, 600), start);
        resize.push((1024, 768), start + Duration::from_millis(100));

        assert_eq!(resize.poll(start + Duration::from_millis(200)), None);
        assert_eq!(resize.poll(start + Duration::from_millis(250)), Some((1024, 768)));
        assert!(!resize.is_pending());
        assert_eq!(resize.poll(start + Duration::from_secs(1)), None);
    }
}
