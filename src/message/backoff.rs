use std::time::Duration;

/// An infinite stream of delays for retrying a failed operation. Each delay
/// is `factor` times the previous one, up to a maximum, after which the
/// maximum repeats. Use `take(n)` to bound the number of attempts.
///
pub struct ExponentialBackoff {
    next: Duration,
    max: Duration,
    factor: u32,
}

impl ExponentialBackoff {
    pub fn new(start: Duration, max: Duration, factor: u32) -> ExponentialBackoff {
        ExponentialBackoff {
            next: start,
            max,
            factor,
        }
    }
}

impl Iterator for ExponentialBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next;
        self.next = (current * self.factor).min(self.max);
        Some(current)
    }
}

/// Call `f` until it succeeds, sleeping between attempts for the durations
/// given by `delays`. The `on_err` closure sees each failure and the delay
/// that follows it. When the delays run out the last error is returned.
///
pub fn retry<I, F, E, T, S>(delays: I, mut f: F, on_err: S) -> Result<T, E>
where
    I: IntoIterator<Item = Duration>,
    F: FnMut() -> Result<T, E>,
    S: Fn(&E, Duration),
{
    let mut delays = delays.into_iter();

    loop {
        match f() {
            Ok(value) => return Ok(value),
            Err(e) => match delays.next() {
                Some(delay) => {
                    on_err(&e, delay);
                    std::thread::sleep(delay);
                }
                None => return Err(e),
            },
        }
    }
}
