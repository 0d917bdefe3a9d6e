use crate::connection::{Error, OpenSibling, Transport};
use std::time::Duration;
use tracing::{debug, warn};

pub const MAX_ATTEMPTS: u32 = 3;
pub const RETRY_DELAY: Duration = Duration::from_millis(1500);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of tries, including the first one.
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy { max_attempts: MAX_ATTEMPTS, delay: RETRY_DELAY }
    }
}

/// A [`Transport`] that repeats failed transactions.
///
/// Every register operation is attempted up to `max_attempts` times, sleeping `delay` after each
/// failure. Errors that would come back the same on every attempt are returned immediately.
pub struct Retrying<T> {
    inner: T,
    policy: RetryPolicy,
}

impl<T> Retrying<T> {
    pub fn new(inner: T, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    async fn attempt<R>(
        &mut self,
        what: &'static str,
        mut operation: impl AsyncFnMut(&mut T) -> Result<R, Error>,
    ) -> Result<R, Error> {
        let mut attempt = 1;
        loop {
            match operation(&mut self.inner).await {
                Ok(result) => return Ok(result),
                Err(error) if attempt < self.policy.max_attempts && error.is_retryable() => {
                    warn!(
                        message = "transaction failed, will retry",
                        what,
                        attempt,
                        error = (&error as &dyn std::error::Error)
                    );
                    tokio::time::sleep(self.policy.delay).await;
                    attempt += 1;
                }
                Err(error) => {
                    debug!(message = "giving up", what, attempt);
                    return Err(error);
                }
            }
        }
    }
}

impl<T: Transport> Retrying<T> {
    /// Reads up to `count` input registers, accepting a reply that stops short.
    ///
    /// Only a reply carrying more than `count` words is treated as a failed attempt.
    pub async fn read_input_registers_up_to(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, Error> {
        self.attempt("read input registers", async |inner: &mut T| {
            let values = inner.read_input_registers(address, count).await?;
            if values.len() > usize::from(count) {
                return Err(Error::UnexpectedResponse("register count"));
            }
            Ok(values)
        })
        .await
    }
}

impl<T: Transport> Transport for Retrying<T> {
    /// A reply that does not carry exactly `count` words is a failed attempt.
    async fn read_input_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>, Error> {
        self.attempt("read input registers", async |inner: &mut T| {
            let values = inner.read_input_registers(address, count).await?;
            if values.len() != usize::from(count) {
                return Err(Error::UnexpectedResponse("register count"));
            }
            Ok(values)
        })
        .await
    }

    async fn write_holding_register(&mut self, address: u16, value: u16) -> Result<(), Error> {
        self.attempt("write holding register", async |inner: &mut T| {
            inner.write_holding_register(address, value).await
        })
        .await
    }

    async fn write_holding_registers(&mut self, address: u16, values: &[u16]) -> Result<(), Error> {
        self.attempt("write holding registers", async |inner: &mut T| {
            inner.write_holding_registers(address, values).await
        })
        .await
    }
}

impl<T: OpenSibling> OpenSibling for Retrying<T> {
    fn slave_address(&self) -> u8 {
        self.inner.slave_address()
    }

    fn open_sibling(&self, slave_address: u8) -> Result<Self, Error> {
        Ok(Retrying::new(self.inner.open_sibling(slave_address)?, self.policy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use tokio::time::Instant;

    /// Answers reads from a script of outcomes, recording when each attempt was made.
    struct Scripted {
        outcomes: VecDeque<Result<Vec<u16>, Error>>,
        attempts: Vec<Instant>,
    }

    impl Scripted {
        fn new(outcomes: impl IntoIterator<Item = Result<Vec<u16>, Error>>) -> Self {
            Scripted { outcomes: outcomes.into_iter().collect(), attempts: Vec::new() }
        }
    }

    impl Transport for Scripted {
        async fn read_input_registers(&mut self, _: u16, _: u16) -> Result<Vec<u16>, Error> {
            self.attempts.push(Instant::now());
            self.outcomes.pop_front().unwrap_or(Err(Error::Closed))
        }

        async fn write_holding_register(&mut self, _: u16, _: u16) -> Result<(), Error> {
            self.read_input_registers(0, 1).await.map(drop)
        }

        async fn write_holding_registers(&mut self, _: u16, _: &[u16]) -> Result<(), Error> {
            self.read_input_registers(0, 1).await.map(drop)
        }
    }

    fn timeout() -> Error {
        Error::Timeout(Duration::from_secs(1))
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_three_attempts() {
        let mut transport = Retrying::new(
            Scripted::new([Err(timeout()), Err(timeout()), Err(timeout()), Ok(vec![1])]),
            RetryPolicy::default(),
        );
        let started = Instant::now();
        let error = transport.read_input_registers(0, 1).await.unwrap_err();
        assert!(matches!(error, Error::Timeout(_)));
        let attempts = &transport.get_ref().attempts;
        assert_eq!(attempts.len(), 3);
        assert_eq!(attempts[1] - attempts[0], RETRY_DELAY);
        assert_eq!(attempts[2] - attempts[1], RETRY_DELAY);
        // no delay after the final failure
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_within_the_attempt_budget() {
        let mut transport = Retrying::new(
            Scripted::new([Err(timeout()), Err(Error::Closed), Ok(vec![7, 8])]),
            RetryPolicy::default(),
        );
        assert_eq!(transport.read_input_registers(0, 2).await.unwrap(), [7, 8]);
        assert_eq!(transport.get_ref().attempts.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn wrong_register_count_is_retried() {
        let mut transport = Retrying::new(
            Scripted::new([Ok(vec![0; 5]), Ok(vec![0; 7]), Ok(vec![0; 5]), Ok(vec![0; 6])]),
            RetryPolicy::default(),
        );
        let error = transport.read_input_registers(0, 6).await.unwrap_err();
        assert!(matches!(error, Error::UnexpectedResponse("register count")));
        assert_eq!(transport.get_ref().attempts.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn short_reply_recovers_on_retry() {
        let mut transport = Retrying::new(
            Scripted::new([Ok(vec![0; 5]), Ok(vec![1, 2, 3, 4, 5, 6])]),
            RetryPolicy::default(),
        );
        assert_eq!(transport.read_input_registers(0, 6).await.unwrap(), [1, 2, 3, 4, 5, 6]);
        assert_eq!(transport.get_ref().attempts.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn partial_read_accepts_a_short_reply() {
        let mut transport = Retrying::new(
            Scripted::new([Ok(vec![0; 7]), Ok(vec![0; 4])]),
            RetryPolicy::default(),
        );
        assert_eq!(transport.read_input_registers_up_to(0, 6).await.unwrap().len(), 4);
        assert_eq!(transport.get_ref().attempts.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn illegal_address_is_not_retried() {
        let mut transport = Retrying::new(
            Scripted::new([Err(Error::Exception(2)), Ok(vec![1])]),
            RetryPolicy::default(),
        );
        let error = transport.write_holding_register(0, 1).await.unwrap_err();
        assert!(matches!(error, Error::Exception(2)));
        assert_eq!(transport.get_ref().attempts.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn busy_device_is_retried() {
        let mut transport = Retrying::new(
            Scripted::new([Err(Error::Exception(6)), Ok(vec![1])]),
            RetryPolicy { max_attempts: 2, delay: Duration::from_millis(10) },
        );
        transport.write_holding_registers(0, &[1, 2]).await.unwrap();
        assert_eq!(transport.into_inner().attempts.len(), 2);
    }
}
