//! Rate-limited batch execution.
//!
//! The mail service throttles bursts, so large sets of calls are issued in
//! fixed-size groups: every call of a group is in flight together, groups run
//! one after another, and a pause separates consecutive groups.

use std::future::Future;
use std::time::Duration;

use futures::future::try_join_all;

/// Runs operations in sequential, fixed-size, concurrently issued groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitedBatcher {
    group_size: usize,
    delay: Duration,
}

impl RateLimitedBatcher {
    /// Creates a batcher. A group size of zero is treated as one.
    pub fn new(group_size: usize, delay: Duration) -> Self {
        Self {
            group_size: group_size.max(1),
            delay,
        }
    }

    /// Creates a batcher that does not pause between groups.
    pub fn without_delay(group_size: usize) -> Self {
        Self::new(group_size, Duration::ZERO)
    }

    /// Maximum operations per group.
    pub fn group_size(&self) -> usize {
        self.group_size
    }

    /// Number of groups `count` operations are split into.
    pub fn group_count(&self, count: usize) -> usize {
        count.div_ceil(self.group_size)
    }

    /// Runs `op` on every item and returns the results in input order.
    ///
    /// `on_group` is called after each group with the number of operations
    /// completed so far and the total. The first failing group aborts the
    /// call; later groups are never issued.
    pub async fn run<I, T, E, F, Fut>(
        &self,
        items: Vec<I>,
        op: F,
        mut on_group: impl FnMut(usize, usize),
    ) -> Result<Vec<T>, E>
    where
        F: Fn(I) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let total = items.len();
        let groups = self.group_count(total);
        let mut results = Vec::with_capacity(total);
        let mut items = items.into_iter();

        for index in 0..groups {
            if index > 0 && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            let group: Vec<I> = items.by_ref().take(self.group_size).collect();
            tracing::debug!(group = index + 1, of = groups, size = group.len(), "Issuing group");

            results.extend(try_join_all(group.into_iter().map(&op)).await?);
            on_group(results.len(), total);
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::time::Instant;

    #[test]
    fn group_count_rounds_up() {
        let batcher = RateLimitedBatcher::without_delay(50);
        assert_eq!(batcher.group_count(0), 0);
        assert_eq!(batcher.group_count(50), 1);
        assert_eq!(batcher.group_count(73), 2);
        assert_eq!(RateLimitedBatcher::without_delay(0).group_size(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn seventy_three_items_make_two_groups_and_one_delay() {
        let batcher = RateLimitedBatcher::new(50, Duration::from_millis(1000));
        let start = Instant::now();
        let issued = Mutex::new(Vec::new());
        let mut groups = Vec::new();

        let results: Vec<usize> = batcher
            .run(
                (0..73).collect(),
                |i: usize| {
                    issued.lock().unwrap().push((i, start.elapsed()));
                    async move { Ok::<_, ()>(i * 2) }
                },
                |done, total| groups.push((done, total)),
            )
            .await
            .unwrap();

        assert_eq!(results, (0..73).map(|i| i * 2).collect::<Vec<_>>());
        assert_eq!(groups, vec![(50, 73), (73, 73)]);

        let issued = issued.into_inner().unwrap();
        assert!(issued[..50].iter().all(|(_, at)| *at == Duration::ZERO));
        let second_group = Duration::from_millis(1000)..Duration::from_millis(1100);
        assert!(issued[50..]
            .iter()
            .all(|(_, at)| second_group.contains(at)));
        assert!(second_group.contains(&start.elapsed()));
    }

    #[tokio::test(start_paused = true)]
    async fn no_trailing_delay_for_single_group() {
        let batcher = RateLimitedBatcher::new(50, Duration::from_secs(1));
        let start = Instant::now();

        let results = batcher
            .run(vec![1, 2, 3], |i: i32| async move { Ok::<_, ()>(i) }, |_, _| {})
            .await
            .unwrap();

        assert_eq!(results, vec![1, 2, 3]);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn failing_group_stops_later_groups() {
        let batcher = RateLimitedBatcher::without_delay(2);
        let calls = Mutex::new(0);

        let result = batcher
            .run(
                vec![1, 2, 3, 4, 5],
                |i: i32| {
                    *calls.lock().unwrap() += 1;
                    async move {
                        if i == 2 {
                            Err("boom")
                        } else {
                            Ok(i)
                        }
                    }
                },
                |_, _| {},
            )
            .await;

        assert_eq!(result, Err("boom"));
        assert_eq!(*calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn empty_input_issues_nothing() {
        let batcher = RateLimitedBatcher::without_delay(25);
        let mut groups = 0;
        let results: Vec<i32> = batcher
            .run(Vec::<i32>::new(), |i| async move { Ok::<_, ()>(i) }, |_, _| groups += 1)
            .await
            .unwrap();
        assert!(results.is_empty());
        assert_eq!(groups, 0);
    }
}
