//! Fan-out of multi-key operations across owners.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;

use futures::future::join_all;
use hotrod_core::Result;
use tracing::debug;

/// Groups `items` by the owner `owner_of` assigns them.
///
/// Items without a known owner gather in the `None` group. The groups
/// partition the input exactly: every item lands in exactly one group and
/// none are dropped or duplicated.
pub fn partition_by_owner<T, F>(items: Vec<T>, owner_of: F) -> Vec<(Option<SocketAddr>, Vec<T>)>
where
    F: Fn(&T) -> Option<SocketAddr>,
{
    let mut groups: HashMap<Option<SocketAddr>, Vec<T>> = HashMap::new();
    for item in items {
        groups.entry(owner_of(&item)).or_default().push(item);
    }
    groups.into_iter().collect()
}

/// Runs one sub-operation per group and collects every result.
///
/// A single group runs inline with no spawn overhead. With several groups
/// all sub-operations are issued concurrently and all are awaited; a
/// failing sibling does not cancel the others, their work on the servers
/// happens regardless and letting them drain keeps the channels in a known
/// state. The first error (in group order) becomes the combined outcome.
pub async fn execute_grouped<T, R, F, Fut>(
    groups: Vec<(Option<SocketAddr>, Vec<T>)>,
    run: F,
) -> Result<Vec<R>>
where
    F: Fn(Option<SocketAddr>, Vec<T>) -> Fut,
    Fut: Future<Output = Result<R>>,
{
    if groups.len() == 1 {
        let mut groups = groups;
        let (target, items) = match groups.pop() {
            Some(group) => group,
            None => return Ok(Vec::new()),
        };
        return Ok(vec![run(target, items).await?]);
    }
    debug!(groups = groups.len(), "fanning out bulk operation");
    let futures: Vec<_> = groups
        .into_iter()
        .map(|(target, items)| run(target, items))
        .collect();
    let outcomes = join_all(futures).await;
    let mut results = Vec::with_capacity(outcomes.len());
    for outcome in outcomes {
        results.push(outcome?);
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hotrod_core::HotRodError;
    use std::collections::HashSet;

    fn addr(n: u8) -> SocketAddr {
        format!("10.0.0.{n}:11222").parse().unwrap()
    }

    #[test]
    fn test_partition_is_exact() {
        let keys: Vec<u32> = (0..30).collect();
        let groups = partition_by_owner(keys.clone(), |k| match k % 3 {
            0 => Some(addr(1)),
            1 => Some(addr(2)),
            _ => None,
        });
        assert_eq!(groups.len(), 3);
        let mut seen: Vec<u32> = groups.iter().flat_map(|(_, g)| g.iter().copied()).collect();
        seen.sort_unstable();
        assert_eq!(seen, keys);

        let targets: HashSet<_> = groups.iter().map(|(t, _)| *t).collect();
        assert!(targets.contains(&Some(addr(1))));
        assert!(targets.contains(&None));
    }

    #[tokio::test]
    async fn test_single_group_runs_inline() {
        let groups = vec![(Some(addr(1)), vec![1, 2, 3])];
        let results = execute_grouped(groups, |target, items| async move {
            assert_eq!(target, Some(addr(1)));
            Ok::<usize, HotRodError>(items.len())
        })
        .await
        .unwrap();
        assert_eq!(results, vec![3]);
    }

    #[tokio::test]
    async fn test_multi_group_awaits_all() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let completed = Arc::new(AtomicUsize::new(0));
        let groups = vec![
            (Some(addr(1)), vec![1]),
            (Some(addr(2)), vec![2]),
            (Some(addr(3)), vec![3]),
        ];
        let completed_ref = Arc::clone(&completed);
        let result = execute_grouped(groups, move |target, items| {
            let completed = Arc::clone(&completed_ref);
            async move {
                completed.fetch_add(1, Ordering::SeqCst);
                if target == Some(addr(2)) {
                    Err(HotRodError::Transport("down".to_string()))
                } else {
                    Ok(items.len())
                }
            }
        })
        .await;
        // The failure surfaces, but every sibling still ran to completion.
        assert!(result.is_err());
        assert_eq!(completed.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let groups: Vec<(Option<SocketAddr>, Vec<u32>)> = Vec::new();
        let results = execute_grouped(groups, |_, items| async move {
            Ok::<usize, HotRodError>(items.len())
        })
        .await
        .unwrap();
        assert!(results.is_empty());
    }
}
