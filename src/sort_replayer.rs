use crate::error::{ConvoyError, Result};

/// Records the permutation a stable sort applied, so results computed against
/// the sorted view can be put back into the original order.
///
/// The aggregate action of a counted controller runs over sorted inputs; its
/// output is positional against that sorted view. Replaying the permutation
/// backwards realigns the output with the arrival snapshot, which keeps equal
/// keys in their original order (stable sort).
pub struct SortReplayer {
    // permutation[i] = original index of the i-th element of the sorted view
    permutation: Vec<usize>,
}

impl SortReplayer {
    /// Record the stable-sort permutation of `items` by the natural order of `T`
    pub fn new<T: Ord>(items: &[T]) -> Self {
        let mut permutation: Vec<usize> = (0..items.len()).collect();
        permutation.sort_by(|&a, &b| items[a].cmp(&items[b]));
        Self { permutation }
    }

    /// Number of recorded positions
    pub fn len(&self) -> usize {
        self.permutation.len()
    }

    /// Whether the recorded permutation is empty
    pub fn is_empty(&self) -> bool {
        self.permutation.is_empty()
    }

    /// The sorted view of `items` under the recorded permutation
    pub fn sorted<T: Clone>(&self, items: &[T]) -> Vec<T> {
        self.permutation.iter().map(|&i| items[i].clone()).collect()
    }

    /// Put sorted-view results back into original order.
    ///
    /// `sorted_results[i]` lands at the original position the i-th sorted
    /// element came from. Fails when the result count does not match the
    /// recorded permutation.
    pub fn unsort<T>(&self, sorted_results: Vec<T>) -> Result<Vec<T>> {
        if sorted_results.len() != self.permutation.len() {
            return Err(ConvoyError::invariant(format!(
                "sort replayer got {} results for {} recorded positions",
                sorted_results.len(),
                self.permutation.len()
            )));
        }
        let mut slots: Vec<Option<T>> = (0..self.permutation.len()).map(|_| None).collect();
        for (sorted_pos, value) in sorted_results.into_iter().enumerate() {
            slots[self.permutation[sorted_pos]] = Some(value);
        }
        let restored: Vec<T> = slots.into_iter().flatten().collect();
        if restored.len() != self.permutation.len() {
            return Err(ConvoyError::invariant(
                "sort replayer permutation is not a bijection",
            ));
        }
        Ok(restored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_restores_original_order() {
        let items = vec![3, 1, 2];
        let replayer = SortReplayer::new(&items);
        let sorted = replayer.sorted(&items);
        assert_eq!(sorted, vec![1, 2, 3]);

        let restored = replayer.unsort(sorted).unwrap();
        assert_eq!(restored, items);
    }

    #[test]
    fn test_results_follow_the_permutation() {
        // inputs arrive out of order; results are positional on the sorted view
        let items = vec!["b".to_string(), "a".to_string()];
        let replayer = SortReplayer::new(&items);
        assert_eq!(replayer.sorted(&items), vec!["a".to_string(), "b".to_string()]);

        let results = vec!["result_a".to_string(), "result_b".to_string()];
        let unsorted = replayer.unsort(results).unwrap();
        // "b" arrived first, so it receives the result computed for "b"
        assert_eq!(unsorted, vec!["result_b".to_string(), "result_a".to_string()]);
    }

    #[test]
    fn test_equal_keys_keep_arrival_order() {
        let items = vec![(1, "first"), (1, "second"), (0, "third")];
        let keys: Vec<i32> = items.iter().map(|(k, _)| *k).collect();
        let replayer = SortReplayer::new(&keys);
        let sorted = replayer.sorted(&items);
        // stable sort: the two equal keys stay in arrival order
        assert_eq!(sorted, vec![(0, "third"), (1, "first"), (1, "second")]);

        let restored = replayer.unsort(sorted).unwrap();
        assert_eq!(restored, items);
    }

    #[test]
    fn test_wrong_size_is_rejected() {
        let replayer = SortReplayer::new(&[1, 2, 3]);
        let err = replayer.unsort(vec![1, 2]).unwrap_err();
        assert!(matches!(err, ConvoyError::InternalInvariant { .. }));
    }

    #[test]
    fn test_empty() {
        let replayer = SortReplayer::new::<i32>(&[]);
        assert!(replayer.is_empty());
        assert_eq!(replayer.unsort(Vec::<i32>::new()).unwrap(), Vec::<i32>::new());
    }
}
