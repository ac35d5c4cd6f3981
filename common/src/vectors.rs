//  Copyright (c) Facebook, Inc. and its affiliates.
//  SPDX-License-Identifier: Apache-2.0

use std::collections::HashSet;
use std::hash::Hash;

use rayon::prelude::ParallelSliceMut;

/// Mask of true/false depending on whether the item of `a` is in `b`
pub fn vec_intersection_mask<T>(a: &[T], b: &[T]) -> Vec<bool>
where
    T: Hash + Eq,
{
    let s = b.iter().collect::<HashSet<&T>>();
    a.iter().map(|e| s.contains(e)).collect::<Vec<bool>>()
}

/// Number of items of `a` present in `b`
pub fn count_covered<T>(a: &[T], b: &[T]) -> usize
where
    T: Hash + Eq,
{
    vec_intersection_mask(a, b).iter().filter(|x| **x).count()
}

/// Returns the elements of `v` whose corresponding mask entry is set
pub fn apply_mask<T>(mask: &[bool], v: &[T]) -> Vec<T>
where
    T: Clone,
{
    assert_eq!(
        mask.len(),
        v.len(),
        "masked vectors should have the same shape"
    );
    v.iter()
        .zip(mask.iter())
        .filter(|(_, &b)| b)
        .map(|(e, &_)| e.clone())
        .collect::<Vec<T>>()
}

/// De-duplicates the vector in place, leaving it sorted.
///
/// Switches to the parallel sort for inputs larger than 1M records when
/// `allow_parallel` is set.
///
/// ## Example
///
/// ```
/// use common::vectors;
///
/// let mut v = vec![1, 2, 3, 1, 1];
/// vectors::dedup_unstable(&mut v, true);
///
/// assert_eq!(v, vec![1, 2, 3]);
/// ```
pub fn dedup_unstable<T>(v: &mut Vec<T>, allow_parallel: bool)
where
    T: Ord + Send,
{
    const LARGE_INPUT: usize = 1000000;
    if !allow_parallel || v.len() < LARGE_INPUT {
        debug!("Using sequential dedup for {} items", v.len());
        v.sort_unstable()
    } else {
        debug!("Using parallel dedup for {} items", v.len());
        v.par_sort_unstable();
    }
    v.dedup();
}

/// Sorts by key and drops later entries with a repeated key.
///
/// Returns the number of dropped entries.
pub fn dedup_by_key<T, K, F>(v: &mut Vec<T>, key: F) -> usize
where
    T: Send,
    K: Ord,
    F: Fn(&T) -> K + Sync,
{
    let before = v.len();
    v.par_sort_by(|a, b| key(a).cmp(&key(b)));
    v.dedup_by(|a, b| key(a) == key(b));
    before - v.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_mask() {
        let a = vec![1, 2, 3];
        let b = vec![2, 3];
        assert_eq!(vec_intersection_mask(&a, &b), vec![false, true, true]);
        assert_eq!(vec_intersection_mask(&b, &a), vec![true, true]);
        assert_eq!(count_covered(&a, &b), 2);
        assert_eq!(count_covered(&a, &[]), 0);

        let m = vec_intersection_mask(&a, &b);
        let a2: Vec<i32> = apply_mask(&m, &a);
        assert_eq!(a2, vec![2, 3]);
    }

    #[test]
    #[should_panic]
    fn test_mask_shape() {
        apply_mask(&[true], &[1, 2]);
    }

    #[test]
    fn test_dedup() {
        let mut v = vec![1, 2, 3, 1, 1];
        dedup_unstable(&mut v, true);
        assert_eq!(v, vec![1, 2, 3]);

        let mut v2: Vec<i8> = vec![];
        dedup_unstable(&mut v2, true);
        assert_eq!(v2, Vec::<i8>::new());

        let mut v3: Vec<i8> = vec![1, 1, 1, 1, 1];
        dedup_unstable(&mut v3, false);
        assert_eq!(v3, vec![1]);
    }

    #[test]
    fn test_dedup_by_key_keeps_first() {
        let mut v = vec![(2, "b"), (1, "a"), (2, "c"), (1, "d")];
        let dropped = dedup_by_key(&mut v, |x| x.0);
        assert_eq!(dropped, 2);
        // stable sort keeps original order among equal keys
        assert_eq!(v, vec![(1, "a"), (2, "b")]);
    }
}
