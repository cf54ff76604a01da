//! Ordered container over a fixed, construction-time key set.
//!
//! Unlike a general map, a `KeyedContainer`'s keys never change after construction —
//! every per-channel accumulator slot in the pipeline is allocated once, up front, from
//! `cfg.enabled_channels`, and looked up by key for the rest of the run.

#[derive(Debug, Clone)]
pub struct KeyedContainer<K, V> {
    keys: Vec<K>,
    values: Vec<V>,
}

impl<K: Ord + Clone, V> KeyedContainer<K, V> {
    /// Sorts and dedups `keys`, then constructs one `V` per key by calling `ctor` with a
    /// clone of `args` — every value built in place, in key order.
    pub fn from_keys_with<A: Clone>(
        keys: impl IntoIterator<Item = K>,
        args: A,
        ctor: impl Fn(A) -> V,
    ) -> Self {
        let mut keys: Vec<K> = keys.into_iter().collect();
        keys.sort();
        keys.dedup();
        let values = keys.iter().map(|_| ctor(args.clone())).collect();
        Self { keys, values }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &[K] {
        &self.keys
    }

    fn index_of(&self, key: &K) -> Option<usize> {
        self.keys.binary_search(key).ok()
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.index_of(key).map(|i| &self.values[i])
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        match self.index_of(key) {
            Some(i) => Some(&mut self.values[i]),
            None => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.keys.iter().zip(self.values.iter())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&K, &mut V)> {
        self.keys.iter().zip(self.values.iter_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_sorted_and_deduped() {
        let c: KeyedContainer<u32, u32> =
            KeyedContainer::from_keys_with([3, 1, 2, 1], 0u32, |seed| seed);
        assert_eq!(c.keys(), &[1, 2, 3]);
        assert_eq!(c.len(), 3);
    }

    #[test]
    fn values_constructed_from_forwarded_args() {
        let c: KeyedContainer<u32, Vec<i32>> =
            KeyedContainer::from_keys_with([0, 1], vec![9, 9], |args| args);
        assert_eq!(c.get(&0), Some(&vec![9, 9]));
        assert_eq!(c.get(&1), Some(&vec![9, 9]));
        assert_eq!(c.get(&2), None);
    }

    #[test]
    fn iteration_is_ascending_by_key() {
        let c: KeyedContainer<u32, u32> =
            KeyedContainer::from_keys_with([5, 0, 2], 0u32, |_| 0);
        let keys: Vec<u32> = c.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec![0, 2, 5]);
    }

    #[test]
    fn get_mut_allows_in_place_updates() {
        let mut c: KeyedContainer<u32, u32> =
            KeyedContainer::from_keys_with([0, 1], 0u32, |_| 0);
        *c.get_mut(&1).unwrap() = 42;
        assert_eq!(c.get(&1), Some(&42));
    }
}
