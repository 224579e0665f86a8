use rand::Rng;

/// Shuffles an iterator through a bounded buffer.
///
/// The buffer is filled with the first `size` elements, every call yields a random element of
/// the buffer and refills its slot with the next input element. A buffer at least as big as the
/// input yields a uniform permutation.
pub struct Shuffle<I: Iterator, R: Rng> {
    inner: I,
    buf: Vec<I::Item>,
    size: usize,
    rng: R,
}

impl<I: Iterator, R: Rng> Shuffle<I, R> {
    /// Creates a new `Shuffle`.
    ///
    /// # Arguments
    /// * `inner` - The iterator to shuffle.
    /// * `size` - The maximum amount of buffered elements, at least 1.
    /// * `rng` - The source of randomness.
    pub fn new(inner: I, size: usize, rng: R) -> Self {
        let size = size.max(1);

        Self {
            inner,
            buf: Vec::with_capacity(size.min(1 << 16)),
            size,
            rng,
        }
    }
}

impl<I: Iterator, R: Rng> Iterator for Shuffle<I, R> {
    type Item = I::Item;

    fn next(&mut self) -> Option<Self::Item> {
        while self.buf.len() < self.size {
            match self.inner.next() {
                Some(item) => self.buf.push(item),
                None => break,
            }
        }

        if self.buf.is_empty() {
            return None;
        }

        let i = self.rng.random_range(0..self.buf.len());
        Some(self.buf.swap_remove(i))
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    #[test]
    fn yields_a_permutation() {
        let mut out: Vec<_> = Shuffle::new(0..100, 10, StdRng::seed_from_u64(0)).collect();
        assert_ne!(out, (0..100).collect::<Vec<_>>());

        out.sort();
        assert_eq!(out, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn buffer_of_one_keeps_the_order() {
        let out: Vec<_> = Shuffle::new(0..5, 1, StdRng::seed_from_u64(0)).collect();
        assert_eq!(out, [0, 1, 2, 3, 4]);
    }

    #[test]
    fn small_buffer_bounds_the_displacement() {
        let out: Vec<usize> = Shuffle::new(0..50, 3, StdRng::seed_from_u64(9)).collect();

        // the element yielded at position i was read among the first i + 3 inputs
        for (i, x) in out.iter().enumerate() {
            assert!(*x < i + 3, "{out:?}");
        }
    }
}
