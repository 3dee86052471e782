use std::collections::VecDeque;

/// Bounded FIFO queue connecting pipeline stages.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fifo<T> {
    inner: VecDeque<T>,
    max_size: Option<usize>,
}

impl<T> std::iter::IntoIterator for Fifo<T> {
    type Item = T;
    type IntoIter = std::collections::vec_deque::IntoIter<Self::Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.into_iter()
    }
}

impl<T> std::fmt::Display for Fifo<T>
where
    T: std::fmt::Display,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Fifo({:>2}/{:<2})",
            self.inner.len(),
            self.max_size
                .map(|max| max.to_string())
                .as_deref()
                .unwrap_or(""),
        )
    }
}

impl<T> Fifo<T> {
    #[must_use]
    pub fn new(max_size: Option<usize>) -> Self {
        Self {
            inner: VecDeque::new(),
            max_size,
        }
    }

    pub fn enqueue(&mut self, value: T) {
        self.inner.push_back(value);
    }

    pub fn dequeue(&mut self) -> Option<T> {
        self.inner.pop_front()
    }

    #[must_use]
    pub fn first(&self) -> Option<&T> {
        self.inner.front()
    }

    #[must_use]
    pub fn full(&self) -> bool {
        match self.max_size {
            Some(max) => self.inner.len() >= max,
            None => false,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    #[must_use]
    pub fn can_fit(&self, n: usize) -> bool {
        match self.max_size {
            Some(max) => self.inner.len() + n <= max,
            None => true,
        }
    }

    #[must_use]
    pub fn iter(&self) -> std::collections::vec_deque::Iter<T> {
        self.inner.iter()
    }
}

/// A queue in which an element becomes observable at the head only after at
/// least `min_len` slots in total sit behind the head.
///
/// Empty slots model pipeline bubbles.  Popping below the minimum occupancy
/// refills the tail with an empty slot, so a payload pushed into an all-empty
/// pipeline of length `min_len` emerges exactly `min_len` pops later.  The
/// read/write queue of a DRAM channel uses this with `min_len` set to the
/// column access latency.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DelayPipeline<T> {
    slots: VecDeque<Option<T>>,
    min_len: usize,
    max_len: usize,
    num_elements: usize,
}

impl<T> DelayPipeline<T> {
    #[must_use]
    pub fn new(min_len: usize, max_len: usize) -> Self {
        assert!(max_len > 0, "delay pipeline without capacity");
        let mut slots = VecDeque::with_capacity(max_len);
        slots.extend((0..min_len).map(|_| None));
        Self {
            slots,
            min_len,
            max_len,
            num_elements: 0,
        }
    }

    /// Push a payload (or an empty slot to inject a bubble).
    ///
    /// Pushing into a full pipeline is a contract violation.
    pub fn push(&mut self, data: Option<T>) {
        assert!(
            self.slots.len() < self.max_len,
            "push into full delay pipeline"
        );
        match self.slots.back() {
            // reuse the empty tail slot unless it is needed to keep the
            // minimum occupancy
            Some(tail) if tail.is_none() && self.slots.len() >= self.min_len => {}
            _ => self.slots.push_back(None),
        }
        if data.is_some() {
            self.num_elements += 1;
        }
        *self.slots.back_mut().unwrap() = data;
    }

    /// Pop the head slot, which may be empty.
    ///
    /// Refills the tail with an empty slot whenever the pop drops the
    /// pipeline below its minimum occupancy.
    pub fn pop(&mut self) -> Option<T> {
        let slot = self.slots.pop_front()?;
        if slot.is_some() {
            self.num_elements -= 1;
        }
        if self.slots.len() < self.min_len {
            self.slots.push_back(None);
        }
        slot
    }

    #[must_use]
    pub fn top(&self) -> Option<&T> {
        self.slots.front().and_then(Option::as_ref)
    }

    /// Change the enforced minimum occupancy.
    ///
    /// Growing pads the tail with empty slots.  Shrinking drops empty tail
    /// slots only; a non-empty payload is never evicted.
    pub fn set_min_length(&mut self, new_min_len: usize) {
        if new_min_len == self.min_len {
            return;
        }
        if new_min_len > self.min_len {
            self.min_len = new_min_len;
            while self.slots.len() < self.min_len {
                self.slots.push_back(None);
            }
        } else {
            self.min_len = new_min_len;
            while self.slots.len() > self.min_len && matches!(self.slots.back(), Some(None)) {
                self.slots.pop_back();
            }
        }
    }

    #[must_use]
    pub fn full(&self) -> bool {
        self.slots.len() >= self.max_len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Total slot count, including empty slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots holding a payload.
    #[must_use]
    pub fn num_elements(&self) -> usize {
        self.num_elements
    }

    #[must_use]
    pub fn min_len(&self) -> usize {
        self.min_len
    }
}
