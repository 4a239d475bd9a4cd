/// Fixed-capacity circular buffer of raw samples.
///
/// The slot at `head` always holds the oldest sample once the ring has filled,
/// so reading from `head` to the end and then from the start up to `head`
/// yields samples oldest first.
#[derive(Debug, Clone)]
pub struct SampleRing {
    buf: Vec<f64>,
    head: usize,
    total: u64,
}

impl SampleRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0.0; capacity.max(1)],
            head: 0,
            total: 0,
        }
    }

    /// Overwrite the oldest slot.
    pub fn push(&mut self, sample: f64) {
        self.buf[self.head] = sample;
        self.head = (self.head + 1) % self.buf.len();
        self.total += 1;
    }

    /// Chronologically ordered copy of the whole ring. Slots never written
    /// read as leading zeros.
    pub fn snapshot(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.buf.len());
        out.extend_from_slice(&self.buf[self.head..]);
        out.extend_from_slice(&self.buf[..self.head]);
        out
    }

    /// Number of real samples currently held.
    pub fn len(&self) -> usize {
        self.total.min(self.buf.len() as u64) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Samples pushed since construction.
    pub fn total_pushed(&self) -> u64 {
        self.total
    }

    pub fn latest(&self) -> Option<f64> {
        if self.total == 0 {
            return None;
        }
        let idx = (self.head + self.buf.len() - 1) % self.buf.len();
        Some(self.buf[idx])
    }
}
