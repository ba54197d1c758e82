/// Fixed-capacity append-only buffer, the unit of work a pipeline moves.
///
/// The owning pipeline moves a chunk by value between the producer, the
/// pending queue and the worker, so a chunk is never written and processed
/// at the same time.
#[derive(Debug)]
pub struct ChunkBuffer<T> {
    storage: Box<[T]>,
    cursor: usize,
}

impl<T: Copy + Default> ChunkBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            storage: vec![T::default(); capacity].into_boxed_slice(),
            cursor: 0,
        }
    }

    /// Appends `value` to the next free slot.
    #[inline]
    pub fn write(&mut self, value: T) {
        debug_assert!(!self.is_full(), "write into a full chunk");
        self.storage[self.cursor] = value;
        self.cursor += 1;
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.cursor == self.storage.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cursor == 0
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.cursor
    }

    #[allow(dead_code)]
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Fills the remaining slots with `T::default()` so the chunk is full.
    pub fn pad(&mut self) {
        self.storage[self.cursor..].fill(T::default());
        self.cursor = self.storage.len();
    }

    /// Empties the chunk without looking at its contents.
    pub fn clear(&mut self) {
        self.cursor = 0;
    }

    /// Runs `action` over the whole storage, then empties the chunk for reuse.
    pub fn process<R>(&mut self, action: impl FnOnce(&mut [T]) -> R) -> R {
        let result = action(&mut self.storage[..]);
        self.cursor = 0;
        result
    }
}
