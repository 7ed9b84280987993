/// Caps how many items an operation may take. Each successful `try_acquire`
/// consumes one slot; once `max` slots are gone every further call fails.
#[derive(Debug, Clone)]
pub struct Limiter {
    max: usize,
    pub(crate) count: usize,
}

impl Limiter {
    pub fn new(max: usize) -> Self {
        Self { max, count: 0 }
    }

    pub fn try_acquire(&mut self) -> bool {
        if self.count >= self.max {
            return false;
        }
        self.count += 1;
        true
    }

}
