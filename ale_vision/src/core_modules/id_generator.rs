/// Monotonic id source. Each pipeline owns its own generators, so ids are unique
/// within one engine instance and never reused until the instance is reset.
#[derive(Debug, Clone, Default)]
pub struct IdGenerator {
    next: u64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hands out the next id.
    pub fn next_id(&mut self) -> u64 {
        let id = self.next;
        self.next += 1;
        id
    }

    /// Number of ids issued so far.
    pub fn issued(&self) -> u64 {
        self.next
    }
}
