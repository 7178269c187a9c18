/// Edge-triggered error flag
///
/// `raise` and `clear` report true only when the flag actually flips, so
/// the caller posts `Error` and `ErrorCleared` once per episode.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ErrorLatch {
    set: bool,
}

impl ErrorLatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set(&self) -> bool {
        self.set
    }

    pub fn raise(&mut self) -> bool {
        !std::mem::replace(&mut self.set, true)
    }

    pub fn clear(&mut self) -> bool {
        std::mem::replace(&mut self.set, false)
    }
}
