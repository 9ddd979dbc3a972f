/// Frame metadata handed to the per-frame tile update.
///
/// The frame driver advances it once per display callback; tile caches use it
/// only for logging context, all expiry is measured on the tokio clock.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Frame {
    /// 0-based frame index.
    pub index: u64,
    /// Target delta time (seconds).
    pub dt_s: f64,
}

impl Frame {
    pub fn new(index: u64, dt_s: f64) -> Self {
        Self { index, dt_s }
    }

    pub fn first(dt_s: f64) -> Self {
        Self::new(0, dt_s)
    }

    /// Nominal time at the start of this frame (seconds).
    pub fn time_s(&self) -> f64 {
        self.index as f64 * self.dt_s
    }

    pub fn next(self) -> Self {
        Self::new(self.index + 1, self.dt_s)
    }
}

#[cfg(test)]
mod tests {
    use super::Frame;

    #[test]
    fn next_advances_index_and_time() {
        let f0 = Frame::first(0.5);
        let f1 = f0.next();
        assert_eq!(f1.index, 1);
        assert_eq!(f1.time_s(), 0.5);
        assert_eq!(f1.next().time_s(), 1.0);
    }
}
