/// Frame-rate gate for the decode advance engine. Decides whether a
/// presentation timestamp is admitted for rendering given a target rate;
/// rejected timestamps are simply skipped by the caller, never buffered.
pub struct SpeedController {
    frame_interval_us: i64,
    last_admitted_us: Option<i64>,
}

impl SpeedController {
    /// `fps` must be positive.
    pub fn new(fps: u32) -> Self {
        assert!(fps > 0, "fps must be positive");
        Self {
            frame_interval_us: 1_000_000 / fps as i64,
            last_admitted_us: None,
        }
    }

    /// Admit `ts_us` iff at least one frame interval has passed since the
    /// last *admitted* timestamp. The first call always admits.
    /// Non-monotonic input is tolerated; it is compared against the last
    /// admitted value like any other timestamp.
    pub fn admit(&mut self, ts_us: i64) -> bool {
        let last = match self.last_admitted_us {
            None => {
                self.last_admitted_us = Some(ts_us);
                return true;
            }
            Some(last) => last,
        };

        if ts_us - last < self.frame_interval_us {
            log::trace!(
                "admit::skip ts={} last={} interval={}",
                ts_us,
                last,
                self.frame_interval_us
            );
            return false;
        }

        self.last_admitted_us = Some(ts_us);
        true
    }
}
