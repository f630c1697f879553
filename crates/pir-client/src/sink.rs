/// Observable motion characteristic of an externally visible accessory.
///
/// A device connection calls this once for every status report that carries a
/// motion value. There is no local debouncing; the device owns quiescence timing.
pub trait MotionSink: Send + Sync {
    fn update_motion_detected(&self, detected: bool);
}
