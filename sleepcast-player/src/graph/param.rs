//! Automatable gain parameter
//!
//! Values are scheduled against the graph's frame clock: a ramp starts at the
//! value the parameter has at the moment it is scheduled and reaches its target
//! after the given number of frames.

use sleepcast_common::FadeCurve;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Ramp {
    from: f32,
    to: f32,
    start_frame: u64,
    end_frame: u64,
    curve: FadeCurve,
}

/// Gain parameter with optional ramp
#[derive(Debug, Clone, PartialEq)]
pub struct GainParam {
    value: f32,
    ramp: Option<Ramp>,
}

impl GainParam {
    pub fn new(value: f32) -> Self {
        Self { value, ramp: None }
    }

    /// Set the value immediately, cancelling any ramp
    pub fn set_value(&mut self, value: f32) {
        self.value = value;
        self.ramp = None;
    }

    /// Linear ramp from the current value at `now` to `target`
    pub fn linear_ramp(&mut self, target: f32, now: u64, frames: u64) {
        self.ramp_with(target, now, frames, FadeCurve::Linear);
    }

    /// Ramp from the current value at `now` to `target` along `curve`
    pub fn ramp_with(&mut self, target: f32, now: u64, frames: u64, curve: FadeCurve) {
        let from = self.value_at(now);
        if frames == 0 {
            self.set_value(target);
            return;
        }
        self.value = target;
        self.ramp = Some(Ramp {
            from,
            to: target,
            start_frame: now,
            end_frame: now + frames,
            curve,
        });
    }

    /// Value at a given frame
    pub fn value_at(&self, frame: u64) -> f32 {
        match self.ramp {
            Some(ramp) if frame < ramp.end_frame => {
                if frame <= ramp.start_frame {
                    return ramp.from;
                }
                let position = (frame - ramp.start_frame) as f32
                    / (ramp.end_frame - ramp.start_frame) as f32;
                ramp.curve.interpolate(ramp.from, ramp.to, position)
            }
            _ => self.value,
        }
    }

    /// Value the parameter settles at
    pub fn target(&self) -> f32 {
        self.value
    }

    pub fn is_ramping(&self, frame: u64) -> bool {
        self.ramp.map_or(false, |r| frame < r.end_frame)
    }

    /// Drop a finished ramp
    pub fn settle(&mut self, frame: u64) {
        if !self.is_ramping(frame) {
            self.ramp = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_value() {
        let mut param = GainParam::new(0.0);
        param.set_value(0.5);
        assert_eq!(param.value_at(0), 0.5);
        assert_eq!(param.target(), 0.5);
        assert!(!param.is_ramping(0));
    }

    #[test]
    fn test_linear_ramp() {
        let mut param = GainParam::new(0.0);
        param.linear_ramp(0.9, 100, 1000);

        assert_eq!(param.value_at(50), 0.0);
        assert_eq!(param.value_at(100), 0.0);
        assert!((param.value_at(600) - 0.45).abs() < 1e-6);
        assert_eq!(param.value_at(1100), 0.9);
        assert_eq!(param.target(), 0.9);
        assert!(param.is_ramping(1099));
        assert!(!param.is_ramping(1100));
    }

    #[test]
    fn test_ramp_starts_from_current_value() {
        let mut param = GainParam::new(0.0);
        param.linear_ramp(1.0, 0, 100);
        // Interrupt halfway and ramp down
        param.linear_ramp(0.0, 50, 100);

        assert!((param.value_at(50) - 0.5).abs() < 1e-6);
        assert!((param.value_at(100) - 0.25).abs() < 1e-6);
        assert_eq!(param.value_at(150), 0.0);
    }

    #[test]
    fn test_zero_length_ramp_is_immediate() {
        let mut param = GainParam::new(1.0);
        param.linear_ramp(0.0, 10, 0);
        assert_eq!(param.value_at(10), 0.0);
        assert!(!param.is_ramping(10));
    }

    #[test]
    fn test_settle() {
        let mut param = GainParam::new(0.0);
        param.linear_ramp(1.0, 0, 10);
        param.settle(5);
        assert!(param.is_ramping(5));
        param.settle(10);
        assert!(!param.is_ramping(0));
        assert_eq!(param.value_at(0), 1.0);
    }
}
