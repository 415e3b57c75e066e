//! Per-frame processing hook.
//!
//! Every captured frame passes through a [`ProcessorChain`] before it is
//! written. The chain is built by the caller; the program entry point installs
//! the second-pass blend driven by `pass2_alpha`.

use crate::capture::types::Frame;

/// A transformation applied to each frame in place.
pub trait FrameProcessor: Send {
    fn process(&mut self, frame: &mut Frame);

    /// Forget any state carried between frames.
    fn reset(&mut self) {}

    fn name(&self) -> &str {
        "custom"
    }
}

impl<F> FrameProcessor for F
where
    F: FnMut(&mut Frame) + Send,
{
    fn process(&mut self, frame: &mut Frame) {
        self(frame)
    }
}

/// Leaves frames untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl FrameProcessor for Passthrough {
    fn process(&mut self, _frame: &mut Frame) {}

    fn name(&self) -> &str {
        "passthrough"
    }
}

/// Second-pass blend with the previous output frame.
///
/// `out = frame * (1 - alpha) + previous * alpha`, per channel byte. The
/// first frame, and any frame whose size differs from the previous one,
/// passes through unchanged and becomes the new reference.
#[derive(Debug, Clone)]
pub struct Pass2Blend {
    alpha: f32,
    previous: Option<Frame>,
}

impl Pass2Blend {
    /// `alpha` is clamped to `[0, 1]`; NaN is treated as 0.
    pub fn new(alpha: f32) -> Self {
        let alpha = if alpha.is_nan() { 0.0 } else { alpha.clamp(0.0, 1.0) };
        Self {
            alpha,
            previous: None,
        }
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }
}

impl FrameProcessor for Pass2Blend {
    fn process(&mut self, frame: &mut Frame) {
        if self.alpha > 0.0 {
            if let Some(previous) = self.previous.as_ref().filter(|p| p.same_size(frame)) {
                blend_into(&mut frame.data, &previous.data, self.alpha);
            }
        }

        match self.previous.as_mut() {
            Some(previous) if previous.same_size(frame) => {
                previous.data.copy_from_slice(&frame.data);
            }
            _ => self.previous = Some(frame.clone()),
        }
    }

    fn reset(&mut self) {
        self.previous = None;
    }

    fn name(&self) -> &str {
        "pass2-blend"
    }
}

/// `dst = dst * (1 - alpha) + src * alpha`, rounded to nearest.
fn blend_into(dst: &mut [u8], src: &[u8], alpha: f32) {
    let keep = 1.0 - alpha;
    for (d, s) in dst.iter_mut().zip(src) {
        let value = *d as f32 * keep + *s as f32 * alpha;
        *d = value.round().clamp(0.0, 255.0) as u8;
    }
}

/// Ordered list of processors applied to each frame.
#[derive(Default)]
pub struct ProcessorChain {
    processors: Vec<Box<dyn FrameProcessor>>,
}

impl ProcessorChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// The chain used by `program_main`: only the second-pass blend.
    pub fn with_pass2(alpha: f32) -> Self {
        let mut chain = Self::new();
        chain.push(Pass2Blend::new(alpha));
        chain
    }

    pub fn push<P: FrameProcessor + 'static>(&mut self, processor: P) -> &mut Self {
        self.processors.push(Box::new(processor));
        self
    }

    /// Insert a processor ahead of the existing ones.
    pub fn push_front<P: FrameProcessor + 'static>(&mut self, processor: P) -> &mut Self {
        self.processors.insert(0, Box::new(processor));
        self
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.processors.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn reset(&mut self) {
        for processor in &mut self.processors {
            processor.reset();
        }
    }
}

impl FrameProcessor for ProcessorChain {
    fn process(&mut self, frame: &mut Frame) {
        for processor in &mut self.processors {
            processor.process(frame);
        }
    }

    fn reset(&mut self) {
        ProcessorChain::reset(self);
    }

    fn name(&self) -> &str {
        "chain"
    }
}

/// Run one frame through the chain.
pub fn proc_frame(chain: &mut ProcessorChain, frame: &mut Frame) {
    chain.process(frame);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough() {
        let mut frame = Frame::filled(2, 2, [10, 20, 30]);
        let original = frame.clone();
        Passthrough.process(&mut frame);
        assert_eq!(frame, original);
    }

    #[test]
    fn test_pass2_first_frame_unchanged() {
        let mut blend = Pass2Blend::new(0.5);
        let mut frame = Frame::filled(2, 1, [100, 100, 100]);
        blend.process(&mut frame);
        assert_eq!(frame.pixel(0, 0), Some([100, 100, 100]));
    }

    #[test]
    fn test_pass2_blends_with_previous_output() {
        let mut blend = Pass2Blend::new(0.5);
        let mut first = Frame::filled(1, 1, [200, 0, 100]);
        blend.process(&mut first);

        let mut second = Frame::filled(1, 1, [0, 200, 100]);
        blend.process(&mut second);
        assert_eq!(second.pixel(0, 0), Some([100, 100, 100]));

        // Reference is now the blended output, not the raw input.
        let mut third = Frame::filled(1, 1, [0, 0, 0]);
        blend.process(&mut third);
        assert_eq!(third.pixel(0, 0), Some([50, 50, 50]));
    }

    #[test]
    fn test_pass2_zero_alpha_is_identity() {
        let mut blend = Pass2Blend::new(0.0);
        let mut a = Frame::filled(1, 1, [255, 255, 255]);
        blend.process(&mut a);
        let mut b = Frame::filled(1, 1, [1, 2, 3]);
        blend.process(&mut b);
        assert_eq!(b.pixel(0, 0), Some([1, 2, 3]));
    }

    #[test]
    fn test_pass2_alpha_clamped() {
        assert_eq!(Pass2Blend::new(3.0).alpha(), 1.0);
        assert_eq!(Pass2Blend::new(-1.0).alpha(), 0.0);
        assert_eq!(Pass2Blend::new(f32::NAN).alpha(), 0.0);
    }

    #[test]
    fn test_pass2_size_change_resets_reference() {
        let mut blend = Pass2Blend::new(0.5);
        let mut small = Frame::filled(1, 1, [200, 200, 200]);
        blend.process(&mut small);
        let mut large = Frame::filled(2, 2, [0, 0, 0]);
        blend.process(&mut large);
        assert_eq!(large.pixel(1, 1), Some([0, 0, 0]));
    }

    #[test]
    fn test_pass2_reset() {
        let mut blend = Pass2Blend::new(1.0);
        let mut a = Frame::filled(1, 1, [9, 9, 9]);
        blend.process(&mut a);
        blend.reset();
        let mut b = Frame::filled(1, 1, [1, 1, 1]);
        blend.process(&mut b);
        assert_eq!(b.pixel(0, 0), Some([1, 1, 1]));
    }

    #[test]
    fn test_chain_runs_in_order() {
        let mut chain = ProcessorChain::new();
        chain.push(|frame: &mut Frame| frame.data.iter_mut().for_each(|b| *b = 10));
        chain.push(|frame: &mut Frame| frame.data.iter_mut().for_each(|b| *b *= 2));
        chain.push_front(Passthrough);
        assert_eq!(chain.len(), 3);
        assert_eq!(chain.names()[0], "passthrough");

        let mut frame = Frame::filled(1, 1, [0, 0, 0]);
        proc_frame(&mut chain, &mut frame);
        assert_eq!(frame.pixel(0, 0), Some([20, 20, 20]));
    }

    #[test]
    fn test_with_pass2() {
        let chain = ProcessorChain::with_pass2(0.25);
        assert_eq!(chain.names(), vec!["pass2-blend"]);
    }
}
