//! A CPU model of what the peeler computes for a single pixel.
//!
//! Given every fragment that covers a pixel, [`peel_pixel`] reproduces what
//! the N render targets record there and [`composite_pixel`] reproduces the
//! blend of those records into the destination. Both walk the same
//! [`FramePlan`](crate::FramePlan) the GPU executor walks. The GPU
//! integration tests read rendered pixels back and compare them with
//! [`render_pixel`].

use crate::draw::Color;
use crate::render_target::SENTINEL_DEPTH;
use crate::sequencer::{FramePlan, plan_frame};

/// A shaded fragment reaching one pixel, depth in `[0, 1)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Fragment {
    pub depth: f32,
    pub color: Color,
}

impl Fragment {
    pub fn new(depth: f32, color: Color) -> Self {
        Self { depth, color }
    }
}

/// What one render target holds at the pixel after its pass.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LayerSample {
    pub depth: f32,
    pub color: Color,
}

impl LayerSample {
    /// `true` when the pass recorded no fragment here.
    pub fn is_empty(&self) -> bool {
        self.depth >= SENTINEL_DEPTH
    }
}

/// Runs the peel steps of `plan` over the fragments of one pixel.
///
/// Fragments are submitted in slice order; as on the GPU, the depth test is
/// strict, so of two fragments at equal depth the first one wins.
pub fn peel_pixel(plan: &FramePlan, fragments: &[Fragment], background: Color) -> Vec<LayerSample> {
    let mut samples = vec![
        LayerSample {
            depth: SENTINEL_DEPTH,
            color: background,
        };
        plan.layers()
    ];

    for step in &plan.peel {
        let previous = step.input.map(|k| samples[k].depth);
        let mut recorded = LayerSample {
            depth: SENTINEL_DEPTH,
            color: background,
        };
        for fragment in fragments {
            if previous.is_some_and(|prev| fragment.depth <= prev) {
                continue;
            }
            if fragment.depth < recorded.depth {
                recorded = LayerSample {
                    depth: fragment.depth,
                    color: fragment.color,
                };
            }
        }
        samples[step.target] = recorded;
    }

    samples
}

/// Blends `samples` over `destination` in the plan's composite order.
pub fn composite_pixel(plan: &FramePlan, samples: &[LayerSample], destination: Color) -> Color {
    let mut dst = destination;
    for &layer in &plan.composite {
        let sample = samples[layer];
        if sample.is_empty() {
            continue;
        }
        dst = over(sample.color, dst);
    }
    dst
}

/// Peels and composites one pixel over a destination cleared to `background`.
pub fn render_pixel(layers: usize, fragments: &[Fragment], background: Color) -> Color {
    let plan = plan_frame(layers);
    let samples = peel_pixel(&plan, fragments, background);
    composite_pixel(&plan, &samples, background)
}

/// `src * a + dst * (1 - a)` on color, `a + dst.a * (1 - a)` on alpha.
pub fn over(src: Color, dst: Color) -> Color {
    let a = src.a;
    Color::rgba(
        src.r * a + dst.r * (1.0 - a),
        src.g * a + dst.g * (1.0 - a),
        src.b * a + dst.b * (1.0 - a),
        a + dst.a * (1.0 - a),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Color, b: Color) -> bool {
        let d = [a.r - b.r, a.g - b.g, a.b - b.b];
        d.iter().all(|x| x.abs() < 1e-3)
    }

    #[test]
    fn two_translucent_layers_blend_front_over_back() {
        let c1 = Color::rgba(0.9, 0.2, 0.1, 0.4);
        let c2 = Color::rgba(0.1, 0.3, 0.8, 0.7);
        // back fragment submitted first, order must not matter
        let fragments = [Fragment::new(0.6, c2), Fragment::new(0.3, c1)];
        for n in 2..=6 {
            let out = render_pixel(n, &fragments, Color::BLACK);
            let expected = Color::rgb(
                c1.r * c1.a + c2.r * c2.a * (1.0 - c1.a),
                c1.g * c1.a + c2.g * c2.a * (1.0 - c1.a),
                c1.b * c1.a + c2.b * c2.a * (1.0 - c1.a),
            );
            assert!(close(out, expected), "n = {n}: {out:?} vs {expected:?}");
        }
    }

    #[test]
    fn opaque_single_layer_equals_first_pass() {
        let plan = plan_frame(6);
        let red = Color::rgb(1.0, 0.0, 0.0);
        let samples = peel_pixel(&plan, &[Fragment::new(0.5, red)], Color::WHITE);
        assert_eq!(samples[0].color, red);
        assert!(samples[1..].iter().all(LayerSample::is_empty));
        assert_eq!(composite_pixel(&plan, &samples, Color::WHITE), samples[0].color);
    }

    #[test]
    fn empty_pixel_keeps_background() {
        let bg = Color::rgb(0.2, 0.4, 0.6);
        assert_eq!(render_pixel(4, &[], bg), bg);
    }

    #[test]
    fn recorded_depths_strictly_increase() {
        let fragments: Vec<Fragment> = [0.7, 0.1, 0.5, 0.3, 0.9]
            .iter()
            .map(|&d| Fragment::new(d, Color::rgba(d, d, d, 0.5)))
            .collect();
        let plan = plan_frame(6);
        let samples = peel_pixel(&plan, &fragments, Color::BLACK);
        let recorded: Vec<f32> = samples
            .iter()
            .take_while(|s| !s.is_empty())
            .map(|s| s.depth)
            .collect();
        assert_eq!(recorded, vec![0.1, 0.3, 0.5, 0.7, 0.9]);
        assert!(recorded.windows(2).all(|w| w[0] < w[1]));
        assert!(samples[5].is_empty());
    }

    #[test]
    fn layers_beyond_n_are_dropped() {
        let near = Color::rgba(1.0, 0.0, 0.0, 0.5);
        let far = Color::rgba(0.0, 0.0, 1.0, 0.5);
        let fragments = [Fragment::new(0.2, near), Fragment::new(0.8, far)];
        let one = render_pixel(1, &fragments, Color::BLACK);
        assert!(close(one, over(near, Color::BLACK)));
    }

    #[test]
    fn coincident_fragments_peel_once() {
        let a = Color::rgba(1.0, 0.0, 0.0, 0.5);
        let b = Color::rgba(0.0, 1.0, 0.0, 0.5);
        let plan = plan_frame(3);
        let samples = peel_pixel(&plan, &[Fragment::new(0.4, a), Fragment::new(0.4, b)], Color::BLACK);
        assert_eq!(samples[0].color, a);
        assert!(samples[1].is_empty());
    }
}
