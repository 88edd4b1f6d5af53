//! Recursive midpoint subdivision over a frame sequence.
//!
//! With `steps = k`, every adjacent pair `(a, b)` is replaced by `a`
//! followed by `2^k - 1` synthesized frames, and the final input frame is
//! appended once. Output length is `(n - 1) * 2^k + 1` for `n >= 2` inputs.

use anyhow::{bail, Context, Result};
use tracing::{debug, info};

/// Deepest subdivision accepted; each step doubles the frame count.
pub const MAX_INTERPOLATION_STEPS: u32 = 10;

/// Synthesizes the temporal midpoint of two frames.
pub trait FrameInterpolator<F> {
    fn stage_name(&self) -> &str {
        "FrameInterpolator"
    }

    fn interpolate(&self, previous: &F, current: &F) -> Result<F>;
}

impl<F, T> FrameInterpolator<F> for T
where
    T: Fn(&F, &F) -> Result<F>,
{
    fn interpolate(&self, previous: &F, current: &F) -> Result<F> {
        self(previous, current)
    }
}

/// Number of frames `interpolate_recursively` produces for `input_len` frames,
/// or `None` when it does not fit in `usize`.
pub fn expected_len(input_len: usize, steps: u32) -> Option<usize> {
    if input_len < 2 {
        return Some(input_len);
    }
    let per_pair = 1usize.checked_shl(steps)?;
    (input_len - 1).checked_mul(per_pair)?.checked_add(1)
}

/// Densify `frames` by `steps` rounds of midpoint insertion.
///
/// `steps == 0` and sequences shorter than two frames come back unchanged.
/// `steps` above [`MAX_INTERPOLATION_STEPS`] is rejected before any frame is
/// synthesized. The first interpolator error aborts the whole run.
pub fn interpolate_recursively<F, I>(
    frames: Vec<F>,
    steps: u32,
    interpolator: &I,
) -> Result<Vec<F>>
where
    I: FrameInterpolator<F> + ?Sized,
{
    if steps > MAX_INTERPOLATION_STEPS {
        bail!("interpolation steps {steps} exceed the maximum of {MAX_INTERPOLATION_STEPS}");
    }
    if steps == 0 || frames.len() < 2 {
        return Ok(frames);
    }

    let pairs = frames.len() - 1;
    let Some(total) = expected_len(frames.len(), steps) else {
        bail!(
            "{} frames at {steps} steps overflows the output length",
            frames.len()
        );
    };
    let mut out = Vec::with_capacity(total);
    let mut iter = frames.into_iter();
    let Some(mut previous) = iter.next() else {
        return Ok(out);
    };

    for (index, current) in iter.enumerate() {
        let mut segment = Vec::with_capacity((1usize << steps) - 1);
        subdivide(&previous, &current, steps, interpolator, &mut segment).with_context(|| {
            format!(
                "interpolation failed between frames {index} and {}",
                index + 1
            )
        })?;
        out.push(previous);
        out.append(&mut segment);
        previous = current;
        debug!(pair = index + 1, of = pairs, "pair interpolated");
    }
    out.push(previous);

    info!(
        stage = interpolator.stage_name(),
        steps,
        frames = out.len(),
        "interpolation finished"
    );
    Ok(out)
}

/// Appends the interior frames of `(a, b)` at `depth` to `out`, in order.
fn subdivide<F, I>(a: &F, b: &F, depth: u32, interpolator: &I, out: &mut Vec<F>) -> Result<()>
where
    I: FrameInterpolator<F> + ?Sized,
{
    if depth == 0 {
        return Ok(());
    }
    let mid = interpolator.interpolate(a, b)?;
    subdivide(a, &mid, depth - 1, interpolator, out)?;
    let mut right = Vec::new();
    subdivide(&mid, b, depth - 1, interpolator, &mut right)?;
    out.push(mid);
    out.append(&mut right);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use anyhow::bail;

    use super::*;

    fn midpoint(a: &f64, b: &f64) -> Result<f64> {
        Ok((a + b) / 2.0)
    }

    fn positions(n: usize) -> Vec<f64> {
        (0..n).map(|i| i as f64).collect()
    }

    #[test]
    fn zero_steps_is_identity() {
        let frames = positions(5);
        let out = interpolate_recursively(frames.clone(), 0, &midpoint).expect("identity");
        assert_eq!(out, frames);
    }

    #[test]
    fn short_sequences_pass_through() {
        assert!(interpolate_recursively(Vec::<f64>::new(), 3, &midpoint)
            .expect("empty")
            .is_empty());
        assert_eq!(
            interpolate_recursively(vec![7.0], 3, &midpoint).expect("single"),
            vec![7.0]
        );
    }

    #[test]
    fn one_step_inserts_midpoints() {
        let out = interpolate_recursively(vec![0.0, 1.0, 2.0], 1, &midpoint).expect("k=1");
        assert_eq!(out, vec![0.0, 0.5, 1.0, 1.5, 2.0]);
    }

    #[test]
    fn two_steps_on_a_pair_yields_quarter_positions() {
        let out = interpolate_recursively(vec![0.0, 1.0], 2, &midpoint).expect("k=2");
        assert_eq!(out, vec![0.0, 0.25, 0.5, 0.75, 1.0]);
    }

    #[test]
    fn output_is_uniform_dyadic_grid_for_many_depths() {
        for n in 2..6 {
            for k in 0..5u32 {
                let out = interpolate_recursively(positions(n), k, &midpoint).expect("grid");
                assert_eq!(Some(out.len()), expected_len(n, k), "n={n} k={k}");

                let denom = (1u32 << k) as f64;
                for (j, value) in out.iter().enumerate() {
                    assert_eq!(*value, j as f64 / denom, "n={n} k={k} j={j}");
                }
            }
        }
    }

    #[test]
    fn originals_keep_their_relative_order() {
        let k = 3;
        let out = interpolate_recursively(positions(4), k, &midpoint).expect("k=3");
        let stride = 1usize << k;
        let originals: Vec<f64> = out.iter().step_by(stride).copied().collect();
        assert_eq!(originals, positions(4));
    }

    #[test]
    fn interpolator_call_count_matches_inserted_frames() {
        let calls = Cell::new(0usize);
        let counting = |a: &f64, b: &f64| {
            calls.set(calls.get() + 1);
            midpoint(a, b)
        };
        let out = interpolate_recursively(positions(3), 3, &counting).expect("count");
        assert_eq!(calls.get(), out.len() - 3);
        assert_eq!(calls.get(), 2 * 7);
    }

    #[test]
    fn first_failure_aborts_the_run() {
        let calls = Cell::new(0usize);
        let flaky = |a: &f64, b: &f64| {
            calls.set(calls.get() + 1);
            if *a >= 1.0 {
                bail!("device lost");
            }
            midpoint(a, b)
        };
        let err = interpolate_recursively(positions(4), 1, &flaky).expect_err("should fail");
        assert!(format!("{err:#}").contains("device lost"));
        assert!(format!("{err:#}").contains("between frames 1 and 2"));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn excessive_steps_are_rejected_without_calls() {
        let calls = Cell::new(0usize);
        let counting = |a: &f64, b: &f64| {
            calls.set(calls.get() + 1);
            midpoint(a, b)
        };
        for steps in [MAX_INTERPOLATION_STEPS + 1, 63, 64, u32::MAX] {
            let err = interpolate_recursively(vec![0.0, 1.0], steps, &counting)
                .expect_err("too many steps");
            assert!(err.to_string().contains("exceed the maximum"), "{err}");
        }
        assert_eq!(calls.get(), 0);

        let out = interpolate_recursively(vec![0.0, 1.0], MAX_INTERPOLATION_STEPS, &midpoint)
            .expect("max steps");
        assert_eq!(out.len(), (1usize << MAX_INTERPOLATION_STEPS) + 1);
    }

    #[test]
    fn expected_len_reports_overflow() {
        assert_eq!(expected_len(3, 2), Some(9));
        assert_eq!(expected_len(1, 200), Some(1));
        assert_eq!(expected_len(3, 63), None);
        assert_eq!(expected_len(2, 64), None);
        assert_eq!(expected_len(usize::MAX, 1), None);
    }

    struct Named;

    impl FrameInterpolator<f64> for Named {
        fn stage_name(&self) -> &str {
            "named"
        }

        fn interpolate(&self, previous: &f64, current: &f64) -> Result<f64> {
            midpoint(previous, current)
        }
    }

    #[test]
    fn trait_objects_are_accepted() {
        let boxed: Box<dyn FrameInterpolator<f64>> = Box::new(Named);
        assert_eq!(boxed.stage_name(), "named");
        let out = interpolate_recursively(vec![0.0, 2.0], 1, boxed.as_ref()).expect("dyn");
        assert_eq!(out, vec![0.0, 1.0, 2.0]);
    }
}
