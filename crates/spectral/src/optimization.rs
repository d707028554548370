use egobox_doe::{Lhs, LhsKind, SamplingMethod};
use linfa::Float;
use log::warn;
use ndarray::{arr1, s, Array1, Array2, Zip};
use ndarray_rand::rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;
use rayon::prelude::*;
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::cmp::Ordering;

/// COBYLA settings for hyperparameters optimization
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct OptimizerParams {
    /// Initial trust region radius
    pub rhobeg: f64,
    /// Relative tolerance on the objective
    pub ftol_rel: f64,
    /// Maximum number of objective evaluations per start
    pub max_eval: usize,
}

impl Default for OptimizerParams {
    fn default() -> Self {
        OptimizerParams {
            rhobeg: 0.5,
            ftol_rel: 1e-4,
            max_eval: 200,
        }
    }
}

/// Outcome of an optimization
#[derive(Clone, Debug)]
pub struct OptimResult {
    /// Best objective value found (infinity when nothing could be evaluated)
    pub fval: f64,
    /// Best point found
    pub x: Array1<f64>,
    /// Number of objective evaluations
    pub n_eval: usize,
    /// Whether the stopping tolerance was met before exhausting the evaluation budget
    pub converged: bool,
}

/// Starting points: `x0` followed by `n_start` points spread within `bounds`.
///
/// A single restart is drawn uniformly, several ones come from a maximin latin
/// hypercube so that they cover the search space.
pub fn prepare_multistart(
    n_start: usize,
    x0: &Array1<f64>,
    bounds: &[(f64, f64)],
    seed: u64,
) -> Array2<f64> {
    let mut starts = Array2::zeros((n_start + 1, x0.len()));
    starts.row_mut(0).assign(x0);
    let mut rng = Xoshiro256Plus::seed_from_u64(seed);
    match n_start.cmp(&1) {
        Ordering::Equal => {
            let vals = bounds.iter().map(|&(lo, up)| rng.gen_range(lo..up)).collect();
            starts.row_mut(1).assign(&Array1::from_vec(vals));
        }
        Ordering::Greater => {
            let mut xlimits = Array2::zeros((bounds.len(), 2));
            Zip::from(xlimits.rows_mut())
                .and(bounds)
                .for_each(|mut row, limits| row.assign(&arr1(&[limits.0, limits.1])));
            let seeds = Lhs::new(&xlimits)
                .kind(LhsKind::Maximin)
                .with_rng(rng)
                .sample(n_start);
            starts.slice_mut(s![1.., ..]).assign(&seeds);
        }
        Ordering::Less => (),
    }
    starts
}

/// Minimize `objfn` with COBYLA from `x0` within `bounds`
pub fn optimize_params<ObjF>(
    objfn: ObjF,
    x0: &Array1<f64>,
    bounds: &[(f64, f64)],
    params: &OptimizerParams,
) -> OptimResult
where
    ObjF: Fn(&[f64]) -> f64,
{
    use cobyla::{minimize, Func, RhoBeg, StopTols};

    let n_eval = Cell::new(0);
    let counted = |x: &[f64], _u: &mut ()| {
        n_eval.set(n_eval.get() + 1);
        let f = objfn(x);
        if f.is_nan() {
            f64::INFINITY
        } else {
            f
        }
    };
    let cons: Vec<&dyn Func<()>> = vec![];
    let x0 = x0.to_vec();

    match minimize(
        counted,
        &x0,
        bounds,
        &cons,
        (),
        params.max_eval,
        RhoBeg::All(params.rhobeg),
        Some(StopTols {
            ftol_rel: params.ftol_rel,
            ..StopTols::default()
        }),
    ) {
        Ok((_, x_opt, fval)) => OptimResult {
            fval: if fval.is_nan() { f64::INFINITY } else { fval },
            x: Array1::from(x_opt),
            n_eval: n_eval.get(),
            converged: n_eval.get() < params.max_eval,
        },
        Err((status, x_opt, fval)) => {
            warn!("Cobyla optimizer failure status={status:?}");
            OptimResult {
                fval: if fval.is_nan() { f64::INFINITY } else { fval },
                x: Array1::from(x_opt),
                n_eval: n_eval.get(),
                converged: false,
            }
        }
    }
}

/// Run [optimize_params] from every row of `starts` in parallel and keep the best run.
///
/// The best run tells whether the optimization converged, `n_eval` is summed over runs.
pub fn multistart_minimize<ObjF>(
    objfn: ObjF,
    starts: &Array2<f64>,
    bounds: &[(f64, f64)],
    params: &OptimizerParams,
) -> OptimResult
where
    ObjF: Fn(&[f64]) -> f64 + Sync,
{
    let identity = || OptimResult {
        fval: f64::INFINITY,
        x: starts.row(0).to_owned(),
        n_eval: 0,
        converged: false,
    };
    (0..starts.nrows())
        .into_par_iter()
        .map(|i| optimize_params(&objfn, &starts.row(i).to_owned(), bounds, params))
        .reduce(identity, |a, b| {
            let n_eval = a.n_eval + b.n_eval;
            let best = if b.fval < a.fval { b } else { a };
            OptimResult { n_eval, ..best }
        })
}

/// Lossy conversion used at the optimizer boundary
#[inline(always)]
pub fn into_f64<F: Float>(v: F) -> f64 {
    num_traits::cast(v).unwrap_or(f64::NAN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn paraboloid(x: &[f64]) -> f64 {
        (x[0] - 1.).powi(2) + (x[1] + 0.5).powi(2) + 1.
    }

    #[test]
    fn test_optimize_paraboloid() {
        let res = optimize_params(
            paraboloid,
            &array![0., 0.],
            &[(-2., 2.), (-2., 2.)],
            &OptimizerParams {
                max_eval: 500,
                ..OptimizerParams::default()
            },
        );
        assert!(res.converged);
        assert_abs_diff_eq!(res.x, array![1., -0.5], epsilon = 5e-2);
    }

    #[test]
    fn test_budget_exhausted_is_not_converged() {
        let res = optimize_params(
            paraboloid,
            &array![-2., 2.],
            &[(-2., 2.), (-2., 2.)],
            &OptimizerParams {
                max_eval: 5,
                ..OptimizerParams::default()
            },
        );
        assert!(!res.converged);
        assert!(res.fval.is_finite());
        assert!(res.fval <= paraboloid(&[-2., 2.]));
    }

    #[test]
    fn test_multistart_within_bounds() {
        let bounds = [(-1., 0.), (2., 3.)];
        let starts = prepare_multistart(4, &array![-0.5, 2.5], &bounds, 42);
        assert_eq!(starts.dim(), (5, 2));
        starts.rows().into_iter().for_each(|r| {
            assert!((-1. ..=0.).contains(&r[0]));
            assert!((2. ..=3.).contains(&r[1]));
        });
        let res = multistart_minimize(paraboloid, &starts, &bounds, &OptimizerParams::default());
        assert_abs_diff_eq!(res.x, array![0., 2.], epsilon = 1e-2);
        assert!(res.n_eval > 0);
    }

    #[test]
    fn test_multistart_fills_strata() {
        let bounds = [(-1., 0.), (2., 3.), (-5., 5.)];
        let starts = prepare_multistart(4, &array![-0.5, 2.5, 0.], &bounds, 7);
        assert_eq!(starts, prepare_multistart(4, &array![-0.5, 2.5, 0.], &bounds, 7));
        for (d, &(lo, up)) in bounds.iter().enumerate() {
            let mut strata: Vec<usize> = starts
                .column(d)
                .iter()
                .skip(1)
                .map(|&v| (((v - lo) / (up - lo) * 4.) as usize).min(3))
                .collect();
            strata.sort();
            assert_eq!(strata, vec![0, 1, 2, 3]);
        }

        let single = prepare_multistart(1, &array![-0.5, 2.5, 0.], &bounds, 7);
        assert_eq!(single.nrows(), 2);
        assert!((-1. ..=0.).contains(&single[[1, 0]]));
        assert_eq!(prepare_multistart(0, &array![-0.5, 2.5, 0.], &bounds, 7).nrows(), 1);
    }
}
