use ndarray::{Array1, Array2};
use ndarray_rand::rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;

pub(crate) struct CobylaParams {
    pub rhobeg: f64,
    pub ftol_rel: f64,
    pub maxeval: usize,
}

impl Default for CobylaParams {
    fn default() -> Self {
        CobylaParams {
            rhobeg: 0.5,
            ftol_rel: 1e-5,
            maxeval: 200,
        }
    }
}

/// Initial points for multistart optimization: the caller's initial guess
/// followed by `n_start` points spread uniformly over the bounds by a seeded
/// generator, so repeated runs restart from the same spots.
pub(crate) fn prepare_multistart(
    n_start: usize,
    init: &Array1<f64>,
    bounds: &[(f64, f64)],
    seed: Option<u64>,
) -> Array2<f64> {
    let mut inits = Array2::zeros((n_start + 1, init.len()));
    inits.row_mut(0).assign(init);
    let mut rng = match seed {
        Some(seed) => Xoshiro256Plus::seed_from_u64(seed),
        None => Xoshiro256Plus::from_entropy(),
    };
    for i in 0..n_start {
        for (j, &(lo, up)) in bounds.iter().enumerate() {
            inits[[i + 1, j]] = rng.gen_range(lo..up);
        }
    }
    inits
}

/// Optimize hyperparameters given an initial guess and bounds with cobyla
pub(crate) fn optimize_params<ObjF>(
    objfn: ObjF,
    param0: &Array1<f64>,
    bounds: &[(f64, f64)],
    cobyla: CobylaParams,
) -> (f64, Array1<f64>)
where
    ObjF: Fn(&[f64], Option<&mut [f64]>, &mut ()) -> f64,
{
    use cobyla::{minimize, Func, StopTols};

    let cons: Vec<&dyn Func<()>> = vec![];
    let param0 = param0.to_vec();

    match minimize(
        |x, u| objfn(x, None, u),
        &param0,
        bounds,
        &cons,
        (),
        cobyla.maxeval,
        cobyla::RhoBeg::All(cobyla.rhobeg),
        Some(StopTols {
            ftol_rel: cobyla.ftol_rel,
            ..StopTols::default()
        }),
    ) {
        Ok((_, x_opt, fval)) => {
            let params_opt = Array1::from_vec(x_opt);
            let fval = if f64::is_nan(fval) {
                f64::INFINITY
            } else {
                fval
            };
            (fval, params_opt)
        }
        Err((status, x_opt, _)) => {
            log::warn!("Cobyla optimizer error status={status:?}");
            (f64::INFINITY, Array1::from_vec(x_opt))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_multistart_is_seeded() {
        let init = array![0.5, -0.5];
        let bounds = [(-1., 1.), (-2., 2.)];
        let a = prepare_multistart(3, &init, &bounds, Some(7));
        let b = prepare_multistart(3, &init, &bounds, Some(7));
        assert_eq!(a, b);
        assert_eq!(a.nrows(), 4);
        for i in 1..4 {
            for (j, &(lo, up)) in bounds.iter().enumerate() {
                assert!(a[[i, j]] >= lo && a[[i, j]] < up);
            }
        }
    }

    #[test]
    fn test_cobyla_minimizes_quadratic() {
        let objfn = |x: &[f64], _: Option<&mut [f64]>, _: &mut ()| {
            (x[0] - 0.3).powi(2) + (x[1] + 0.7).powi(2)
        };
        let (fval, x_opt) = optimize_params(
            objfn,
            &array![0., 0.],
            &[(-2., 2.), (-2., 2.)],
            CobylaParams {
                maxeval: 500,
                ..CobylaParams::default()
            },
        );
        assert!(fval < 1e-5);
        assert_abs_diff_eq!(x_opt[0], 0.3, epsilon = 1e-2);
        assert_abs_diff_eq!(x_opt[1], -0.7, epsilon = 1e-2);
    }
}
