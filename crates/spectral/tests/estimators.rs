use approx::assert_abs_diff_eq;
use mogp_data::Channel;
use mogp_spectral::{SpectralError, SpectralEstimator, SpectralMethod};
use ndarray::{array, Array, Array2};
use paste::paste;

fn init_logger() {
    let _ = env_logger::Builder::from_env(env_logger::Env::new().filter_or("MOGP_LOG", "info"))
        .is_test(true)
        .try_init();
}

macro_rules! test_estimator {
    ($method:ident, $grid:expr) => {
        paste! {
            #[test]
            fn [<test_ $method _returns_exactly_q_peaks>]() {
                init_logger();
                let channel =
                    Channel::<f64>::from_series("A", array![0., 1., 2.], array![1., -1., 1.]).unwrap();
                let method = SpectralMethod::$method($grid);
                for q in 1..=5 {
                    let peaks = method.estimate(&channel, q).unwrap();
                    assert_eq!(peaks.len(), q);
                    for p in peaks.iter() {
                        assert!(p.amplitude >= 0. && p.amplitude.is_finite());
                        assert_eq!(p.mean.len(), 1);
                        assert!(p.variance.iter().all(|v| *v >= 0. && v.is_finite()));
                    }
                }
            }

            #[test]
            fn [<test_ $method _is_deterministic>]() {
                let x = Array::linspace(0., 15., 31);
                let y = x.mapv(|t: f64| (1.3 * t).cos() + 0.2 * (0.4 * t).sin());
                let channel = Channel::from_series("B", x, y).unwrap();
                let method = SpectralMethod::$method($grid);
                let first = method.estimate(&channel, 3).unwrap();
                let second = method.estimate(&channel, 3).unwrap();
                assert_eq!(first, second);
                assert!(first[0].amplitude >= first[1].amplitude);
            }

            #[test]
            fn [<test_ $method _two_input_dims>]() {
                let n = 20;
                let x = Array2::from_shape_fn((n, 2), |(k, d)| {
                    if d == 0 {
                        k as f64
                    } else {
                        ((7 * k) % n) as f64 * 0.5
                    }
                });
                let y = x.column(0).mapv(|t| (0.9 * t).sin()) + x.column(1).mapv(|t| (2.1 * t).cos());
                let channel = Channel::new("C", x, y).unwrap();
                let peaks = SpectralMethod::$method($grid).estimate(&channel, 2).unwrap();
                assert_eq!(peaks.len(), 2);
                assert!(peaks.iter().all(|p| p.mean.len() == 2 && p.variance.len() == 2));
                // frequencies stay on the grid of each dimension: (0, nyquist + padding]
                assert!(peaks.iter().all(|p| p.mean.iter().all(|&f| f > 0.)));
            }

            #[test]
            fn [<test_ $method _single_sample_is_insufficient>]() {
                let channel = Channel::<f64>::from_series("D", array![3.], array![1.]).unwrap();
                let res = SpectralMethod::$method($grid).estimate(&channel, 2);
                match res {
                    Err(SpectralError::InsufficientData { channel, n_valid }) => {
                        assert_eq!(channel, "D");
                        assert_eq!(n_valid, 1);
                    }
                    other => panic!("unexpected result {other:?}"),
                }
            }
        }
    };
}

test_estimator!(lomb_scargle, 500);
test_estimator!(bnse, 200);

#[test]
fn test_alternating_channels_share_frequency() {
    let a = Channel::from_series("A", array![0., 1., 2.], array![1., -1., 1.]).unwrap();
    let b = Channel::from_series("B", array![0., 1., 2.], array![-1., 1., -1.]).unwrap();
    let method = SpectralMethod::lomb_scargle(100);
    let pa = method.estimate(&a, 1).unwrap();
    let pb = method.estimate(&b, 1).unwrap();
    assert_abs_diff_eq!(pa[0].mean[0], 0.5, epsilon = 1e-12);
    assert_abs_diff_eq!(pa[0].mean, pb[0].mean, epsilon = 1e-12);
    assert_abs_diff_eq!(pa[0].amplitude, pb[0].amplitude, epsilon = 1e-9);
}
