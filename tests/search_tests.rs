use std::cell::RefCell;

use pur_hpo::search::{ParamValue, RandomSampler, TpeSampler, TrialState};
use pur_hpo::{Error, Result, Study, Trial};

#[test]
fn test_best_value_is_minimum_of_recorded_scores() {
    let scores = RefCell::new(Vec::new());
    let mut study = Study::with_sampler(RandomSampler::with_seed(42));

    study
        .optimize(20, |trial: &mut Trial<'_>| -> Result<f64> {
            let lr = trial.suggest_float("learning_rate", 0.0, 1.0)?;
            scores.borrow_mut().push(lr);
            Ok(lr)
        })
        .unwrap();

    let scores = scores.into_inner();
    assert_eq!(scores.len(), 20);
    let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
    assert_eq!(study.best_value().unwrap(), min);
    assert!(scores.iter().all(|lr| (0.0..1.0).contains(lr)));
    assert_eq!(study.best_params().unwrap()["learning_rate"], ParamValue::Float(min));
}

#[test]
fn test_tpe_study_tracks_minimum() {
    let mut scores = Vec::new();
    let mut study = Study::with_sampler(TpeSampler::with_seed(7));

    study
        .optimize(30, |trial: &mut Trial<'_>| -> Result<f64> {
            let epochs = trial.suggest_int("epochs", 3, 30)?;
            let lr = trial.suggest_float("learning_rate", 0.0, 1.0)?;
            assert!((3..=30).contains(&epochs));
            let score = (lr - 0.3).abs() + epochs as f64 / 100.0;
            scores.push(score);
            Ok(score)
        })
        .unwrap();

    let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
    assert_eq!(study.best_value().unwrap(), min);
}

#[test]
fn test_failed_trials_do_not_affect_best() {
    let mut study = Study::with_sampler(RandomSampler::with_seed(3));

    study
        .optimize(10, |trial: &mut Trial<'_>| -> Result<f64> {
            let x = trial.suggest_float("x", 0.0, 1.0)?;
            if trial.number() % 2 == 0 {
                // Failing trials would otherwise always win
                return Err(Error::NonFiniteLoss(f64::NAN));
            }
            Ok(x + 10.0)
        })
        .unwrap();

    let failed = study.trials().iter().filter(|t| t.state == TrialState::Failed).count();
    assert_eq!(failed, 5);

    let best = study.best_trial().unwrap();
    assert_eq!(best.number % 2, 1);
    assert!(study.best_value().unwrap() >= 10.0);
    assert!(study.trials()[0].failure.as_deref().unwrap().contains("not finite"));
}

#[test]
fn test_every_trial_failing_is_an_error() {
    let mut study = Study::new();
    let result = study.optimize(4, |trial: &mut Trial<'_>| -> Result<f64> {
        trial.suggest_int("epochs", 30, 3)?;
        Ok(0.0)
    });

    assert!(matches!(result, Err(Error::NoCompletedTrials)));
    assert_eq!(study.n_trials(), 4);
}
