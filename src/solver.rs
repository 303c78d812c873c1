//! Levenberg-Marquardt solver for small dense non-linear least squares problems.
//!
//! Wraps the MINPACK port in the `levenberg_marquardt` crate so that any
//! residual function can be minimized through the [`Objective`] trait. The
//! Jacobian is approximated by forward differences of the residual.

use levenberg_marquardt::{LeastSquaresProblem, TerminationReason};
use log::debug;
use nalgebra::{DMatrix, DVector, Dyn, storage::Owned};

/// A residual function driven to zero by [`LevenbergMarquardt`].
pub trait Objective {
    type Error;

    fn residual(&self, x: &DVector<f64>) -> Result<DVector<f64>, Self::Error>;
}

impl<F, E> Objective for F
where
    F: Fn(&DVector<f64>) -> Result<DVector<f64>, E>,
{
    type Error = E;

    fn residual(&self, x: &DVector<f64>) -> Result<DVector<f64>, Self::Error> {
        self(x)
    }
}

/// Reason why the solver stopped iterating.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    /// The residual vanished exactly.
    ResidualsZero,
    /// The relative cost decrease or step size fell below its tolerance.
    Converged,
    /// The residual is orthogonal to the Jacobian columns.
    Orthogonal,
    /// The tolerances are below machine precision and no step improves the cost.
    NoImprovementPossible,
    LostPatience,
    /// The residual at the initial guess was not finite.
    NonFinite,
    /// The residual or its Jacobian could not be evaluated during the solve.
    Failed,
}

impl Termination {
    /// Status code of the termination, positive when the solver converged.
    pub fn status(self) -> i32 {
        match self {
            Termination::ResidualsZero => 1,
            Termination::Converged => 2,
            Termination::Orthogonal => 3,
            Termination::NoImprovementPossible => 4,
            Termination::LostPatience => 0,
            Termination::NonFinite => -1,
            Termination::Failed => -2,
        }
    }

    pub fn converged(self) -> bool {
        self.status() > 0
    }
}

impl From<&TerminationReason> for Termination {
    fn from(reason: &TerminationReason) -> Self {
        match reason {
            TerminationReason::ResidualsZero => Termination::ResidualsZero,
            TerminationReason::Converged { .. } => Termination::Converged,
            TerminationReason::Orthogonal => Termination::Orthogonal,
            TerminationReason::NoImprovementPossible(_) => Termination::NoImprovementPossible,
            TerminationReason::LostPatience => Termination::LostPatience,
            _ => Termination::Failed,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Solution {
    pub x: DVector<f64>,
    /// Norm of the residual at `x`.
    pub residual_norm: f64,
    /// Number of residual evaluations reported by the solver.
    pub evaluations: usize,
    pub termination: Termination,
}

/// Levenberg-Marquardt solver configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct LevenbergMarquardt {
    /// Converge once both the actual and predicted relative cost reductions
    /// are at or below this value.
    pub ftol: f64,
    /// Converge once the relative change of the parameters is at or below this value.
    pub xtol: f64,
    /// Converge once the residual is this close to orthogonal to the Jacobian.
    pub gtol: f64,
    /// Factor for the initial step bound.
    pub stepbound: f64,
    /// Give up after `patience * (n + 1)` residual evaluations for `n` parameters.
    pub patience: usize,
}

impl Default for LevenbergMarquardt {
    fn default() -> Self {
        Self {
            ftol: 1e-16,
            xtol: 1e-16,
            gtol: 1e-16,
            stepbound: 100.0,
            patience: 100_000,
        }
    }
}

/// Adapts an [`Objective`] to the least squares problem interface.
///
/// The residual is evaluated once per parameter update and cached.
struct Problem<'a, O: Objective> {
    objective: &'a O,
    params: DVector<f64>,
    residual: Option<DVector<f64>>,
}

impl<'a, O: Objective> Problem<'a, O> {
    fn new(objective: &'a O, params: DVector<f64>, residual: DVector<f64>) -> Self {
        Self {
            objective,
            params,
            residual: Some(residual),
        }
    }
}

impl<O: Objective> LeastSquaresProblem<f64, Dyn, Dyn> for Problem<'_, O> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        self.params.clone_from(x);
        self.residual = finite_residual(self.objective, x);
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        self.residual.clone()
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let residual = self.residual.as_ref()?;
        forward_difference_jacobian(self.objective, &self.params, residual)
    }
}

impl LevenbergMarquardt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Minimizes `objective` starting from `x0`.
    ///
    /// Returns an error only if `objective` fails at `x0`. Failures later in
    /// the solve stop it with [`Termination::Failed`].
    pub fn minimize<O: Objective>(
        &self,
        objective: &O,
        x0: DVector<f64>,
    ) -> Result<Solution, O::Error> {
        let residual = objective.residual(&x0)?;
        if !is_finite(&residual) {
            return Ok(self.finish(x0, f64::NAN, 0, Termination::NonFinite));
        }

        let lm = levenberg_marquardt::LevenbergMarquardt::new()
            .with_ftol(self.ftol)
            .with_xtol(self.xtol)
            .with_gtol(self.gtol)
            .with_stepbound(self.stepbound)
            .with_patience(self.patience.max(1));

        let (problem, report) = lm.minimize(Problem::new(objective, x0, residual));
        let x = problem.params();

        // Report the residual at the returned parameters rather than trusting
        // the last trial evaluation.
        match finite_residual(objective, &x) {
            Some(residual) => Ok(self.finish(
                x,
                residual.norm(),
                report.number_of_evaluations,
                Termination::from(&report.termination),
            )),
            None => Ok(self.finish(
                x,
                f64::NAN,
                report.number_of_evaluations,
                Termination::Failed,
            )),
        }
    }

    fn finish(
        &self,
        x: DVector<f64>,
        residual_norm: f64,
        evaluations: usize,
        termination: Termination,
    ) -> Solution {
        debug!(
            "solver stopped after {evaluations} evaluations: {termination:?}, |r| = {residual_norm:e}"
        );

        Solution {
            x,
            residual_norm,
            evaluations,
            termination,
        }
    }
}

fn is_finite(vector: &DVector<f64>) -> bool {
    vector.iter().all(|value| value.is_finite())
}

fn finite_residual<O: Objective>(objective: &O, x: &DVector<f64>) -> Option<DVector<f64>> {
    objective.residual(x).ok().filter(is_finite)
}

/// Approximates the Jacobian of `objective` at `x` by forward differences.
fn forward_difference_jacobian<O: Objective>(
    objective: &O,
    x: &DVector<f64>,
    residual: &DVector<f64>,
) -> Option<DMatrix<f64>> {
    let mut jacobian = DMatrix::zeros(residual.len(), x.len());
    for j in 0..x.len() {
        let step = f64::EPSILON.sqrt() * x[j].abs().max(1.0);
        let mut x_step = x.clone();
        x_step[j] += step;

        // Use the step actually representable in floating point.
        let step = x_step[j] - x[j];
        let shifted = finite_residual(objective, &x_step)?;
        jacobian.set_column(j, &((shifted - residual) / step));
    }

    Some(jacobian)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::dvector;
    use quickcheck_macros::quickcheck;
    use rstest::rstest;
    use std::convert::Infallible;

    fn rosenbrock(x: &DVector<f64>) -> Result<DVector<f64>, Infallible> {
        Ok(dvector![10.0 * (x[1] - x[0] * x[0]), 1.0 - x[0]])
    }

    #[rstest]
    #[case(dvector![-1.2, 1.0])]
    #[case(dvector![0.0, 0.0])]
    #[case(dvector![3.0, -2.0])]
    fn rosenbrock_converges(#[case] x0: DVector<f64>) {
        let solution = LevenbergMarquardt::default().minimize(&rosenbrock, x0).unwrap();

        assert!(solution.termination.converged());
        assert_relative_eq!(solution.x, dvector![1.0, 1.0], epsilon = 1e-8);
        assert!(solution.residual_norm < 1e-8);
    }

    #[test]
    fn linear_problem_is_solved() {
        let objective = |x: &DVector<f64>| -> Result<DVector<f64>, Infallible> {
            Ok(dvector![x[0] - 3.0, 2.0 * (x[1] + 1.0)])
        };
        let solution = LevenbergMarquardt::default()
            .minimize(&objective, dvector![0.0, 0.0])
            .unwrap();

        assert!(solution.termination.converged());
        assert!(solution.evaluations > 0);
        assert_relative_eq!(solution.x, dvector![3.0, -1.0], epsilon = 1e-9);
    }

    #[quickcheck]
    fn linear_targets_are_found(a: i16, b: i16) -> bool {
        let (a, b) = (a as f64, b as f64);
        let objective = |x: &DVector<f64>| -> Result<DVector<f64>, Infallible> {
            Ok(dvector![x[0] - a, 3.0 * (x[1] - b)])
        };
        let solution = LevenbergMarquardt::default()
            .minimize(&objective, dvector![0.0, 0.0])
            .unwrap();

        solution.termination.converged()
            && (solution.x[0] - a).abs() < 1e-6
            && (solution.x[1] - b).abs() < 1e-6
    }

    #[test]
    fn unsolvable_problem_settles_at_minimum() {
        // |r|^2 = (x - 2)^2 + 1 has a minimum of 1 at x = 2.
        let objective = |x: &DVector<f64>| -> Result<DVector<f64>, Infallible> {
            Ok(dvector![x[0] - 2.0, 1.0])
        };
        let solution = LevenbergMarquardt::default()
            .minimize(&objective, dvector![-5.0])
            .unwrap();

        assert_relative_eq!(solution.x[0], 2.0, epsilon = 1e-8);
        assert_relative_eq!(solution.residual_norm, 1.0, epsilon = 1e-8);
    }

    #[test]
    fn exhausted_patience_is_not_converged() {
        let solver = LevenbergMarquardt {
            patience: 1,
            ..LevenbergMarquardt::default()
        };
        let solution = solver.minimize(&rosenbrock, dvector![-1.2, 1.0]).unwrap();

        assert_eq!(solution.termination, Termination::LostPatience);
        assert!(!solution.termination.converged());
    }

    #[test]
    fn non_finite_start_is_not_converged() {
        let objective =
            |_: &DVector<f64>| -> Result<DVector<f64>, Infallible> { Ok(dvector![f64::NAN]) };
        let solution = LevenbergMarquardt::default()
            .minimize(&objective, dvector![0.0])
            .unwrap();

        assert_eq!(solution.termination, Termination::NonFinite);
        assert!(solution.termination.status() <= 0);
    }

    #[test]
    fn objective_error_at_start_is_returned() {
        let objective = |_: &DVector<f64>| -> Result<DVector<f64>, &'static str> { Err("boom") };
        let result = LevenbergMarquardt::default().minimize(&objective, dvector![0.0]);
        assert_eq!(result, Err("boom"));
    }

    #[test]
    fn objective_error_during_solve_fails() {
        // Undefined beyond x = 1.5, but the minimum sits at x = 3.
        let objective = |x: &DVector<f64>| -> Result<DVector<f64>, &'static str> {
            match x[0] > 1.5 {
                true => Err("out of domain"),
                false => Ok(dvector![x[0] - 3.0]),
            }
        };
        let solution = LevenbergMarquardt::default()
            .minimize(&objective, dvector![0.0])
            .unwrap();

        assert!(!solution.termination.converged());
    }
}
