//! Maximization of the EP evidence over `(v, delta, beta)`.
//!
//! For a given `(v, delta)` the whitened effect sizes are refined by a
//! few fixed-point steps of a closed-form linear solve. The variance
//! parameters are searched on unconstrained scales, `ln v` and
//! `logit delta`: L-BFGS with analytic gradients when delta is free,
//! nested bounded Brent searches otherwise (and as a fallback).

use std::cell::{Cell, RefCell};
use std::time::Instant;

use argmin::core::{CostFunction, Error as ArgminError, Executor, Gradient, State};
use argmin::solver::brent::BrentOpt;
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use tracing::{debug, info, warn};

use lim_linalg::{CholeskyDecomp, DenseMatrix};

use super::engine::EpEngine;
use crate::error::{InferenceError, Result};
use crate::fastlmm::into_inference_error;
use crate::util::math::{logistic, logit};

const LBFGS_MEMORY: usize = 7;

/// Best point seen so far: `(cost, ln v, logit delta)`.
type Best = Option<(f64, f64, Option<f64>)>;

impl EpEngine<'_> {
    /// Closed-form optimum of the whitened effect sizes with the current
    /// sites held fixed.
    fn optimal_tbeta(&mut self) -> Result<Vec<f64>> {
        self.update()?;
        let k = self.whitening.ncols();
        if k == 0 || self.whitening.whitened().max_abs() < 1e-15 {
            return Ok(vec![0.0; k]);
        }
        self.ensure_factor()?;
        let q0 = self.q0();
        let factor = self.site_factor()?;
        let tm = self.whitening.whitened();

        let ct: Vec<f64> = factor.c.iter().zip(&self.sites.eta).map(|(c, t)| c * t).collect();
        let qb_ct = factor.qbiqt(q0, &ct);
        let nom: Vec<f64> = (0..ct.len()).map(|i| ct[i] - factor.a[i] * qb_ct[i]).collect();

        let atm = tm.scale_rows(&factor.a);
        let z = tm.t_mat_mul(&atm).add(&atm.t_mat_mul(&factor.qbiqt_mat(q0, &atm)).scale(-1.0));
        let rhs = tm.t_mat_vec(&nom);
        Ok(solve_effects(&z, &rhs))
    }

    /// Refine the effect sizes by up to `beta_max_iter` fixed-point steps.
    pub fn optimize_beta(&mut self) -> Result<()> {
        for _ in 0..self.config.beta_max_iter {
            let prev = self.tbeta.clone();
            let next = self.optimal_tbeta()?;
            let step: f64 = next.iter().zip(&prev).map(|(a, b)| (a - b) * (a - b)).sum();
            self.set_tbeta(next);
            if step < self.config.beta_tol {
                break;
            }
        }
        Ok(())
    }

    /// Maximize the evidence over `(v, delta, beta)`.
    ///
    /// When delta is free this runs L-BFGS and falls back to
    /// [`optimize_brent`](Self::optimize_brent) if the gradient search
    /// itself fails; otherwise it searches v alone. EP divergence and
    /// linear-algebra failures are returned as they are.
    pub fn optimize(&mut self) -> Result<()> {
        if !self.family.has_overdispersion() {
            return self.optimize_brent();
        }
        let start = Instant::now();
        let (v0, delta0, tbeta0) = (self.v, self.delta, self.tbeta.clone());
        info!("Optimizing {} EP evidence with L-BFGS", self.kind());

        let best = match self.run_lbfgs(v0, delta0) {
            Ok(best) => best,
            Err(e @ InferenceError::Optimization(_)) => {
                warn!("Gradient optimizer failed ({}); falling back to nested Brent search", e);
                self.reset_sites();
                self.set_v(v0)?;
                self.set_delta(delta0)?;
                self.set_tbeta(tbeta0);
                return self.optimize_brent();
            }
            Err(e) => return Err(e),
        };
        self.finish(best)?;
        info!(
            "EP optimization finished in {:.2?}: lml={:.6}, v={:.4e}, delta={:.4e}",
            start.elapsed(),
            self.lml()?,
            self.v,
            self.delta
        );
        Ok(())
    }

    /// Nested bounded Brent searches: `ln v` outside, `logit delta`
    /// inside when delta is free.
    pub fn optimize_brent(&mut self) -> Result<()> {
        let start = Instant::now();
        info!("Optimizing {} EP evidence with nested Brent search", self.kind());
        let free_delta = self.family.has_overdispersion();
        let (vlo, vhi) = self.config.variance_bounds;
        let max_iters = self.config.max_optimizer_iter;
        let tol = self.config.brent_tol;

        let ctx = SearchContext::new(self);
        {
            let problem = VarianceObjective {
                ctx: &ctx,
                free_delta,
            };
            let solver = BrentOpt::new(vlo.ln(), vhi.ln()).set_tolerance(f64::EPSILON.sqrt(), tol);
            Executor::new(problem, solver)
                .configure(|state| state.max_iters(max_iters))
                .run()
                .map_err(into_inference_error)?;
        }
        let (best, evals) = ctx.into_best();
        debug!("Nested Brent search used {} evidence evaluations", evals);
        self.finish(best)?;
        info!(
            "EP optimization finished in {:.2?}: lml={:.6}, v={:.4e}, delta={:.4e}",
            start.elapsed(),
            self.lml()?,
            self.v,
            self.delta
        );
        Ok(())
    }

    fn run_lbfgs(&mut self, v0: f64, delta0: f64) -> Result<Best> {
        let (dlo, dhi) = self.config.delta_bounds;
        let x0 = vec![
            self.config.clip_variance(v0).ln(),
            logit(delta0.clamp(dlo, dhi)),
        ];
        let max_iters = self.config.max_optimizer_iter;

        let ctx = SearchContext::new(self);
        {
            let linesearch = MoreThuenteLineSearch::new();
            let solver = LBFGS::new(linesearch, LBFGS_MEMORY)
                .with_tolerance_grad(1e-6)
                .and_then(|s| s.with_tolerance_cost(1e-10))
                .map_err(into_inference_error)?;
            let problem = JointObjective { ctx: &ctx };
            let result = Executor::new(problem, solver)
                .configure(|state| state.param(x0).max_iters(max_iters))
                .run()
                .map_err(into_inference_error)?;
            debug!("L-BFGS stopped: {}", result.state().get_termination_status());
        }
        let (best, evals) = ctx.into_best();
        debug!("L-BFGS used {} evidence evaluations", evals);
        if best.is_none() {
            return Err(InferenceError::Optimization(
                "L-BFGS evaluated no finite evidence".to_string(),
            ));
        }
        Ok(best)
    }

    /// Move to the best point found and refine beta there.
    fn finish(&mut self, best: Best) -> Result<()> {
        let (_, ln_v, logit_delta) =
            best.ok_or_else(|| InferenceError::Optimization("no evidence evaluated".to_string()))?;
        let v = self.config.clip_variance(ln_v.exp());
        self.set_v(v)?;
        if let Some(x) = logit_delta {
            let delta = self.config.clip_delta(logistic(x));
            self.set_delta(delta)?;
        }
        self.optimize_beta()
    }
}

/// Solve `z tbeta = rhs`, or zero effects when `z` is not positive definite.
fn solve_effects(z: &DenseMatrix, rhs: &[f64]) -> Vec<f64> {
    match CholeskyDecomp::new(z) {
        Ok(chol) => chol.solve(rhs),
        Err(e) => {
            warn!("Effect-size system is ill-conditioned ({}); setting effects to zero", e);
            vec![0.0; rhs.len()]
        }
    }
}

/// Shared state of one optimizer run.
struct SearchContext<'e, 'a> {
    engine: RefCell<&'e mut EpEngine<'a>>,
    best: Cell<Best>,
    evals: Cell<usize>,
}

impl<'e, 'a> SearchContext<'e, 'a> {
    fn new(engine: &'e mut EpEngine<'a>) -> Self {
        Self {
            engine: RefCell::new(engine),
            best: Cell::new(None),
            evals: Cell::new(0),
        }
    }

    fn into_best(self) -> (Best, usize) {
        (self.best.get(), self.evals.get())
    }

    /// Move the engine to `(ln v, logit delta)` and refine beta there.
    /// Returns the clamped `(v, delta)`.
    fn move_to(&self, ln_v: f64, logit_delta: Option<f64>) -> Result<(f64, f64)> {
        let mut engine = self.engine.borrow_mut();
        let v = engine.config.clip_variance(ln_v.exp());
        engine.set_v(v)?;
        if let Some(x) = logit_delta {
            let delta = engine.config.clip_delta(logistic(x));
            engine.set_delta(delta)?;
        }
        engine.optimize_beta()?;
        Ok((engine.v, engine.delta))
    }

    /// Negative evidence at `(ln v, logit delta)`.
    fn cost(&self, ln_v: f64, logit_delta: Option<f64>) -> Result<f64> {
        self.move_to(ln_v, logit_delta)?;
        let cost = -self.engine.borrow_mut().lml()?;
        self.evals.set(self.evals.get() + 1);
        if cost.is_finite() && self.best.get().map_or(true, |(c, _, _)| cost < c) {
            self.best.set(Some((cost, ln_v, logit_delta)));
        }
        Ok(cost)
    }

    /// Gradient of the negative evidence in `(ln v, logit delta)`.
    fn gradient(&self, ln_v: f64, logit_delta: f64) -> Result<Vec<f64>> {
        let (v, delta) = self.move_to(ln_v, Some(logit_delta))?;
        let mut engine = self.engine.borrow_mut();
        let (gv, gd) = engine.gradient_over_both()?;
        let (vlo, vhi) = engine.config.variance_bounds;
        let (dlo, dhi) = engine.config.delta_bounds;
        let dv = if v > vlo && v < vhi { -gv * v } else { 0.0 };
        let dd = if delta > dlo && delta < dhi {
            -gd * delta * (1.0 - delta)
        } else {
            0.0
        };
        Ok(vec![dv, dd])
    }
}

struct JointObjective<'c, 'e, 'a> {
    ctx: &'c SearchContext<'e, 'a>,
}

impl CostFunction for JointObjective<'_, '_, '_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, x: &Vec<f64>) -> std::result::Result<f64, ArgminError> {
        Ok(self.ctx.cost(x[0], Some(x[1]))?)
    }
}

impl Gradient for JointObjective<'_, '_, '_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, x: &Vec<f64>) -> std::result::Result<Vec<f64>, ArgminError> {
        Ok(self.ctx.gradient(x[0], x[1])?)
    }
}

/// Outer search over `ln v`. With a free delta every evaluation runs an
/// inner search over `logit delta` and reports its best cost.
struct VarianceObjective<'c, 'e, 'a> {
    ctx: &'c SearchContext<'e, 'a>,
    free_delta: bool,
}

impl CostFunction for VarianceObjective<'_, '_, '_> {
    type Param = f64;
    type Output = f64;

    fn cost(&self, ln_v: &f64) -> std::result::Result<f64, ArgminError> {
        if !self.free_delta {
            return Ok(self.ctx.cost(*ln_v, None)?);
        }
        let (lo, hi, tol, max_iters) = {
            let engine = self.ctx.engine.borrow();
            let (dlo, dhi) = engine.config.delta_bounds;
            (
                logit(dlo),
                logit(dhi),
                engine.config.brent_tol,
                engine.config.max_optimizer_iter,
            )
        };
        let inner = DeltaObjective {
            ctx: self.ctx,
            ln_v: *ln_v,
        };
        let solver = BrentOpt::new(lo, hi).set_tolerance(f64::EPSILON.sqrt(), tol);
        let result = Executor::new(inner, solver)
            .configure(|state| state.max_iters(max_iters))
            .run()?;
        Ok(result.state().get_best_cost())
    }
}

struct DeltaObjective<'c, 'e, 'a> {
    ctx: &'c SearchContext<'e, 'a>,
    ln_v: f64,
}

impl CostFunction for DeltaObjective<'_, '_, '_> {
    type Param = f64;
    type Output = f64;

    fn cost(&self, logit_delta: &f64) -> std::result::Result<f64, ArgminError> {
        Ok(self.ctx.cost(self.ln_v, Some(*logit_delta))?)
    }
}
