//! Cox-Reid adjusted log posterior of log(alpha) and its optimizers
//!
//! Shared by the gene-wise (no prior) and MAP (normal prior on log alpha)
//! stages. The means `mu` are held fixed while alpha moves.

use ndarray::Array2;
use statrs::function::gamma::{digamma, ln_gamma};

use crate::glm::linalg::{invert_symmetric_matrix, log_determinant, weighted_cross_product};

/// Hard lower bound for log-alpha proposals
const MIN_LOG_ALPHA_HARD: f64 = -30.0;
/// Hard upper bound for log-alpha proposals
const MAX_LOG_ALPHA_HARD: f64 = 10.0;
/// Armijo sufficient-decrease constant
const ARMIJO_EPSILON: f64 = 1e-4;

/// Normal prior on log(alpha)
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct LogPrior {
    pub mean: f64,
    pub variance: f64,
}

/// Fixed inputs for one feature
pub(crate) struct PosteriorInput<'a> {
    pub counts: &'a [f64],
    pub design: &'a Array2<f64>,
    pub mu: &'a [f64],
    pub prior: Option<LogPrior>,
}

/// Outcome of the Armijo line search
#[derive(Debug, Clone, Copy)]
pub(crate) struct LineSearchOutcome {
    pub log_alpha: f64,
    pub initial_lp: f64,
    pub last_lp: f64,
    pub iterations: usize,
    pub converged: bool,
}

fn cr_weights(mu: &[f64], alpha: f64) -> Vec<f64> {
    mu.iter().map(|&m| 1.0 / (1.0 / m.max(1e-10) + alpha)).collect()
}

impl PosteriorInput<'_> {
    /// ll(alpha) - 0.5 log|X'WX| + log prior
    pub fn log_posterior(&self, log_alpha: f64) -> f64 {
        let alpha = log_alpha.exp();
        let alpha_inv = 1.0 / alpha;

        let mut ll_part = 0.0;
        for (&y, &m) in self.counts.iter().zip(self.mu) {
            let mu_i = m.max(1e-10);
            ll_part += ln_gamma(y + alpha_inv) - ln_gamma(alpha_inv);
            ll_part -= y * (mu_i + alpha_inv).ln();
            ll_part -= alpha_inv * (1.0 + mu_i * alpha).ln();
        }

        let p = self.design.ncols();
        let xtwx = weighted_cross_product(self.design, &cr_weights(self.mu, alpha));
        let log_det = log_determinant(&xtwx, p);
        let cr_term = if log_det.is_finite() { -0.5 * log_det } else { 0.0 };

        let prior_part = match self.prior {
            Some(prior) => -0.5 * (log_alpha - prior.mean).powi(2) / prior.variance,
            None => 0.0,
        };

        ll_part + cr_term + prior_part
    }

    /// d log posterior / d log(alpha)
    pub fn d_log_posterior(&self, log_alpha: f64) -> f64 {
        let alpha = log_alpha.exp();
        let alpha_neg1 = 1.0 / alpha;
        let alpha_neg2 = alpha_neg1 * alpha_neg1;

        let mut ll_sum = 0.0;
        for (&y, &m) in self.counts.iter().zip(self.mu) {
            let mu_i = m.max(1e-10);
            ll_sum += digamma(alpha_neg1);
            ll_sum += (1.0 + mu_i * alpha).ln();
            ll_sum -= mu_i * alpha / (1.0 + mu_i * alpha);
            ll_sum -= digamma(y + alpha_neg1);
            ll_sum += y / (mu_i + alpha_neg1);
        }
        let ll_part = alpha_neg2 * ll_sum;

        // d/dalpha of -0.5 log|B| is -0.5 tr(B^-1 dB), with dw/dalpha = -w^2
        let p = self.design.ncols();
        let w = cr_weights(self.mu, alpha);
        let dw: Vec<f64> = w.iter().map(|&wi| -wi * wi).collect();
        let b = weighted_cross_product(self.design, &w);
        let db = weighted_cross_product(self.design, &dw);
        let b_inv = invert_symmetric_matrix(&b, p);
        let mut trace = 0.0;
        for i in 0..p {
            for j in 0..p {
                trace += b_inv[i * p + j] * db[j * p + i];
            }
        }
        let cr_term = if trace.is_finite() { -0.5 * trace } else { 0.0 };

        let prior_part = match self.prior {
            Some(prior) => -(log_alpha - prior.mean) / prior.variance,
            None => 0.0,
        };

        (ll_part + cr_term) * alpha + prior_part
    }

    /// Gradient ascent on log(alpha) with an Armijo step rule.
    ///
    /// The step size `kappa` grows by 10% per accepted step (capped at
    /// `kappa_0`) and halves every fifth acceptance or on rejection.
    pub fn line_search(
        &self,
        start_log_alpha: f64,
        min_disp: f64,
        kappa_0: f64,
        maxit: usize,
        tol: f64,
    ) -> LineSearchOutcome {
        let min_log_alpha = (min_disp / 10.0).ln();

        let mut log_alpha = start_log_alpha;
        let initial_lp = self.log_posterior(log_alpha);
        let mut lp = initial_lp;
        let mut dlp = self.d_log_posterior(log_alpha);
        let mut kappa = kappa_0;
        let mut iter_accept = 0;

        for iter in 0..maxit {
            let mut a_propose = log_alpha + kappa * dlp;
            if a_propose < MIN_LOG_ALPHA_HARD {
                if dlp.abs() > 1e-10 {
                    kappa = (MIN_LOG_ALPHA_HARD - log_alpha) / dlp;
                }
                a_propose = MIN_LOG_ALPHA_HARD;
            }
            if a_propose > MAX_LOG_ALPHA_HARD {
                if dlp.abs() > 1e-10 {
                    kappa = (MAX_LOG_ALPHA_HARD - log_alpha) / dlp;
                }
                a_propose = MAX_LOG_ALPHA_HARD;
            }

            let lp_propose = self.log_posterior(a_propose);
            let theta_kappa = -lp_propose;
            let theta_hat_kappa = -lp - kappa * ARMIJO_EPSILON * dlp * dlp;

            if theta_kappa <= theta_hat_kappa {
                iter_accept += 1;
                log_alpha = a_propose;
                let change = lp_propose - lp;
                lp = lp_propose;

                if change < tol || log_alpha < min_log_alpha {
                    return LineSearchOutcome {
                        log_alpha,
                        initial_lp,
                        last_lp: lp,
                        iterations: iter + 1,
                        converged: true,
                    };
                }

                dlp = self.d_log_posterior(log_alpha);
                kappa = (kappa * 1.1).min(kappa_0);
                if iter_accept % 5 == 0 {
                    kappa /= 2.0;
                }
            } else {
                kappa /= 2.0;
            }
        }

        LineSearchOutcome {
            log_alpha,
            initial_lp,
            last_lp: lp,
            iterations: maxit,
            converged: false,
        }
    }

    /// Coarse-then-fine grid search over [min_disp, max_disp] on the log scale
    pub fn grid_search(&self, min_disp: f64, max_disp: f64) -> f64 {
        const N_GRID: usize = 20;

        let min_log_alpha = min_disp.ln();
        let max_log_alpha = max_disp.ln();
        let delta = (max_log_alpha - min_log_alpha) / (N_GRID - 1) as f64;

        let coarse = self.best_on_grid(min_log_alpha, delta, N_GRID);
        let fine_delta = 2.0 * delta / (N_GRID - 1) as f64;
        let fine = self.best_on_grid(coarse - delta, fine_delta, N_GRID);
        fine.exp()
    }

    fn best_on_grid(&self, start: f64, step: f64, n: usize) -> f64 {
        (0..n)
            .map(|i| start + i as f64 * step)
            .map(|la| (la, self.log_posterior(la)))
            .filter(|(_, lp)| lp.is_finite())
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(la, _)| la)
            .unwrap_or(start)
    }
}
