//! Negative binomial distribution utilities

use statrs::function::gamma::ln_gamma;

/// Floor applied to fitted means before weights are computed
pub const MIN_MU: f64 = 0.5;

/// Any |beta| above this stops IRLS and triggers the fallback optimizer.
/// On the natural log scale this is a fold change of roughly 1e13.
pub const MAX_LFC_BETA: f64 = 30.0;

/// Maximum eta value to prevent overflow (exp(700) ≈ 1e304)
pub const MAX_ETA: f64 = 700.0;

/// mu = size_factor * exp(eta)
pub fn nb_mean(eta: f64, size_factor: f64) -> f64 {
    // Only clamp to prevent overflow, not to limit LFC
    let eta_clamped = eta.clamp(-MAX_ETA, MAX_ETA);
    size_factor * eta_clamped.exp()
}

/// Var(Y) = mu + alpha * mu^2
pub fn nb_variance(mu: f64, alpha: f64) -> f64 {
    mu + alpha * mu * mu
}

/// Log probability of count `y` under NB(mean = mu, dispersion = alpha)
pub fn nb_log_likelihood(y: f64, mu: f64, alpha: f64) -> f64 {
    if mu <= 0.0 || alpha <= 0.0 {
        return f64::NEG_INFINITY;
    }

    let size = 1.0 / alpha;
    let prob = size / (size + mu);

    ln_gamma(y + size) - ln_gamma(size) - ln_gamma(y + 1.0)
        + size * prob.ln()
        + y * (1.0 - prob).ln()
}

/// Deviance contribution -2 log L summed over one feature
pub fn nb_deviance(counts: &[f64], mu: &[f64], alpha: f64) -> f64 {
    counts
        .iter()
        .zip(mu)
        .map(|(&y, &m)| -2.0 * nb_log_likelihood(y, m, alpha))
        .sum()
}

/// IRLS weight W = mu / (1 + alpha * mu).
/// `mu` should already have [`MIN_MU`] applied.
pub fn nb_weight(mu: f64, alpha: f64) -> f64 {
    mu / (1.0 + alpha * mu)
}
