use tracing::warn;

use crate::model::{
    constants::{
        CONVERGENCE_TOLERANCE, GLICKO_SCALE, INITIAL_DEVIATION, INITIAL_RATING,
        MAX_VOLATILITY_ITERATIONS, MIN_OPPONENT_DEVIATION
    },
    structures::{match_result::MatchResult, rating::RatingTriple}
};

/// Computes the posterior rating triple for a single participant over one
/// rating period, following Glickman's Glicko-2 procedure.
///
/// Pure and deterministic: identical inputs always produce bit-identical
/// outputs. A participant with no opponents receives the inactivity update
/// (deviation grows toward the unrated ceiling, rating and volatility are
/// untouched).
pub fn rate(prior: &RatingTriple, opponents: &[(RatingTriple, MatchResult)], tau: f64) -> RatingTriple {
    let mu = to_mu(prior.rating);
    let phi = to_phi(prior.deviation);
    let sigma = prior.volatility;

    if opponents.is_empty() {
        let ceiling = to_phi(INITIAL_DEVIATION).max(phi);
        let phi_star = (phi * phi + sigma * sigma).sqrt().min(ceiling);
        return from_internal(mu, phi_star, sigma);
    }

    // Estimation variance and expected-vs-observed accumulation over all
    // opponent pairings
    let mut v_inv = 0.0;
    let mut delta_sum = 0.0;
    for (opponent, result) in opponents {
        let phi_j = to_phi(opponent.deviation.max(MIN_OPPONENT_DEVIATION));
        let mu_j = to_mu(opponent.rating);

        let g_j = g(phi_j);
        let e_j = expected_score(mu, mu_j, phi_j);

        v_inv += g_j * g_j * e_j * (1.0 - e_j);
        delta_sum += g_j * (result.score() - e_j);
    }

    let v = 1.0 / v_inv;
    let delta = v * delta_sum;

    let sigma_prime = solve_volatility(phi, v, delta, sigma, tau);

    let phi_star = (phi * phi + sigma_prime * sigma_prime).sqrt();
    let phi_prime = 1.0 / (1.0 / (phi_star * phi_star) + 1.0 / v).sqrt();
    let mu_prime = mu + phi_prime * phi_prime * delta_sum;

    from_internal(mu_prime, phi_prime, sigma_prime)
}

/// Solves for the new volatility with the Illinois-style iteration from
/// step 5 of the Glicko-2 procedure. Converges to [`CONVERGENCE_TOLERANCE`];
/// if the iteration cap is hit first, the best estimate found so far is used
/// rather than failing the update.
fn solve_volatility(phi: f64, v: f64, delta: f64, sigma: f64, tau: f64) -> f64 {
    let a = (sigma * sigma).ln();
    let f = |x: f64| {
        let ex = x.exp();
        let phi2 = phi * phi;
        ex * (delta * delta - phi2 - v - ex) / (2.0 * (phi2 + v + ex).powi(2)) - (x - a) / (tau * tau)
    };

    let mut big_a = a;
    let mut big_b = if delta * delta > phi * phi + v {
        (delta * delta - phi * phi - v).ln()
    } else {
        let mut k = 1.0;
        for _ in 0..MAX_VOLATILITY_ITERATIONS {
            if f(a - k * tau) >= 0.0 {
                break;
            }
            k += 1.0;
        }
        a - k * tau
    };

    let mut f_a = f(big_a);
    let mut f_b = f(big_b);
    let mut iterations = 0;
    while (big_b - big_a).abs() > CONVERGENCE_TOLERANCE {
        if iterations >= MAX_VOLATILITY_ITERATIONS {
            warn!(
                "Volatility iteration cap reached (|B - A| = {:.2e}), clamping to best estimate",
                (big_b - big_a).abs()
            );
            break;
        }

        let big_c = big_a + (big_a - big_b) * f_a / (f_b - f_a);
        let f_c = f(big_c);

        if f_c * f_b <= 0.0 {
            big_a = big_b;
            f_a = f_b;
        } else {
            f_a /= 2.0;
        }
        big_b = big_c;
        f_b = f_c;
        iterations += 1;
    }

    (big_a / 2.0).exp()
}

fn g(phi: f64) -> f64 {
    1.0 / (1.0 + 3.0 * phi * phi / (std::f64::consts::PI * std::f64::consts::PI)).sqrt()
}

fn expected_score(mu: f64, mu_j: f64, phi_j: f64) -> f64 {
    1.0 / (1.0 + (-g(phi_j) * (mu - mu_j)).exp())
}

fn to_mu(rating: f64) -> f64 {
    (rating - INITIAL_RATING) / GLICKO_SCALE
}

fn to_phi(deviation: f64) -> f64 {
    deviation / GLICKO_SCALE
}

fn from_internal(mu: f64, phi: f64, sigma: f64) -> RatingTriple {
    RatingTriple {
        rating: mu * GLICKO_SCALE + INITIAL_RATING,
        deviation: (phi * GLICKO_SCALE).max(0.0),
        volatility: sigma.max(0.0)
    }
}
