//! ELO rating deltas applied at match end

/// Fixed K-factor for the MVP ladder
const K_FACTOR: f64 = 32.0;

/// Expected score of `player` against `opponent` (standard ELO curve)
fn expected_score(player: i32, opponent: i32) -> f64 {
    1.0 / (1.0 + 10f64.powf(f64::from(opponent - player) / 400.0))
}

/// Rating delta for a participant given their actual score
/// (1.0 win, 0.5 draw, 0.0 loss)
pub fn rating_delta(player: i32, opponent: i32, score: f64) -> i32 {
    (K_FACTOR * (score - expected_score(player, opponent))).round() as i32
}
