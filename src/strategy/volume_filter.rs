use crate::models::Candle;

/// Volume confirmation: the latest bar must trade at least `multiplier`
/// times the average volume of the preceding bars.
///
/// Fails closed: fewer than `window` bars means "not confirmed".
pub fn volume_confirmed(candles: &[Candle], multiplier: f64, window: usize) -> bool {
    if candles.len() < window || window < 2 {
        return false;
    }

    let (latest, history) = match candles.split_last() {
        Some(parts) => parts,
        None => return false,
    };

    let average = history.iter().map(|c| c.volume).sum::<f64>() / history.len() as f64;

    latest.volume >= average * multiplier
}
