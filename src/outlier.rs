//! Outlier Detector: flags anomalous indices in a sample of prices under a
//! selected statistical method. Operates on anonymous `f64` values; the
//! Aggregator maps indices back to provider names.

/// Selectable outlier-detection method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutlierMethod {
    ZScore,
    ModifiedZScore,
    Iqr,
    IsolationForest,
}

impl OutlierMethod {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "z_score" | "zscore" | "z-score" => Some(Self::ZScore),
            "modified_z_score" | "modified_zscore" | "modified-z-score" => Some(Self::ModifiedZScore),
            "iqr" => Some(Self::Iqr),
            "isolation_forest" | "isolation-forest" => Some(Self::IsolationForest),
            _ => None,
        }
    }
}

/// Detects anomalous entries in `values` under `method` with sensitivity `threshold`.
/// Returns the set of indices into `values` considered outliers. Empty when
/// the method's minimum sample size isn't met.
pub fn detect(values: &[f64], method: OutlierMethod, threshold: f64) -> Vec<usize> {
    match method {
        OutlierMethod::ZScore => z_score(values, threshold),
        OutlierMethod::ModifiedZScore => modified_z_score(values, threshold),
        OutlierMethod::Iqr => iqr(values, threshold),
        OutlierMethod::IsolationForest => isolation_forest(values, threshold),
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn stdev(values: &[f64], mean_value: f64) -> f64 {
    let variance = values.iter().map(|v| (v - mean_value).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

fn median_of(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n % 2 == 0 {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    } else {
        sorted[n / 2]
    }
}

fn z_score(values: &[f64], threshold: f64) -> Vec<usize> {
    if values.len() < 3 {
        return Vec::new();
    }
    let m = mean(values);
    let sd = stdev(values, m);
    if sd == 0.0 {
        return Vec::new();
    }
    values
        .iter()
        .enumerate()
        .filter(|(_, &v)| ((v - m) / sd).abs() > threshold)
        .map(|(i, _)| i)
        .collect()
}

fn modified_z_score(values: &[f64], threshold: f64) -> Vec<usize> {
    if values.len() < 3 {
        return Vec::new();
    }
    let mut sorted: Vec<f64> = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let m = median_of(&sorted);

    let mut deviations: Vec<f64> = values.iter().map(|v| (v - m).abs()).collect();
    deviations.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mad = median_of(&deviations);
    if mad == 0.0 {
        return Vec::new();
    }

    values
        .iter()
        .enumerate()
        .filter(|(_, &v)| (0.6745 * (v - m) / mad).abs() > threshold)
        .map(|(i, _)| i)
        .collect()
}

fn iqr(values: &[f64], threshold: f64) -> Vec<usize> {
    if values.len() < 4 {
        return Vec::new();
    }
    let mut sorted: Vec<f64> = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let q1 = percentile(&sorted, 0.25);
    let q3 = percentile(&sorted, 0.75);
    let iqr_value = q3 - q1;
    let lower = q1 - threshold * iqr_value;
    let upper = q3 + threshold * iqr_value;

    values.iter().enumerate().filter(|(_, &v)| v < lower || v > upper).map(|(i, _)| i).collect()
}

/// Linear-interpolation percentile over an already-sorted slice.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let rank = p * (n - 1) as f64;
    let lower_index = rank.floor() as usize;
    let upper_index = rank.ceil() as usize;
    if lower_index == upper_index {
        return sorted[lower_index];
    }
    let fraction = rank - lower_index as f64;
    sorted[lower_index] + fraction * (sorted[upper_index] - sorted[lower_index])
}

/// Simplified isolation-forest: normalized deviation flagged against both the
/// fixed threshold and the sample's own 90th percentile of scores.
fn isolation_forest(values: &[f64], threshold: f64) -> Vec<usize> {
    if values.len() < 3 {
        return Vec::new();
    }
    let m = mean(values);
    let sd = stdev(values, m);
    if sd == 0.0 {
        return Vec::new();
    }

    let scores: Vec<f64> = values.iter().map(|v| (v - m).abs() / sd).collect();
    let mut sorted_scores = scores.clone();
    sorted_scores.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let p90 = percentile(&sorted_scores, 0.90);

    scores
        .iter()
        .enumerate()
        .filter(|(_, &score)| score > threshold && score > p90)
        .map(|(i, _)| i)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn z_score_flags_single_extreme_value() {
        // With only 3 non-outlier points the outlier's own pull on mean and
        // stdev caps its z-score below 2.0 no matter how extreme it is; a
        // few more unremarkable samples are enough to let it clear the bar.
        let values = vec![50000.0, 50050.0, 49980.0, 50020.0, 49995.0, 80000.0];
        let outliers = detect(&values, OutlierMethod::ZScore, 2.0);
        assert_eq!(outliers, vec![5]);
    }

    #[test]
    fn z_score_empty_below_minimum_sample_size() {
        let values = vec![100.0, 200.0];
        assert!(detect(&values, OutlierMethod::ZScore, 2.0).is_empty());
    }

    #[test]
    fn z_score_empty_when_all_identical() {
        let values = vec![100.0, 100.0, 100.0];
        assert!(detect(&values, OutlierMethod::ZScore, 2.0).is_empty());
    }

    #[test]
    fn iqr_requires_at_least_four_samples() {
        let values = vec![1.0, 2.0, 3.0];
        assert!(detect(&values, OutlierMethod::Iqr, 1.5).is_empty());
    }

    #[test]
    fn modified_z_score_is_robust_to_single_spike() {
        let values = vec![100.0, 101.0, 99.0, 100.0, 500.0];
        let outliers = detect(&values, OutlierMethod::ModifiedZScore, 3.5);
        assert_eq!(outliers, vec![4]);
    }

    #[test]
    fn parse_accepts_known_aliases() {
        assert_eq!(OutlierMethod::parse("z_score"), Some(OutlierMethod::ZScore));
        assert_eq!(OutlierMethod::parse("IQR"), Some(OutlierMethod::Iqr));
        assert_eq!(OutlierMethod::parse("nonsense"), None);
    }
}
