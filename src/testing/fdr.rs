//! Benjamini-Hochberg false discovery rate correction

/// Apply Benjamini-Hochberg FDR correction to p-values.
///
/// NaN p-values are excluded from the ranking and stay NaN. The number of
/// tests `m` counts only the non-NaN values. Adjusted values are capped at 1
/// and are monotone in the raw p-value.
pub fn benjamini_hochberg(pvalues: &[f64]) -> Vec<f64> {
    let n = pvalues.len();
    let mut tested: Vec<usize> = (0..n).filter(|&i| !pvalues[i].is_nan()).collect();
    let m = tested.len();

    let mut padj = vec![f64::NAN; n];
    if m == 0 {
        return padj;
    }

    tested.sort_by(|&a, &b| pvalues[a].total_cmp(&pvalues[b]));

    // Step up from the largest p-value, keeping the running minimum
    let mut cummin = f64::INFINITY;
    for (rank0, &i) in tested.iter().enumerate().rev() {
        let rank = (rank0 + 1) as f64;
        let adj = (pvalues[i] * m as f64 / rank).min(1.0);
        cummin = cummin.min(adj);
        padj[i] = cummin;
    }

    padj
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bh_known_values() {
        let padj = benjamini_hochberg(&[0.01, 0.04, 0.03, 0.02]);
        for adj in &padj {
            assert!((adj - 0.04).abs() < 1e-12);
        }

        let padj = benjamini_hochberg(&[0.001, 0.5, 0.02]);
        assert!((padj[0] - 0.003).abs() < 1e-12);
        assert!((padj[2] - 0.03).abs() < 1e-12);
        assert!((padj[1] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_bh_with_nan() {
        let pvalues = vec![0.01, f64::NAN, 0.03, 0.02];
        let padj = benjamini_hochberg(&pvalues);

        assert!(padj[1].is_nan());
        // m = 3, not 4
        assert!((padj[0] - 0.03).abs() < 1e-12);
        assert!(padj[2].is_finite() && padj[3].is_finite());
    }

    #[test]
    fn test_bh_monotone_and_capped() {
        let pvalues = vec![0.9, 0.001, 0.2, 0.04, 0.04, 0.7, 1.0];
        let padj = benjamini_hochberg(&pvalues);

        for i in 0..pvalues.len() {
            assert!(padj[i] >= pvalues[i] && padj[i] <= 1.0);
            for j in 0..pvalues.len() {
                if pvalues[i] <= pvalues[j] {
                    assert!(padj[i] <= padj[j]);
                }
            }
        }
    }

    #[test]
    fn test_bh_all_nan_or_empty() {
        assert!(benjamini_hochberg(&[]).is_empty());
        assert!(benjamini_hochberg(&[f64::NAN, f64::NAN]).iter().all(|p| p.is_nan()));
    }
}
