//! Sample selection, prevalence filtering and outlier detection

mod cooks;
mod prevalence;
mod samples;

pub use cooks::{
    calculate_cooks_distance, default_cooks_cutoff, flag_cooks_outliers, max_cooks_per_feature,
    robust_method_of_moments_disp, MIN_REPLICATES_FOR_COOKS,
};
pub use prevalence::{prune_features, FilterReport, PrevalenceFilter};
pub use samples::{select_samples, SamplePredicate};
