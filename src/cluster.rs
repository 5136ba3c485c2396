//! K-Means clustering of scored customers

use crate::error::{ClvError, Result};
use crate::score::ScoredCustomer;
use linfa::prelude::*;
use linfa::DatasetBase;
use linfa_clustering::KMeans;
use linfa_nn::distance::L2Dist;
use ndarray::{Array1, Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Customers are always split into this many segments
pub const N_SEGMENTS: usize = 4;

/// K-Means settings
#[derive(Debug, Clone, Copy)]
pub struct KMeansSettings {
    pub max_iters: u64,
    pub tolerance: f64,
    /// Seed for centroid initialization, so reruns give the same clusters
    pub seed: u64,
}

impl Default for KMeansSettings {
    fn default() -> Self {
        Self {
            max_iters: 300,
            tolerance: 1e-4,
            seed: 42,
        }
    }
}

/// Segmentation features for every scored customer
#[derive(Debug, Clone)]
pub struct SegmentFeatures {
    /// (n_customers, 5): frequency, recency, T, monetary value, predicted purchases
    pub features: Array2<f64>,
    pub customer_ids: Vec<String>,
}

impl SegmentFeatures {
    pub fn from_scored(customers: &[ScoredCustomer]) -> Result<Self> {
        let raw: Vec<f64> = customers
            .iter()
            .flat_map(|c| c.segment_features())
            .collect();
        let features = Array2::from_shape_vec((customers.len(), 5), raw)
            .map_err(|e| ClvError::Clustering(e.to_string()))?;

        Ok(Self {
            features,
            customer_ids: customers.iter().map(|c| c.customer_id.clone()).collect(),
        })
    }
}

/// K-Means model wrapper with fitted parameters
#[derive(Debug)]
pub struct KMeansModel {
    /// Number of clusters
    pub n_clusters: usize,
    /// Cluster assignments, aligned with the input rows
    pub labels: Array1<usize>,
    /// Cluster centroids in feature space
    pub centroids: Array2<f64>,
    /// Within-cluster sum of squares (inertia)
    pub inertia: f64,
}

impl KMeansModel {
    /// Get cluster sizes
    pub fn cluster_sizes(&self) -> Vec<usize> {
        self.labels
            .iter()
            .filter(|&&label| label < self.n_clusters)
            .fold(vec![0; self.n_clusters], |mut sizes, &label| {
                sizes[label] += 1;
                sizes
            })
    }

    /// Mean silhouette coefficient over the first `sample_size` rows
    ///
    /// Distances are only taken between those rows, which keeps the cost
    /// quadratic in `sample_size` rather than in the customer count. Rows
    /// are in customer id order, so the subset is not a random sample.
    pub fn compute_silhouette_sample(&self, features: &Array2<f64>, sample_size: usize) -> f64 {
        let n_samples = features.nrows().min(sample_size);
        if n_samples < 2 {
            return 0.0;
        }

        let mut silhouette_sum = 0.0;

        for i in 0..n_samples {
            let point = features.row(i);
            let cluster_label = self.labels[i];

            let mut same_cluster = (0.0, 0usize);
            let mut other_clusters = vec![(0.0, 0usize); self.n_clusters];

            for j in (0..n_samples).filter(|&j| j != i) {
                let distance = euclidean_distance(&point, &features.row(j));
                let other_label = self.labels[j];

                if other_label == cluster_label {
                    same_cluster.0 += distance;
                    same_cluster.1 += 1;
                } else if other_label < self.n_clusters {
                    other_clusters[other_label].0 += distance;
                    other_clusters[other_label].1 += 1;
                }
            }

            // a(i): mean distance within the own cluster
            let a_i = if same_cluster.1 == 0 {
                0.0
            } else {
                same_cluster.0 / same_cluster.1 as f64
            };

            // b(i): lowest mean distance to another cluster
            let b_i = other_clusters
                .iter()
                .filter(|(_, count)| *count > 0)
                .map(|(sum, count)| sum / *count as f64)
                .fold(f64::INFINITY, f64::min);

            let silhouette_i = if b_i.is_infinite() || (a_i == 0.0 && b_i == 0.0) {
                0.0
            } else {
                (b_i - a_i) / a_i.max(b_i)
            };

            silhouette_sum += silhouette_i;
        }

        silhouette_sum / n_samples as f64
    }
}

/// Fit K-Means with `N_SEGMENTS` clusters on the segmentation features
///
/// # Returns
/// * Fitted `KMeansModel`, or `ClvError::InsufficientData` when there are
///   fewer customers than segments
pub fn fit_kmeans(segment: &SegmentFeatures, settings: &KMeansSettings) -> Result<KMeansModel> {
    let n_samples = segment.features.nrows();
    if n_samples < N_SEGMENTS {
        return Err(ClvError::InsufficientData(format!(
            "{n_samples} scored customers cannot be split into {N_SEGMENTS} segments"
        )));
    }

    let dataset = DatasetBase::from(segment.features.clone());
    let rng = StdRng::seed_from_u64(settings.seed);

    let model: KMeans<f64, L2Dist> = KMeans::params_with(N_SEGMENTS, rng, L2Dist)
        .max_n_iterations(settings.max_iters)
        .tolerance(settings.tolerance)
        .fit(&dataset)
        .map_err(|e| ClvError::Clustering(e.to_string()))?;

    let labels: Array1<usize> = model.predict(&segment.features);
    let centroids = model.centroids().clone();
    let inertia = compute_inertia(&segment.features, &labels, &centroids);

    Ok(KMeansModel {
        n_clusters: N_SEGMENTS,
        labels,
        centroids,
        inertia,
    })
}

/// Compute within-cluster sum of squares (inertia)
fn compute_inertia(features: &Array2<f64>, labels: &Array1<usize>, centroids: &Array2<f64>) -> f64 {
    labels
        .iter()
        .enumerate()
        .filter(|(_, cluster)| **cluster < centroids.nrows())
        .map(|(i, &cluster)| squared_distance(&features.row(i), &centroids.row(cluster)))
        .sum()
}

fn squared_distance(a: &ArrayView1<f64>, b: &ArrayView1<f64>) -> f64 {
    (a - b).mapv(|d| d * d).sum()
}

fn euclidean_distance(a: &ArrayView1<f64>, b: &ArrayView1<f64>) -> f64 {
    squared_distance(a, b).sqrt()
}
#[cfg(test)]
mod tests {
    use super::*;

    fn scored(id: usize, frequency: u32, monetary_value: f64, clv: f64) -> ScoredCustomer {
        ScoredCustomer {
            customer_id: format!("{id}"),
            frequency,
            recency: 100.0 + frequency as f64,
            t: 300.0,
            monetary_value,
            predicted_purchases: frequency as f64 * 0.5,
            probability_alive: 0.9,
            predicted_monetary: monetary_value,
            clv,
        }
    }

    /// Four well separated groups of three customers
    fn create_test_segments() -> SegmentFeatures {
        let customers: Vec<ScoredCustomer> = (0..12)
            .map(|i| {
                let group = i / 3;
                let jitter = (i % 3) as f64;
                scored(i, 1 + group as u32 * 10, 50.0 + group as f64 * 500.0 + jitter, 10.0)
            })
            .collect();
        SegmentFeatures::from_scored(&customers).unwrap()
    }

    #[test]
    fn test_segment_features_shape() {
        let segments = create_test_segments();
        assert_eq!(segments.features.shape(), &[12, 5]);
        assert_eq!(segments.customer_ids.len(), 12);
        assert_eq!(segments.features[[3, 0]], 11.0);
    }

    #[test]
    fn test_fit_kmeans() {
        let segments = create_test_segments();
        let model = fit_kmeans(&segments, &KMeansSettings::default()).unwrap();

        assert_eq!(model.n_clusters, N_SEGMENTS);
        assert_eq!(model.labels.len(), 12);
        assert_eq!(model.centroids.shape(), &[4, 5]);
        assert!(model.inertia >= 0.0 && model.inertia.is_finite());

        // Members of one group share a label
        for group in 0..4 {
            let label = model.labels[group * 3];
            assert!((0..3).all(|k| model.labels[group * 3 + k] == label));
        }
    }

    #[test]
    fn test_cluster_sizes() {
        let segments = create_test_segments();
        let model = fit_kmeans(&segments, &KMeansSettings::default()).unwrap();

        let sizes = model.cluster_sizes();
        assert_eq!(sizes.len(), 4);
        assert_eq!(sizes.iter().sum::<usize>(), 12);
    }

    #[test]
    fn test_fit_is_reproducible() {
        let segments = create_test_segments();
        let first = fit_kmeans(&segments, &KMeansSettings::default()).unwrap();
        let second = fit_kmeans(&segments, &KMeansSettings::default()).unwrap();
        assert_eq!(first.labels, second.labels);
    }

    #[test]
    fn test_silhouette_of_separated_groups() {
        let segments = create_test_segments();
        let model = fit_kmeans(&segments, &KMeansSettings::default()).unwrap();
        let silhouette = model.compute_silhouette_sample(&segments.features, 100);
        assert!(silhouette > 0.5);
    }

    #[test]
    fn test_silhouette_uses_leading_rows() {
        let segments = create_test_segments();
        let model = fit_kmeans(&segments, &KMeansSettings::default()).unwrap();

        // The first three rows form one group with no other cluster to compare
        assert_eq!(model.compute_silhouette_sample(&segments.features, 3), 0.0);
        assert_eq!(model.compute_silhouette_sample(&segments.features, 1), 0.0);
    }

    #[test]
    fn test_distances() {
        let a = ndarray::arr1(&[0.0, 3.0]);
        let b = ndarray::arr1(&[4.0, 0.0]);
        assert_eq!(squared_distance(&a.view(), &b.view()), 25.0);
        assert_eq!(euclidean_distance(&a.view(), &b.view()), 5.0);
    }

    #[test]
    fn test_too_few_customers() {
        let customers: Vec<ScoredCustomer> = (0..3).map(|i| scored(i, 2, 30.0, 5.0)).collect();
        let segments = SegmentFeatures::from_scored(&customers).unwrap();
        let result = fit_kmeans(&segments, &KMeansSettings::default());
        assert!(matches!(result, Err(ClvError::InsufficientData(_))));
    }
}
