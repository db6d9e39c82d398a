/*!
Clusterer (C8): density-based clustering over a batch of embeddings, with
centroid computation and a central/outlier partition per cluster
(spec §4.8). The `hdbscan` crate supplies the density-based label
assignment (the part this spec treats as a pluggable library dependency,
design note §9); the central/outlier split within each accepted cluster
and the centroid post-processing are ours.

Points the clusterer labels as global noise take no part in any cluster —
"Clusters partition a **subset** of the indices" (spec §4.8) — so they are
simply absent from the returned clusters.
*/

use crate::types::{Cluster, EmbeddingVector};
use hdbscan::{Hdbscan, HdbscanHyperParams};
use rand::Rng;

pub const MIN_CLUSTER_SIZE: usize = 3;

/// Within an accepted cluster, the farthest-from-centroid fraction of
/// members is reported as the cluster's periphery ("outliers" in spec
/// terms), as long as doing so would not drop central membership below
/// `MIN_CLUSTER_SIZE`.
const OUTLIER_FRACTION: f64 = 0.3;

fn euclidean_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum::<f64>().sqrt()
}

fn centroid_of(points: &[&EmbeddingVector]) -> EmbeddingVector {
    let dim = points.first().map(|p| p.len()).unwrap_or(0);
    let mut sum = vec![0.0; dim];
    for p in points {
        for (s, v) in sum.iter_mut().zip(p.iter()) {
            *s += v;
        }
    }
    let n = points.len().max(1) as f64;
    sum.into_iter().map(|v| v / n).collect()
}

/// Run HDBSCAN (Euclidean distance, `min_cluster_size = 3`) over `X`,
/// partition each non-noise cluster into central/outlier index sets, and
/// compute each cluster's centroid from its central points only.
pub fn cluster(embeddings: &[EmbeddingVector]) -> Vec<Cluster> {
    if embeddings.len() < MIN_CLUSTER_SIZE {
        return Vec::new();
    }

    let data: Vec<Vec<f64>> = embeddings.to_vec();
    let hyper_params = HdbscanHyperParams::builder()
        .min_cluster_size(MIN_CLUSTER_SIZE)
        .build();
    let clusterer = Hdbscan::new(&data, hyper_params);
    let labels = match clusterer.cluster() {
        Ok(labels) => labels,
        Err(_) => return Vec::new(),
    };

    let max_label = labels.iter().filter(|&&l| l >= 0).max().copied().unwrap_or(-1);
    if max_label < 0 {
        return Vec::new();
    }

    let mut clusters = Vec::new();
    for label in 0..=max_label {
        let members: Vec<usize> = labels
            .iter()
            .enumerate()
            .filter(|(_, &l)| l == label)
            .map(|(i, _)| i)
            .collect();
        if members.len() < MIN_CLUSTER_SIZE {
            continue;
        }

        let member_points: Vec<&EmbeddingVector> = members.iter().map(|&i| &embeddings[i]).collect();
        let centroid = centroid_of(&member_points);

        let mut by_distance: Vec<(usize, f64)> = members
            .iter()
            .map(|&i| (i, euclidean_distance(&embeddings[i], &centroid)))
            .collect();
        by_distance.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());

        let max_outliers = members.len().saturating_sub(MIN_CLUSTER_SIZE);
        let wanted_outliers = ((members.len() as f64) * OUTLIER_FRACTION).floor() as usize;
        let n_outliers = wanted_outliers.min(max_outliers);

        let n_central = members.len() - n_outliers;
        let central: Vec<usize> = by_distance[..n_central].iter().map(|(i, _)| *i).collect();
        let outliers: Vec<usize> = by_distance[n_central..].iter().map(|(i, _)| *i).collect();

        let central_points: Vec<&EmbeddingVector> = central.iter().map(|&i| &embeddings[i]).collect();
        let centroid = centroid_of(&central_points);

        clusters.push(Cluster {
            id: clusters.len(),
            central,
            outliers,
            centroid,
        });
    }

    clusters
}

/// Testing-only randomised mode gated by `RANDOM_CLUSTERS` (spec §4.8):
/// synthesises 3–5 clusters with a ~70/30 central/outlier split and random
/// 512-d centroids. Must never run against production data — callers gate
/// this behind `common::Config::random_clusters`.
pub fn random_clusters(n_items: usize) -> Vec<Cluster> {
    let mut rng = rand::thread_rng();
    let n_clusters = rng.gen_range(3..=5);
    let mut indices: Vec<usize> = (0..n_items).collect();
    let mut clusters = Vec::new();

    for id in 0..n_clusters {
        if indices.is_empty() {
            break;
        }
        let take = (indices.len() / (n_clusters - id).max(1)).max(1).min(indices.len());
        let members: Vec<usize> = indices.drain(..take).collect();
        let split = ((members.len() as f64) * 0.7).ceil() as usize;
        let split = split.max(1).min(members.len());
        let central = members[..split].to_vec();
        let outliers = members[split..].to_vec();
        let centroid: EmbeddingVector = (0..512).map(|_| rng.gen_range(-1.0..1.0)).collect();
        clusters.push(Cluster { id, central, outliers, centroid });
    }

    clusters
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vector_at(dim: usize, offset: f64) -> EmbeddingVector {
        (0..dim).map(|i| offset + i as f64 * 0.001).collect()
    }

    #[test]
    fn cluster_disjointness_central_and_outlier_sets_dont_overlap() {
        let mut embeddings = Vec::new();
        for _ in 0..5 {
            embeddings.push(vector_at(8, 0.0));
        }
        for _ in 0..5 {
            embeddings.push(vector_at(8, 10.0));
        }
        let clusters = cluster(&embeddings);
        let mut seen = std::collections::HashSet::new();
        for c in &clusters {
            for &i in c.central.iter().chain(c.outliers.iter()) {
                assert!(seen.insert(i), "index {i} appears in more than one cluster");
            }
        }
    }

    #[test]
    fn centroid_is_mean_of_central_points() {
        let mut embeddings = Vec::new();
        for _ in 0..6 {
            embeddings.push(vector_at(4, 0.0));
        }
        let clusters = cluster(&embeddings);
        for c in &clusters {
            let central_points: Vec<&EmbeddingVector> = c.central.iter().map(|&i| &embeddings[i]).collect();
            let expected = centroid_of(&central_points);
            let diff = euclidean_distance(&c.centroid, &expected);
            assert!(diff < 1e-9, "centroid diverges from mean of central points: {diff}");
        }
    }

    #[test]
    fn fewer_than_min_cluster_size_yields_no_clusters() {
        let embeddings = vec![vector_at(4, 0.0), vector_at(4, 1.0)];
        assert!(cluster(&embeddings).is_empty());
    }

    #[test]
    fn random_clusters_respects_central_outlier_split_and_dimension() {
        let clusters = random_clusters(20);
        assert!(clusters.len() >= 3 && clusters.len() <= 5);
        for c in &clusters {
            assert_eq!(c.centroid.len(), 512);
            assert!(!c.central.is_empty());
        }
    }
}
