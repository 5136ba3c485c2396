//! Value tiers derived from clusters
//!
//! Cluster indices out of K-Means carry no order. Tiers come from ranking
//! clusters by their mean CLV, never from the raw index.

use crate::cluster::KMeansModel;
use crate::score::ScoredCustomer;
use std::fmt;

/// Customer value tier, best first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tier {
    Diamond,
    Gold,
    Silver,
    Bronze,
}

impl Tier {
    /// Tier for a 1-based rank by mean CLV
    pub fn from_rank(rank: usize) -> Option<Tier> {
        match rank {
            1 => Some(Tier::Diamond),
            2 => Some(Tier::Gold),
            3 => Some(Tier::Silver),
            4 => Some(Tier::Bronze),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Tier::Diamond => "Diamond",
            Tier::Gold => "Gold",
            Tier::Silver => "Silver",
            Tier::Bronze => "Bronze",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Mean CLV and size of one cluster
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterStats {
    pub cluster_id: usize,
    pub mean_clv: f64,
    pub count: usize,
}

/// A cluster with its rank and tier
#[derive(Debug, Clone, PartialEq)]
pub struct TierSummary {
    pub cluster_id: usize,
    /// 1 = highest mean CLV; tied clusters share the better rank
    pub rank: usize,
    pub tier: Tier,
    pub mean_clv: f64,
    pub count: usize,
}

/// Cluster and tier of one customer
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterAssignment {
    pub customer_id: String,
    pub cluster_id: usize,
    pub tier: Tier,
}

/// Mean CLV and member count per non-empty cluster, by cluster id
pub fn cluster_stats(customers: &[ScoredCustomer], labels: &[usize]) -> Vec<ClusterStats> {
    let n_clusters = labels.iter().max().map_or(0, |max| max + 1);
    let mut sums = vec![(0.0, 0usize); n_clusters];
    for (customer, &label) in customers.iter().zip(labels) {
        sums[label].0 += customer.clv;
        sums[label].1 += 1;
    }

    sums.into_iter()
        .enumerate()
        .filter(|(_, (_, count))| *count > 0)
        .map(|(cluster_id, (sum, count))| ClusterStats {
            cluster_id,
            mean_clv: sum / count as f64,
            count,
        })
        .collect()
}

/// Rank clusters by mean CLV, highest first, and attach tiers
///
/// Uses min-ranking: a cluster's rank is one plus the number of clusters
/// with a strictly higher mean. The result is sorted by rank, then cluster id.
pub fn rank_clusters(stats: &[ClusterStats]) -> Vec<TierSummary> {
    let mut ranked: Vec<TierSummary> = stats
        .iter()
        .filter_map(|s| {
            let rank = 1 + stats.iter().filter(|o| o.mean_clv > s.mean_clv).count();
            Tier::from_rank(rank).map(|tier| TierSummary {
                cluster_id: s.cluster_id,
                rank,
                tier,
                mean_clv: s.mean_clv,
                count: s.count,
            })
        })
        .collect();

    ranked.sort_by(|a, b| a.rank.cmp(&b.rank).then(a.cluster_id.cmp(&b.cluster_id)));
    ranked
}

/// Tier every customer through its cluster's rank
pub fn assign_tiers(
    customers: &[ScoredCustomer],
    labels: &[usize],
    tiers: &[TierSummary],
) -> Vec<ClusterAssignment> {
    customers
        .iter()
        .zip(labels)
        .filter_map(|(customer, &cluster_id)| {
            tiers
                .iter()
                .find(|t| t.cluster_id == cluster_id)
                .map(|t| ClusterAssignment {
                    customer_id: customer.customer_id.clone(),
                    cluster_id,
                    tier: t.tier,
                })
        })
        .collect()
}

/// Rank a fitted clustering and tier its customers
pub fn segment(customers: &[ScoredCustomer], model: &KMeansModel) -> (Vec<TierSummary>, Vec<ClusterAssignment>) {
    let labels = model.labels.to_vec();
    let tiers = rank_clusters(&cluster_stats(customers, &labels));
    let assignments = assign_tiers(customers, &labels, &tiers);
    (tiers, assignments)
}
