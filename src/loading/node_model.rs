//! Node models distribute the flow that in-links want to send among the
//! out-links that can receive it.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use smallvec::{smallvec, SmallVec};

/// Inputs into the [`NodeModel::solve`] method.
/// All flows are in vehicles per step.
pub struct NodeModelInput<'a> {
    /// The sending flow of each in-link.
    pub sending: &'a [f64],
    /// The capacity of each in-link.
    pub capacity: &'a [f64],
    /// The share of each in-link's flow bound for each out-link, row major (in × out).
    /// Rows of in-links with sending flow sum to one.
    pub fractions: &'a [f64],
    /// The receiving flow of each out-link.
    pub receiving: &'a [f64],
}

impl NodeModelInput<'_> {
    pub fn tot_in_links(&self) -> usize {
        self.sending.len()
    }

    pub fn tot_out_links(&self) -> usize {
        self.receiving.len()
    }

    fn fraction(&self, in_link: usize, out_link: usize) -> f64 {
        self.fractions[in_link * self.tot_out_links() + out_link]
    }
}

/// A rule to resolve competition for receiving flow at a node.
///
/// A solution must never exceed the sending flow of an in-link nor the receiving
/// flow of an out-link, and must respect first-in-first-out on every in-link,
/// meaning all turns of an in-link are scaled back by the same factor.
pub trait NodeModel: Send + Sync {
    /// Writes the realised turning flows into `flows`, row major (in × out).
    fn solve(&self, input: &NodeModelInput, flows: &mut [f64]);
}

/// The available node models.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum NodeModelKind {
    /// See [OrcaNodeModel].
    #[default]
    Orca,
}

impl NodeModelKind {
    /// Instantiates the node model.
    pub fn build(self) -> Box<dyn NodeModel> {
        match self {
            Self::Orca => Box::new(OrcaNodeModel),
        }
    }
}

/// A general node model which shares the receiving flow of every out-link among the
/// in-links competing for it in proportion to their capacity.
///
/// Out-links are resolved from the most to the least restrictive. The restriction of
/// an out-link is the share of its oriented demand it can accept, where the oriented
/// demand of a turn is the in-link capacity times its turning fraction. In-links that
/// want to send less than that share of their capacity are served in full; otherwise
/// every remaining in-link using the out-link is reduced to the share.
#[derive(Clone, Copy, Debug, Default)]
pub struct OrcaNodeModel;

impl NodeModel for OrcaNodeModel {
    fn solve(&self, input: &NodeModelInput, flows: &mut [f64]) {
        let tot_in = input.tot_in_links();
        let tot_out = input.tot_out_links();
        flows.iter_mut().for_each(|q| *q = 0.0);

        let mut remaining: SmallVec<[f64; 8]> = input.receiving.iter().copied().collect();
        let mut in_active: SmallVec<[bool; 8]> = input.sending.iter().map(|&s| s > 0.0).collect();
        let mut out_active: SmallVec<[bool; 8]> = smallvec![true; tot_out];

        let mut serve = |i: usize, total: f64, remaining: &mut [f64]| {
            for j in 0..tot_out {
                let q = total * input.fraction(i, j);
                flows[i * tot_out + j] = q;
                remaining[j] -= q;
            }
        };

        loop {
            // Find the most restrictive out-link
            let mut restrictive: Option<(usize, f64)> = None;
            for j in 0..tot_out {
                if !out_active[j] {
                    continue;
                }
                let oriented: f64 = (0..tot_in)
                    .filter(|&i| in_active[i])
                    .map(|i| input.capacity[i] * input.fraction(i, j))
                    .sum();
                if oriented <= 0.0 {
                    out_active[j] = false;
                    continue;
                }
                let factor = remaining[j].max(0.0) / oriented;
                if restrictive.map_or(true, |(_, a)| factor < a) {
                    restrictive = Some((j, factor));
                }
            }
            let (j, factor) = match restrictive {
                Some(found) => found,
                None => break,
            };

            let users: SmallVec<[usize; 8]> = (0..tot_in)
                .filter(|&i| in_active[i] && input.fraction(i, j) > 0.0)
                .collect();
            let demand_constrained: SmallVec<[usize; 8]> = users
                .iter()
                .copied()
                .filter(|&i| input.sending[i] <= factor * input.capacity[i])
                .collect();

            if demand_constrained.is_empty() {
                for &i in &users {
                    serve(i, factor * input.capacity[i], &mut remaining);
                    in_active[i] = false;
                }
                out_active[j] = false;
            } else {
                for &i in &demand_constrained {
                    serve(i, input.sending[i], &mut remaining);
                    in_active[i] = false;
                }
            }
        }

        for i in (0..tot_in).filter(|&i| in_active[i]) {
            serve(i, input.sending[i], &mut remaining);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rand::{Rng, SeedableRng};

    fn solve(sending: &[f64], capacity: &[f64], fractions: &[f64], receiving: &[f64]) -> Vec<f64> {
        let input = NodeModelInput {
            sending,
            capacity,
            fractions,
            receiving,
        };
        let mut flows = vec![f64::NAN; sending.len() * receiving.len()];
        OrcaNodeModel.solve(&input, &mut flows);
        flows
    }

    /// Both in-links are congested and share the out-link by capacity.
    #[test]
    fn congested_merge() {
        let flows = solve(&[10.0, 10.0], &[20.0, 10.0], &[1.0, 1.0], &[9.0]);
        assert_approx_eq!(flows[0], 6.0);
        assert_approx_eq!(flows[1], 3.0);
    }

    /// The minor in-link gets all it wants, the rest goes to the major one.
    #[test]
    fn partially_congested_merge() {
        let flows = solve(&[2.0, 10.0], &[20.0, 10.0], &[1.0, 1.0], &[9.0]);
        assert_approx_eq!(flows[0], 2.0);
        assert_approx_eq!(flows[1], 7.0);
    }

    #[test]
    fn free_flow_merge() {
        let flows = solve(&[2.0, 3.0], &[20.0, 10.0], &[1.0, 1.0], &[9.0]);
        assert_approx_eq!(flows[0], 2.0);
        assert_approx_eq!(flows[1], 3.0);
    }

    /// A blocked out-link holds back the other turn of the diverge too.
    #[test]
    fn diverge_is_fifo() {
        let flows = solve(&[10.0], &[10.0], &[0.3, 0.7], &[1.0, 100.0]);
        assert_approx_eq!(flows[0], 1.0);
        assert_approx_eq!(flows[1], 7.0 / 3.0);

        let flows = solve(&[10.0], &[10.0], &[0.3, 0.7], &[100.0, 100.0]);
        assert_approx_eq!(flows[0], 3.0);
        assert_approx_eq!(flows[1], 7.0);
    }

    #[test]
    fn no_demand() {
        let flows = solve(&[0.0, 0.0], &[5.0, 5.0], &[0.0, 0.0], &[3.0]);
        assert_eq!(flows, vec![0.0, 0.0]);
        let flows = solve(&[4.0], &[5.0], &[], &[]);
        assert!(flows.is_empty());
    }

    #[test]
    fn random_intersections_respect_constraints() {
        let mut rng = rand::rngs::StdRng::from_seed(*b"Share the road with other cars!!");
        for _ in 0..500 {
            let tot_in = rng.gen_range(1..5);
            let tot_out = rng.gen_range(1..5);
            let capacity = (0..tot_in)
                .map(|_| rng.gen_range(1.0..20.0))
                .collect::<Vec<f64>>();
            let sending = capacity
                .iter()
                .map(|c| c * rng.gen_range(0.0..1.0))
                .collect::<Vec<_>>();
            let mut fractions = vec![];
            for _ in 0..tot_in {
                let weights = (0..tot_out)
                    .map(|_| rng.gen_range(0.0..1.0))
                    .collect::<Vec<f64>>();
                let sum: f64 = weights.iter().sum();
                fractions.extend(weights.iter().map(|w| w / sum));
            }
            let receiving = (0..tot_out)
                .map(|_| rng.gen_range(0.0..15.0))
                .collect::<Vec<f64>>();

            let flows = solve(&sending, &capacity, &fractions, &receiving);
            for i in 0..tot_in {
                let row = &flows[i * tot_out..(i + 1) * tot_out];
                let total: f64 = row.iter().sum();
                assert!(total <= sending[i] + 1e-9);
                for j in 0..tot_out {
                    assert!(row[j] >= 0.0);
                    assert_approx_eq!(row[j], total * fractions[i * tot_out + j], 1e-9);
                }
            }
            for j in 0..tot_out {
                let total: f64 = (0..tot_in).map(|i| flows[i * tot_out + j]).sum();
                assert!(total <= receiving[j] + 1e-9);
            }
        }
    }
}
