//! The static road network: link attributes, node stars and turns.

use crate::csr::Csr;
use crate::error::{Error, Result};
use crate::time::SimulationTime;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Fractions of a step closer than this to a whole step are rounded onto it.
const DELAY_ROUNDING: f64 = 1e-9;

/// The role a link plays in the network.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum LinkType {
    /// A road.
    #[default]
    Ordinary,
    /// A link that feeds vehicles from a centroid into the network.
    OriginConnector,
    /// A link that drains vehicles from the network into a centroid.
    DestinationConnector,
}

/// The attributes of a link.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LinkAttributes {
    /// The node at the start of the link.
    pub from_node: usize,
    /// The node at the end of the link.
    pub to_node: usize,
    /// The length of the link.
    pub length: f64,
    /// The capacity in vehicles per unit of time.
    pub capacity: f64,
    /// The jam density in vehicles per unit of length. May be infinite.
    pub jam_density: f64,
    /// The free flow speed.
    pub free_speed: f64,
    /// The role of the link.
    pub link_type: LinkType,
}

impl LinkAttributes {
    /// The time needed to traverse the link at free flow speed.
    pub fn free_flow_time(&self) -> f64 {
        self.length / self.free_speed
    }

    /// The speed at which queues spill back upstream, according to a triangular
    /// fundamental diagram. Zero when the jam density is infinite.
    pub fn wave_speed(&self) -> f64 {
        if self.jam_density.is_infinite() {
            0.0
        } else {
            self.capacity / (self.jam_density - self.capacity / self.free_speed)
        }
    }

    /// The number of vehicles the link holds at jam density.
    pub fn storage(&self) -> f64 {
        self.jam_density * self.length
    }

    fn validate(&self, link: usize, tot_nodes: usize) -> Result<()> {
        for node in [self.from_node, self.to_node] {
            if node >= tot_nodes {
                return Err(Error::NodeOutOfRange {
                    link,
                    node,
                    tot_nodes,
                });
            }
        }
        let positive = [
            ("capacity", self.capacity),
            ("length", self.length),
            ("free speed", self.free_speed),
        ];
        for (attribute, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(Error::InvalidLink {
                    link,
                    attribute,
                    value,
                });
            }
        }
        if self.jam_density.is_nan() || self.jam_density <= self.capacity / self.free_speed {
            return Err(Error::InvalidLink {
                link,
                attribute: "jam density",
                value: self.jam_density,
            });
        }
        Ok(())
    }
}

/// A travel time expressed in simulation steps, split into whole steps and a remainder.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Delay {
    /// The number of whole steps.
    pub index: usize,
    /// The remaining fraction of a step, in [0, 1).
    pub ratio: f64,
}

impl Delay {
    /// Converts a duration into a delay on a grid with the given step size.
    pub fn new(duration: f64, step_size: f64) -> Self {
        let steps = duration / step_size;
        let mut index = steps.floor();
        let mut ratio = steps - index;
        if ratio < DELAY_ROUNDING {
            ratio = 0.0;
        } else if ratio > 1.0 - DELAY_ROUNDING {
            index += 1.0;
            ratio = 0.0;
        }
        Self {
            index: index as usize,
            ratio,
        }
    }

    /// The delay in (fractional) steps.
    pub fn steps(&self) -> f64 {
        self.index as f64 + self.ratio
    }

    /// Reads a cumulative curve at the point `step + 1 - delay`, interpolating linearly.
    /// Points before the start of the horizon read as zero.
    pub(crate) fn read(&self, curve: impl Fn(usize) -> f64, step: usize) -> f64 {
        let at = |point: isize| {
            if point < 0 {
                0.0
            } else {
                curve(point as usize)
            }
        };
        let upper = step as isize + 1 - self.index as isize;
        if self.ratio == 0.0 {
            at(upper)
        } else {
            self.ratio * at(upper - 1) + (1.0 - self.ratio) * at(upper)
        }
    }

    /// The steps whose reads through this delay depend on the given time point.
    pub(crate) fn readers(&self, point: usize) -> SmallVec<[usize; 2]> {
        let first = (point + self.index).saturating_sub(1);
        let mut steps = SmallVec::new();
        steps.push(first);
        if self.ratio > 0.0 {
            steps.push(point + self.index);
        }
        steps
    }
}

/// A permitted movement from one link onto another through a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Turn {
    /// The link the turn starts on.
    pub from_link: usize,
    /// The link the turn ends on.
    pub to_link: usize,
    /// The node the turn passes through.
    pub via_node: usize,
}

/// Collects links and builds a [Network].
#[derive(Clone, Debug)]
pub struct NetworkBuilder {
    tot_nodes: usize,
    tot_centroids: usize,
    links: Vec<LinkAttributes>,
}

impl NetworkBuilder {
    /// Creates a builder for a network with `tot_nodes` nodes,
    /// the first `tot_centroids` of which are centroids.
    pub fn new(tot_nodes: usize, tot_centroids: usize) -> Self {
        Self {
            tot_nodes,
            tot_centroids: tot_centroids.min(tot_nodes),
            links: vec![],
        }
    }

    /// Adds a link to the network, returning its ID.
    pub fn add_link(&mut self, attributes: &LinkAttributes) -> usize {
        self.links.push(*attributes);
        self.links.len() - 1
    }

    /// Validates the links, discretises their travel times and builds the adjacency structures.
    pub fn build(self, time: &SimulationTime) -> Result<Network> {
        let Self {
            tot_nodes,
            tot_centroids,
            links,
        } = self;
        for (id, link) in links.iter().enumerate() {
            link.validate(id, tot_nodes)?;
            if link.link_type == LinkType::OriginConnector && link.from_node >= tot_centroids {
                return Err(Error::NotACentroid(link.from_node));
            }
            if link.link_type == LinkType::DestinationConnector && link.to_node >= tot_centroids {
                return Err(Error::NotACentroid(link.to_node));
            }
        }

        let shape = (tot_nodes, links.len());
        let forward_star = Csr::from_triples(
            links
                .iter()
                .enumerate()
                .map(|(id, l)| (l.from_node, id, l.to_node)),
            shape,
        )?;
        let backward_star = Csr::from_triples(
            links
                .iter()
                .enumerate()
                .map(|(id, l)| (l.to_node, id, l.from_node)),
            shape,
        )?;

        let mut turns = vec![];
        let mut local = vec![];
        for node in tot_centroids..tot_nodes {
            let in_links = backward_star.get_columns(node);
            let out_links = forward_star.get_columns(node);
            for (i, &from_link) in in_links.iter().enumerate() {
                let is_u_turn = |to: usize| links[to].to_node == links[from_link].from_node;
                let only_u_turns = out_links.iter().all(|&to| is_u_turn(to));
                for (j, &to_link) in out_links.iter().enumerate() {
                    if is_u_turn(to_link) && !only_u_turns {
                        continue;
                    }
                    turns.push(Turn {
                        from_link,
                        to_link,
                        via_node: node,
                    });
                    local.push((i, j));
                }
            }
        }

        let out_turns = Csr::from_triples(
            turns
                .iter()
                .enumerate()
                .map(|(id, t)| (t.from_link, id, t.to_link)),
            (links.len(), turns.len()),
        )?;
        let node_turns = Csr::from_triples(
            turns
                .iter()
                .zip(&local)
                .enumerate()
                .map(|(id, (t, &l))| (t.via_node, id, l)),
            (tot_nodes, turns.len()),
        )?;

        let step_size = time.step_size();
        let free_flow = links
            .iter()
            .map(|l| Delay::new(l.free_flow_time(), step_size))
            .collect();
        let queue = links
            .iter()
            .map(|l| match l.wave_speed() {
                w if w > 0.0 => Some(Delay::new(l.length / w, step_size)),
                _ => None,
            })
            .collect();

        log::debug!(
            "Built network with {} nodes ({} centroids), {} links and {} turns",
            tot_nodes,
            tot_centroids,
            links.len(),
            turns.len()
        );

        Ok(Network {
            tot_nodes,
            tot_centroids,
            step_size,
            links,
            free_flow,
            queue,
            forward_star,
            backward_star,
            turns,
            out_turns,
            node_turns,
        })
    }
}

/// A validated road network, ready for loading and route choice.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Network {
    /// The number of nodes, centroids included.
    tot_nodes: usize,
    /// The number of centroids, which occupy the first node IDs.
    tot_centroids: usize,
    /// The step size the travel times were discretised with.
    step_size: f64,
    /// The attributes of each link.
    links: Vec<LinkAttributes>,
    /// The free flow travel time of each link.
    free_flow: Vec<Delay>,
    /// The time a backward wave needs to traverse each link, if it ever does.
    queue: Vec<Option<Delay>>,
    /// Node to outgoing link, valued with the head node.
    forward_star: Csr<usize>,
    /// Node to incoming link, valued with the tail node.
    backward_star: Csr<usize>,
    /// Every permitted turn.
    turns: Vec<Turn>,
    /// Link to the turns leaving it, valued with the link turned onto.
    out_turns: Csr<usize>,
    /// Node to the turns through it, valued with the local in-link and out-link indices.
    node_turns: Csr<(usize, usize)>,
}

impl Network {
    pub fn tot_nodes(&self) -> usize {
        self.tot_nodes
    }

    pub fn tot_centroids(&self) -> usize {
        self.tot_centroids
    }

    /// The step size the link travel times were discretised with.
    pub fn step_size(&self) -> f64 {
        self.step_size
    }

    pub fn tot_links(&self) -> usize {
        self.links.len()
    }

    pub fn tot_turns(&self) -> usize {
        self.turns.len()
    }

    /// Returns true if the node is a centroid.
    pub fn is_centroid(&self, node: usize) -> bool {
        node < self.tot_centroids
    }

    /// Gets the attributes of a link.
    pub fn link(&self, link: usize) -> &LinkAttributes {
        &self.links[link]
    }

    /// Returns an iterator over the attributes of every link.
    pub fn iter_links(&self) -> impl Iterator<Item = &LinkAttributes> {
        self.links.iter()
    }

    /// Gets the discretised free flow travel time of a link.
    pub fn free_flow(&self, link: usize) -> Delay {
        self.free_flow[link]
    }

    /// Gets the discretised backward wave travel time of a link,
    /// or `None` if its jam density is infinite.
    pub fn queue(&self, link: usize) -> Option<Delay> {
        self.queue[link]
    }

    /// Gets the storage capacity of a link in vehicles.
    pub fn storage(&self, link: usize) -> f64 {
        self.links[link].storage()
    }

    /// The links leaving a node.
    pub fn out_links(&self, node: usize) -> &[usize] {
        self.forward_star.get_columns(node)
    }

    /// The links entering a node.
    pub fn in_links(&self, node: usize) -> &[usize] {
        self.backward_star.get_columns(node)
    }

    pub fn forward_star(&self) -> &Csr<usize> {
        &self.forward_star
    }

    pub fn backward_star(&self) -> &Csr<usize> {
        &self.backward_star
    }

    pub fn turn(&self, turn: usize) -> &Turn {
        &self.turns[turn]
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// The turns leaving a link, with the link each turns onto.
    pub fn out_turns(&self, link: usize) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.out_turns.iter_row(link)
    }

    /// The turns through a node, with the position of their links in the
    /// node's [in_links](Self::in_links) and [out_links](Self::out_links).
    pub fn node_turns(
        &self,
        node: usize,
    ) -> impl Iterator<Item = (usize, (usize, usize))> + '_ {
        self.node_turns.iter_row(node)
    }

    /// The nodes which have at least one turn.
    pub fn turn_nodes(&self) -> &[usize] {
        self.node_turns.nonzero_rows()
    }
}
