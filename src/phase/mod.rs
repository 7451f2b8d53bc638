use std::collections::{HashMap, VecDeque};

use anyhow::bail;
use tracing::debug;

use crate::{
    error::PipelineError,
    node::{NodeId, Relation},
    registry::Registry,
};

use self::{disjoint_sets::DisjointSets, graph::PhaseGraph};

mod disjoint_sets;
mod graph;

/// A maximal set of nodes glued together by item-carrying edges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phase {
    /// Position in the execution order.
    pub slot: usize,
    pub representative: NodeId,
    /// The one member nothing pushes into or pulls from it. Drives the phase.
    pub initiator: NodeId,
    /// Members in item-flow order: producers before the nodes they feed.
    pub members: Vec<NodeId>,
    pub name: String,
}

/// Phases of a registry in the order they have to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhasePlan {
    phases: Vec<Phase>,
    slot_of: HashMap<NodeId, usize>,
}

impl PhasePlan {
    /// Splits the registry into phases and orders them by their Depends
    /// edges. Every structural problem (a phase without exactly one
    /// initiator, an initiator that cannot drive, cycles) is reported here,
    /// before anything runs.
    pub fn build(registry: &Registry) -> anyhow::Result<Self> {
        let ids: Vec<NodeId> = registry.nodes().map(|(id, _)| id).collect();
        let index: HashMap<NodeId, usize> =
            ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        let dense = |id: NodeId| -> anyhow::Result<usize> {
            match index.get(&id) {
                Some(i) => Ok(*i),
                None => bail!(PipelineError::UnknownNode(id)),
            }
        };

        let mut sets = DisjointSets::new(ids.len());
        for e in registry.edges() {
            if e.relation.carries_items() {
                sets.union_set(dense(e.from)?, dense(e.to)?);
            }
        }

        let mut graph = PhaseGraph::new(ids.len());
        for e in registry.edges() {
            if e.relation == Relation::Depends {
                let dependent = sets.find_set(dense(e.from)?);
                let dependency = sets.find_set(dense(e.to)?);
                if dependent != dependency {
                    graph.depends(dependent, dependency);
                }
            }
        }

        // Phases are listed by their smallest member, whichever node the
        // union happened to pick as representative.
        let mut listed = vec![false; ids.len()];
        let mut representatives = Vec::new();
        for i in 0..ids.len() {
            let rep = sets.find_set(i);
            if !listed[rep] {
                listed[rep] = true;
                representatives.push(rep);
            }
        }
        let order = graph.execution_order(&representatives)?;

        let mut slot_of_rep = vec![0; ids.len()];
        for (slot, rep) in order.iter().enumerate() {
            slot_of_rep[*rep] = slot;
        }

        let mut members: Vec<Vec<NodeId>> = vec![Vec::new(); order.len()];
        let mut slot_of = HashMap::new();
        for (i, id) in ids.iter().enumerate() {
            let slot = slot_of_rep[sets.find_set(i)];
            members[slot].push(*id);
            slot_of.insert(*id, slot);
        }

        let mut phases = Vec::with_capacity(order.len());
        for (slot, members) in members.into_iter().enumerate() {
            let initiators: Vec<NodeId> = members
                .iter()
                .copied()
                .filter(|id| {
                    registry.in_degree(*id, Relation::Pushes)
                        + registry.in_degree(*id, Relation::Pulls)
                        == 0
                })
                .collect();
            if initiators.len() != 1 {
                bail!(PipelineError::MalformedPhase {
                    phase: slot,
                    initiators: initiators.iter().map(|id| registry.name_of(*id)).collect(),
                });
            }
            let initiator = initiators[0];
            let name = registry.name_of(initiator);
            let drives = match registry.node(initiator) {
                Some(n) => n.borrow().capabilities().drives,
                None => bail!(PipelineError::UnknownNode(initiator)),
            };
            if !drives {
                bail!(PipelineError::NotInitiator(name));
            }

            let members = flow_order(registry, slot, members)?;
            phases.push(Phase {
                slot,
                representative: ids[order[slot]],
                initiator,
                members,
                name,
            });
        }

        debug!(
            nodes = ids.len(),
            phases = phases.len(),
            order = ?phases.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
            "computed phases"
        );

        Ok(PhasePlan { phases, slot_of })
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    pub fn phase_of(&self, id: NodeId) -> Option<usize> {
        self.slot_of.get(&id).copied()
    }

    /// Initiators indexed by execution slot.
    pub fn execution_order(&self) -> Vec<NodeId> {
        self.phases.iter().map(|p| p.initiator).collect()
    }
}

/// Topologically sorts the members of one phase along the direction items
/// travel. For a pull edge that is from the pulled node to the puller.
fn flow_order(
    registry: &Registry,
    slot: usize,
    members: Vec<NodeId>,
) -> anyhow::Result<Vec<NodeId>> {
    let local: HashMap<NodeId, usize> = members
        .iter()
        .enumerate()
        .map(|(i, id)| (*id, i))
        .collect();
    let mut successors = vec![Vec::new(); members.len()];
    let mut in_degree = vec![0_usize; members.len()];
    for e in registry.edges() {
        let (producer, consumer) = match e.relation {
            Relation::Pushes => (e.from, e.to),
            Relation::Pulls => (e.to, e.from),
            Relation::Depends => continue,
        };
        if let (Some(&p), Some(&c)) = (local.get(&producer), local.get(&consumer)) {
            successors[p].push(c);
            in_degree[c] += 1;
        }
    }

    let mut ready: VecDeque<usize> = (0..members.len()).filter(|i| in_degree[*i] == 0).collect();
    let mut order = Vec::with_capacity(members.len());
    while let Some(i) = ready.pop_front() {
        order.push(members[i]);
        for &s in &successors[i] {
            in_degree[s] -= 1;
            if in_degree[s] == 0 {
                ready.push_back(s);
            }
        }
    }

    if order.len() != members.len() {
        bail!(PipelineError::FlowCycle { phase: slot });
    }
    Ok(order)
}

#[cfg(test)]
mod test {
    use std::{cell::RefCell, collections::HashMap, fmt::Write, rc::Rc};

    use rand::{seq::SliceRandom, Rng};

    use super::PhasePlan;
    use crate::{
        node::{mock::MockNode, Capabilities, NodeId, Relation},
        registry::{RegistryArena, RegistryHandle},
    };

    struct Builder {
        arena: RegistryArena,
        root: RegistryHandle,
        names: HashMap<String, NodeId>,
        events: Rc<RefCell<Vec<String>>>,
    }

    impl Builder {
        fn new() -> Self {
            let mut arena = RegistryArena::new();
            let root = arena.create();
            Builder {
                arena,
                root,
                names: HashMap::new(),
                events: Rc::new(RefCell::new(Vec::new())),
            }
        }

        fn node(&mut self, name: &str, capabilities: Capabilities) -> NodeId {
            let node = Rc::new(RefCell::new(MockNode::new(
                name,
                capabilities,
                self.events.clone(),
            )));
            let token = self.arena.add_node(self.root, node).unwrap();
            self.names.insert(name.to_owned(), token.id);
            token.id
        }

        fn edge(&mut self, from: NodeId, to: NodeId, relation: Relation) {
            self.arena
                .add_relation(self.root, from, to, relation)
                .unwrap();
        }

        fn plan(&self) -> anyhow::Result<PhasePlan> {
            PhasePlan::build(self.arena.get(self.root).unwrap())
        }
    }

    fn relation(s: &str) -> Relation {
        match s {
            "pushes" => Relation::Pushes,
            "pulls" => Relation::Pulls,
            "depends" => Relation::Depends,
            _ => panic!("unknown relation {}", s),
        }
    }

    #[test]
    fn test_phases() {
        datadriven::walk("src/phase/testdata/", |f| {
            f.run(|test_case| match test_case.directive.as_str() {
                "plan" => {
                    let mut b = Builder::new();
                    for line in test_case.input.lines() {
                        let parts: Vec<_> = line.split_whitespace().collect();
                        match parts[0] {
                            "init" => {
                                b.node(parts[1], Capabilities::INITIATOR);
                            }
                            "push" => {
                                b.node(parts[1], Capabilities::PUSH);
                            }
                            "pull" => {
                                b.node(parts[1], Capabilities::PULL);
                            }
                            "edge" => {
                                let from = b.names[parts[1]];
                                let to = b.names[parts[3]];
                                b.edge(from, to, relation(parts[2]));
                            }
                            _ => panic!("unknown line {}", line),
                        }
                    }
                    match b.plan() {
                        Ok(plan) => {
                            let registry = b.arena.get(b.root).unwrap();
                            let mut out = String::new();
                            for phase in plan.phases() {
                                let members: Vec<_> =
                                    phase.members.iter().map(|id| registry.name_of(*id)).collect();
                                writeln!(
                                    &mut out,
                                    "phase {}: initiator {}, members {}",
                                    phase.slot,
                                    phase.name,
                                    members.join(" ")
                                )
                                .unwrap();
                            }
                            out
                        }
                        Err(e) => format!("error: {}\n", e),
                    }
                }
                _ => {
                    panic!("unhandled");
                }
            })
        })
    }

    #[test]
    fn scenario_single_push_chain() {
        let mut b = Builder::new();
        let g = b.node("G", Capabilities::INITIATOR);
        let h = b.node("H", Capabilities::PUSH);
        let s = b.node("S", Capabilities::PUSH);
        b.edge(g, h, Relation::Pushes);
        b.edge(h, s, Relation::Pushes);
        let plan = b.plan().unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.execution_order(), vec![g]);
    }

    #[test]
    fn scenario_dependent_phase_runs_second() {
        let mut b = Builder::new();
        // Build the dependent phase first so id order disagrees with the
        // required order.
        let g2 = b.node("G2", Capabilities::INITIATOR);
        let s2 = b.node("S2", Capabilities::PUSH);
        let g1 = b.node("G1", Capabilities::INITIATOR);
        let s1 = b.node("S1", Capabilities::PUSH);
        b.edge(g1, s1, Relation::Pushes);
        b.edge(g2, s2, Relation::Pushes);
        b.edge(s2, g1, Relation::Depends);
        let plan = b.plan().unwrap();
        assert_eq!(plan.execution_order(), vec![g1, g2]);
        assert_eq!(plan.phase_of(s1), Some(0));
        assert_eq!(plan.phase_of(s2), Some(1));
    }

    // Random forests of push chains with random acyclic Depends edges
    // between them.
    #[test]
    fn random_graphs() {
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let mut b = Builder::new();
            let chains = rng.gen_range(1..6);
            let mut chain_nodes: Vec<Vec<NodeId>> = Vec::new();
            for c in 0..chains {
                let len = rng.gen_range(1..5);
                let mut nodes = vec![b.node(&format!("c{}n0", c), Capabilities::INITIATOR)];
                for i in 1..len {
                    let n = b.node(&format!("c{}n{}", c, i), Capabilities::PUSH);
                    let prev = nodes[rng.gen_range(0..nodes.len())];
                    b.edge(prev, n, Relation::Pushes);
                    nodes.push(n);
                }
                chain_nodes.push(nodes);
            }

            // A random permutation fixes which chains may depend on which.
            let mut rank: Vec<usize> = (0..chains).collect();
            rank.shuffle(&mut rng);
            let mut depends = Vec::new();
            for _ in 0..rng.gen_range(0..8) {
                let a = rng.gen_range(0..chains);
                let c = rng.gen_range(0..chains);
                if rank[a] <= rank[c] {
                    continue;
                }
                let from = *chain_nodes[a].choose(&mut rng).unwrap();
                let to = *chain_nodes[c].choose(&mut rng).unwrap();
                b.edge(from, to, Relation::Depends);
                depends.push((from, to));
            }

            let plan = b.plan().unwrap();
            assert_eq!(plan.len(), chains);

            let registry = b.arena.get(b.root).unwrap();
            for e in registry.edges() {
                if e.relation.carries_items() {
                    assert_eq!(plan.phase_of(e.from), plan.phase_of(e.to));
                }
            }
            for (from, to) in depends {
                assert!(plan.phase_of(to).unwrap() < plan.phase_of(from).unwrap());
            }
            for phase in plan.phases() {
                assert_eq!(plan.phase_of(phase.initiator), Some(phase.slot));
                assert_eq!(phase.members[0], phase.initiator);
            }

            assert_eq!(b.plan().unwrap(), plan);
        }
    }
}
