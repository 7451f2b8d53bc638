use std::collections::BTreeMap;

use anyhow::bail;
use tracing::trace;

use crate::{
    error::PipelineError,
    node::{NodeId, NodeRef, Relation},
};

/// Index of a registry inside its arena. A handle may go stale when its
/// registry is united into another one; `RegistryArena::find_authority`
/// turns it back into a usable handle.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct RegistryHandle(usize);

impl RegistryHandle {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Where a node lives: its id plus the registry it was added to.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct NodeToken {
    pub id: NodeId,
    pub registry: RegistryHandle,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
    pub relation: Relation,
}

/// The node map: owns nodes and the edges between them for one connected
/// piece of pipeline.
#[derive(Default)]
pub struct Registry {
    authority: Option<RegistryHandle>,
    rank: usize,
    nodes: BTreeMap<NodeId, NodeRef>,
    edges: Vec<Edge>,
}

impl Registry {
    pub fn is_authoritative(&self) -> bool {
        self.authority.is_none()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes in ascending id order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &NodeRef)> {
        self.nodes.iter().map(|(id, n)| (*id, n))
    }

    pub fn node(&self, id: NodeId) -> Option<&NodeRef> {
        self.nodes.get(&id)
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn in_degree(&self, id: NodeId, relation: Relation) -> usize {
        self.edges
            .iter()
            .filter(|e| e.to == id && e.relation == relation)
            .count()
    }

    pub fn out_degree(&self, id: NodeId, relation: Relation) -> usize {
        self.edges
            .iter()
            .filter(|e| e.from == id && e.relation == relation)
            .count()
    }

    pub fn name_of(&self, id: NodeId) -> String {
        match self.nodes.get(&id) {
            Some(n) => n.borrow().name().to_owned(),
            None => format!("<missing {}>", id),
        }
    }
}

/// Owns every registry created while composing pipelines. Registries are
/// addressed by index and united union-find style: the loser of a union
/// hands its nodes and edges to the winner and forwards to it from then on.
#[derive(Default)]
pub struct RegistryArena {
    registries: Vec<Registry>,
    next_id: usize,
}

impl RegistryArena {
    pub fn new() -> Self {
        RegistryArena::default()
    }

    pub fn create(&mut self) -> RegistryHandle {
        self.registries.push(Registry::default());
        RegistryHandle(self.registries.len() - 1)
    }

    pub fn registry_count(&self) -> usize {
        self.registries.len()
    }

    fn slot(&self, h: RegistryHandle) -> anyhow::Result<&Registry> {
        match self.registries.get(h.0) {
            Some(r) => Ok(r),
            None => bail!(PipelineError::UnknownRegistry(h.0)),
        }
    }

    /// The registry behind `h`. Fails if `h` has been united into another
    /// registry; resolve it with `find_authority` first.
    pub fn get(&self, h: RegistryHandle) -> anyhow::Result<&Registry> {
        let r = self.slot(h)?;
        if !r.is_authoritative() {
            bail!(PipelineError::NonAuthoritativeRegistry(h.0));
        }
        Ok(r)
    }

    fn get_mut(&mut self, h: RegistryHandle) -> anyhow::Result<&mut Registry> {
        self.get(h)?;
        Ok(&mut self.registries[h.0])
    }

    pub fn add_node(&mut self, h: RegistryHandle, node: NodeRef) -> anyhow::Result<NodeToken> {
        let id = NodeId(self.next_id);
        let registry = self.get_mut(h)?;
        node.borrow_mut().base_mut().set_id(id);
        registry.nodes.insert(id, node);
        self.next_id += 1;
        Ok(NodeToken { id, registry: h })
    }

    /// Records an edge. Duplicates are kept; they do not change the phase
    /// structure.
    pub fn add_relation(
        &mut self,
        h: RegistryHandle,
        from: NodeId,
        to: NodeId,
        relation: Relation,
    ) -> anyhow::Result<()> {
        let registry = self.get_mut(h)?;
        for id in [from, to] {
            if !registry.nodes.contains_key(&id) {
                bail!(PipelineError::UnknownNode(id));
            }
        }
        trace!(%from, %to, %relation, "add relation");
        registry.edges.push(Edge { from, to, relation });
        Ok(())
    }

    pub fn find_authority(&mut self, h: RegistryHandle) -> anyhow::Result<RegistryHandle> {
        let mut root = h;
        while let Some(next) = self.slot(root)?.authority {
            root = next;
        }

        // Path compression.
        let mut cur = h;
        while let Some(next) = self.registries[cur.0].authority {
            self.registries[cur.0].authority = Some(root);
            cur = next;
        }

        Ok(root)
    }

    /// Unites the registries behind `a` and `b` and returns the authority of
    /// the result. Uniting two handles that already share an authority is a
    /// no-op.
    pub fn union(
        &mut self,
        a: RegistryHandle,
        b: RegistryHandle,
    ) -> anyhow::Result<RegistryHandle> {
        let mut winner = self.find_authority(a)?;
        let mut loser = self.find_authority(b)?;
        if winner == loser {
            return Ok(winner);
        }
        if self.registries[loser.0].rank > self.registries[winner.0].rank {
            std::mem::swap(&mut winner, &mut loser);
        }

        let nodes = std::mem::take(&mut self.registries[loser.0].nodes);
        let edges = std::mem::take(&mut self.registries[loser.0].edges);
        let loser_rank = self.registries[loser.0].rank;
        self.registries[loser.0].authority = Some(winner);

        let target = &mut self.registries[winner.0];
        trace!(
            winner = winner.0,
            loser = loser.0,
            moved_nodes = nodes.len(),
            "union registries"
        );
        target.nodes.extend(nodes);
        target.edges.extend(edges);
        if target.rank == loser_rank {
            target.rank += 1;
        }

        Ok(winner)
    }

    /// Joins the registries of both endpoints and records the edge in the
    /// result.
    pub fn connect(
        &mut self,
        from: NodeToken,
        to: NodeToken,
        relation: Relation,
    ) -> anyhow::Result<RegistryHandle> {
        let authority = self.union(from.registry, to.registry)?;
        self.add_relation(authority, from.id, to.id, relation)?;
        Ok(authority)
    }
}

#[cfg(test)]
mod test {
    use std::{cell::RefCell, collections::HashMap, fmt::Write, rc::Rc};

    use super::{RegistryArena, RegistryHandle};
    use crate::{
        error::PipelineError,
        node::{mock::MockNode, Capabilities, NodeId, Relation},
    };

    fn relation(s: &str) -> Relation {
        match s {
            "pushes" => Relation::Pushes,
            "pulls" => Relation::Pulls,
            "depends" => Relation::Depends,
            _ => panic!("unknown relation {}", s),
        }
    }

    fn arg<'a>(args: &'a HashMap<String, Vec<String>>, key: &str) -> &'a str {
        args.get(key)
            .unwrap_or_else(|| panic!("missing argument {}", key))[0]
            .as_str()
    }

    #[test]
    fn test_registry_union() {
        datadriven::walk("src/registry/testdata/", |f| {
            let events = Rc::new(RefCell::new(Vec::new()));
            let mut arena = RegistryArena::new();
            let mut handles: HashMap<String, RegistryHandle> = HashMap::new();
            let mut names: HashMap<String, NodeId> = HashMap::new();
            f.run(|test_case| match test_case.directive.as_str() {
                "create" => {
                    for line in test_case.input.lines() {
                        handles.insert(line.trim().to_owned(), arena.create());
                    }
                    "ok\n".into()
                }
                "add-node" => {
                    let h = handles[arg(&test_case.args, "registry")];
                    let mut out = String::new();
                    for line in test_case.input.lines() {
                        let name = line.trim();
                        let node = Rc::new(RefCell::new(MockNode::new(
                            name,
                            Capabilities::PUSH,
                            events.clone(),
                        )));
                        match arena.add_node(h, node) {
                            Ok(token) => {
                                names.insert(name.to_owned(), token.id);
                                writeln!(&mut out, "{}={}", name, token.id).unwrap();
                            }
                            Err(e) => writeln!(&mut out, "error: {}", e).unwrap(),
                        }
                    }
                    out
                }
                "relate" => {
                    let h = handles[arg(&test_case.args, "registry")];
                    let mut out = String::new();
                    for line in test_case.input.lines() {
                        let parts: Vec<_> = line.split_whitespace().collect();
                        let res = arena.add_relation(
                            h,
                            names[parts[0]],
                            names[parts[2]],
                            relation(parts[1]),
                        );
                        match res {
                            Ok(()) => out.push_str("ok\n"),
                            Err(e) => writeln!(&mut out, "error: {}", e).unwrap(),
                        }
                    }
                    out
                }
                "union" => {
                    let a = handles[arg(&test_case.args, "lhs")];
                    let b = handles[arg(&test_case.args, "rhs")];
                    let root = arena.union(a, b).unwrap();
                    let name = handles
                        .iter()
                        .find(|(_, h)| **h == root)
                        .map(|(n, _)| n.clone())
                        .unwrap();
                    format!("authority: {}\n", name)
                }
                "authority" => {
                    let h = handles[arg(&test_case.args, "of")];
                    let root = arena.find_authority(h).unwrap();
                    let name = handles
                        .iter()
                        .find(|(_, h)| **h == root)
                        .map(|(n, _)| n.clone())
                        .unwrap();
                    format!("{}\n", name)
                }
                "dump" => {
                    let h = handles[arg(&test_case.args, "registry")];
                    match arena.get(h) {
                        Ok(r) => {
                            let mut out = String::new();
                            for (id, n) in r.nodes() {
                                writeln!(&mut out, "node {} {}", id, n.borrow().name()).unwrap();
                            }
                            for e in r.edges() {
                                writeln!(
                                    &mut out,
                                    "edge {} {} {}",
                                    r.name_of(e.from),
                                    e.relation,
                                    r.name_of(e.to)
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
    fn stale_handle_is_rejected() {
        let mut arena = RegistryArena::new();
        let a = arena.create();
        let b = arena.create();
        let root = arena.union(a, b).unwrap();
        let stale = if root == a { b } else { a };

        let err = arena.get(stale).err().unwrap();
        assert_eq!(
            err.downcast_ref::<PipelineError>(),
            Some(&PipelineError::NonAuthoritativeRegistry(stale.index()))
        );
        assert_eq!(arena.find_authority(stale).unwrap(), root);
        assert!(arena.get(root).is_ok());
    }

    #[test]
    fn union_is_idempotent() {
        let mut arena = RegistryArena::new();
        let handles: Vec<_> = (0..5).map(|_| arena.create()).collect();
        assert_eq!(arena.registry_count(), 5);
        let root = arena.union(handles[0], handles[1]).unwrap();
        assert_eq!(arena.union(handles[1], handles[0]).unwrap(), root);
        assert_eq!(arena.union(handles[0], handles[0]).unwrap(), root);

        for h in &handles[2..] {
            arena.union(*h, handles[0]).unwrap();
        }
        let root = arena.find_authority(handles[4]).unwrap();
        for h in &handles {
            assert_eq!(arena.find_authority(*h).unwrap(), root);
            assert_eq!(arena.union(*h, root).unwrap(), root);
        }
        // Losers keep their slots so stale handles can still be resolved.
        assert_eq!(arena.registry_count(), 5);
    }

    #[test]
    fn unknown_registry() {
        let mut arena = RegistryArena::new();
        let a = arena.create();
        let bogus = RegistryHandle(a.index() + 10);
        let err = arena.find_authority(bogus).err().unwrap();
        assert_eq!(
            err.downcast_ref::<PipelineError>(),
            Some(&PipelineError::UnknownRegistry(a.index() + 10))
        );
    }

    #[test]
    fn connect_unions_and_records() {
        let events = Rc::new(RefCell::new(Vec::new()));
        let mut arena = RegistryArena::new();
        let mut tokens = Vec::new();
        for name in ["a", "b", "c"] {
            let h = arena.create();
            let node = MockNode::new(name, Capabilities::PUSH, events.clone());
            let node = Rc::new(RefCell::new(node));
            tokens.push(arena.add_node(h, node).unwrap());
        }
        arena.connect(tokens[0], tokens[1], Relation::Pushes).unwrap();
        let root = arena.connect(tokens[2], tokens[0], Relation::Depends).unwrap();

        let r = arena.get(root).unwrap();
        assert_eq!(r.len(), 3);
        assert_eq!(r.edges().len(), 2);
        assert_eq!(r.in_degree(tokens[1].id, Relation::Pushes), 1);
        assert_eq!(r.out_degree(tokens[2].id, Relation::Depends), 1);
        assert_eq!(r.in_degree(tokens[0].id, Relation::Pushes), 0);
    }
}
