use std::{fmt::Write, sync::Arc};

use anyhow::{bail, Context};
use tracing::{debug, info, warn};

use crate::{
    config::PipelineConfig,
    error::PipelineError,
    memory::{distribute, framework_overhead, MemoryBudget, MemoryContract},
    node::{NodeId, NodeRef, PhaseContext, Relation},
    phase::{Phase, PhasePlan},
    pool::JobPool,
    registry::{NodeToken, Registry, RegistryArena, RegistryHandle},
};

/// Anything that can be run once with an item estimate and a memory budget.
pub trait Runnable {
    fn run(&mut self, items: u64, memory: usize) -> anyhow::Result<()>;
}

pub(crate) type RootBuild = Box<dyn FnOnce(&mut RegistryArena) -> anyhow::Result<NodeToken>>;

/// A complete graph of nodes, ready to be split into phases and run.
///
/// Pipelines composed with `|` create their nodes lazily, the first time
/// they are inspected or run. A pipeline runs at most once.
pub struct Pipeline {
    arena: RegistryArena,
    build: Option<RootBuild>,
    registry: Option<RegistryHandle>,
    plan: Option<PhasePlan>,
    config: PipelineConfig,
    pool: Option<Arc<JobPool>>,
    consumed: bool,
}

struct PhaseNodes {
    slot: usize,
    name: String,
    initiator: NodeRef,
    members: Vec<NodeRef>,
}

fn lookup(registry: &Registry, id: NodeId) -> anyhow::Result<NodeRef> {
    match registry.node(id) {
        Some(n) => Ok(n.clone()),
        None => bail!(PipelineError::UnknownNode(id)),
    }
}

impl PhaseNodes {
    fn new(registry: &Registry, phase: &Phase) -> anyhow::Result<Self> {
        Ok(PhaseNodes {
            slot: phase.slot,
            name: phase.name.clone(),
            initiator: lookup(registry, phase.initiator)?,
            members: phase
                .members
                .iter()
                .map(|id| lookup(registry, *id))
                .collect::<anyhow::Result<_>>()?,
        })
    }

    fn run(&self, ctx: &mut PhaseContext, memory: usize) -> anyhow::Result<()> {
        let contracts: Vec<MemoryContract> = self
            .members
            .iter()
            .map(|n| {
                let n = n.borrow();
                MemoryContract {
                    minimum: n.declared_minimum_memory(),
                    fraction: n.memory_fraction(),
                }
            })
            .collect();
        let allowances = distribute(&contracts, memory);
        for (node, allowance) in self.members.iter().zip(allowances) {
            node.borrow_mut().set_memory_allowance(allowance);
        }

        debug!(
            phase = self.slot,
            name = %self.name,
            nodes = self.members.len(),
            memory,
            "running phase"
        );
        ctx.set_phase(self.slot);
        for node in &self.members {
            node.borrow_mut().propagate(ctx)?;
        }
        for node in &self.members {
            node.borrow_mut().begin()?;
        }
        self.initiator.borrow_mut().go()?;
        for node in &self.members {
            node.borrow_mut().end()?;
        }
        Ok(())
    }
}

impl Pipeline {
    pub(crate) fn from_factory(build: RootBuild) -> Self {
        Pipeline {
            arena: RegistryArena::new(),
            build: Some(build),
            registry: None,
            plan: None,
            config: PipelineConfig::default(),
            pool: None,
            consumed: false,
        }
    }

    /// Wraps a graph assembled by hand. `registry` may be any handle that
    /// was united into the graph; it is resolved to its authority.
    pub fn from_registry(arena: RegistryArena, registry: RegistryHandle) -> Self {
        Pipeline {
            arena,
            build: None,
            registry: Some(registry),
            plan: None,
            config: PipelineConfig::default(),
            pool: None,
            consumed: false,
        }
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Gives nodes a pool of worker threads for parallel work.
    pub fn with_pool(mut self, pool: Arc<JobPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn materialize(&mut self) -> anyhow::Result<RegistryHandle> {
        if let Some(build) = self.build.take() {
            let root = build(&mut self.arena)?;
            self.registry = Some(root.registry);
        }
        match self.registry {
            Some(h) => {
                let h = self.arena.find_authority(h)?;
                self.registry = Some(h);
                Ok(h)
            }
            None => bail!(PipelineError::EmptyPipeline),
        }
    }

    fn prepare(&mut self) -> anyhow::Result<(&Registry, &PhasePlan)> {
        let handle = self.materialize()?;
        let registry = self.arena.get(handle)?;
        if registry.is_empty() {
            bail!(PipelineError::EmptyPipeline);
        }
        let plan = match self.plan.take() {
            Some(plan) => plan,
            None => PhasePlan::build(registry)?,
        };
        let plan: &PhasePlan = self.plan.insert(plan);
        Ok((registry, plan))
    }

    /// Phase names (the names of their initiators) in execution order.
    pub fn phases(&mut self) -> anyhow::Result<Vec<String>> {
        let (_, plan) = self.prepare()?;
        Ok(plan.phases().iter().map(|p| p.name.clone()).collect())
    }

    /// Runs every phase in order. `items` is an estimate of the input size
    /// that nodes can read from the phase context; `memory` is split
    /// between the nodes of each phase after the framework's own overhead.
    ///
    /// Structural problems are reported before any node does work.
    pub fn run(&mut self, items: u64, memory: usize) -> anyhow::Result<()> {
        if self.consumed {
            bail!(PipelineError::PipelineConsumed);
        }
        let config = self.config.clone();
        let pool = self.pool.clone();

        let (registry, plan) = self.prepare()?;
        let phases = plan
            .phases()
            .iter()
            .map(|phase| PhaseNodes::new(registry, phase))
            .collect::<anyhow::Result<Vec<_>>>()?;
        self.consumed = true;

        if memory == 0 {
            warn!("running pipeline without memory");
        }
        let overhead = framework_overhead(phases.len(), config.phase_overhead);
        let available = match memory.checked_sub(overhead) {
            Some(m) => m,
            None => {
                warn!(memory, overhead, "memory does not cover framework overhead");
                0
            }
        };
        info!(phases = phases.len(), items, memory = available, "running pipeline");

        let mut ctx = PhaseContext::new(config, pool);
        ctx.forward("items", items);
        for phase in &phases {
            phase
                .run(&mut ctx, available)
                .with_context(|| format!("phase {} ({})", phase.slot, phase.name))?;
        }
        Ok(())
    }

    pub fn run_with_budget(&mut self, items: u64, budget: &dyn MemoryBudget) -> anyhow::Result<()> {
        self.run(items, budget.available())
    }

    /// Runs with the configured default memory.
    pub fn run_default(&mut self, items: u64) -> anyhow::Result<()> {
        let memory = self.config.default_memory;
        self.run(items, memory)
    }

    /// One line per edge, `from (id) -> to (id) [relation]`, in node id
    /// order. Nodes without outgoing edges get a line of their own.
    pub fn dump(&mut self) -> anyhow::Result<String> {
        let handle = self.materialize()?;
        let registry = self.arena.get(handle)?;
        let mut out = String::new();
        for (id, node) in registry.nodes() {
            let name = node.borrow().name().to_owned();
            let mut outgoing = registry.edges().iter().filter(|e| e.from == id).peekable();
            if outgoing.peek().is_none() {
                writeln!(out, "{} ({})", name, id)?;
            }
            for e in outgoing {
                writeln!(
                    out,
                    "{} ({}) -> {} ({}) [{}]",
                    name,
                    id,
                    registry.name_of(e.to),
                    e.to,
                    e.relation
                )?;
            }
        }
        Ok(out)
    }

    /// The graph in Graphviz dot syntax, nodes grouped by phase.
    pub fn plot(&mut self) -> anyhow::Result<String> {
        let (registry, plan) = self.prepare()?;
        let mut out = String::from("digraph {\n");
        for phase in plan.phases() {
            writeln!(out, "  subgraph cluster_{} {{", phase.slot)?;
            writeln!(out, "    label=\"phase {}\";", phase.slot)?;
            for id in &phase.members {
                writeln!(out, "    n{} [label=\"{}\"];", id, registry.name_of(*id))?;
            }
            writeln!(out, "  }}")?;
        }
        for e in registry.edges() {
            // Arrows follow the items; dependencies point at what has to run
            // first.
            match e.relation {
                Relation::Pushes => writeln!(out, "  n{} -> n{};", e.from, e.to)?,
                Relation::Pulls => writeln!(out, "  n{} -> n{} [style=dashed];", e.to, e.from)?,
                Relation::Depends => writeln!(out, "  n{} -> n{} [style=dotted];", e.from, e.to)?,
            }
        }
        out.push_str("}\n");
        Ok(out)
    }

    /// Memory contract and current allowance of every node, by phase.
    pub fn memory_report(&mut self) -> anyhow::Result<String> {
        let (registry, plan) = self.prepare()?;
        let mut out = String::new();
        for phase in plan.phases() {
            for id in &phase.members {
                let node = lookup(registry, *id)?;
                let node = node.borrow();
                writeln!(
                    out,
                    "phase {} {}: minimum {}, fraction {}, assigned {}",
                    phase.slot,
                    node.name(),
                    node.declared_minimum_memory(),
                    node.memory_fraction(),
                    node.memory_allowance()
                )?;
            }
        }
        Ok(out)
    }
}

impl Runnable for Pipeline {
    fn run(&mut self, items: u64, memory: usize) -> anyhow::Result<()> {
        Pipeline::run(self, items, memory)
    }
}

#[cfg(test)]
mod test {
    use std::{cell::RefCell, rc::Rc};

    use super::{Pipeline, Runnable};
    use crate::{
        compose::register,
        config::PipelineConfig,
        error::PipelineError,
        memory::FixedBudget,
        node::{mock::MockNode, Capabilities, Node, NodeBase, PhaseContext, Relation},
        nodes::{input_vec, map, output_vec},
        registry::{NodeToken, RegistryArena},
    };

    type Events = Rc<RefCell<Vec<String>>>;

    fn init_logging() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }

    fn mock(
        arena: &mut RegistryArena,
        events: &Events,
        name: &str,
        caps: Capabilities,
    ) -> NodeToken {
        register(arena, MockNode::new(name, caps, events.clone()))
            .unwrap()
            .1
    }

    fn no_overhead() -> PipelineConfig {
        PipelineConfig {
            phase_overhead: 0,
            ..PipelineConfig::default()
        }
    }

    fn events_of(events: &Events) -> Vec<String> {
        events.borrow().clone()
    }

    #[test]
    fn single_push_chain() {
        init_logging();
        let events = Events::default();
        let mut arena = RegistryArena::new();
        let g = mock(&mut arena, &events, "G", Capabilities::INITIATOR);
        let h = mock(&mut arena, &events, "H", Capabilities::PUSH);
        let s = mock(&mut arena, &events, "S", Capabilities::PUSH);
        arena.connect(h, s, Relation::Pushes).unwrap();
        arena.connect(g, h, Relation::Pushes).unwrap();

        // `g.registry` lost the union; the pipeline resolves it.
        let mut p = Pipeline::from_registry(arena, g.registry);
        assert_eq!(p.phases().unwrap(), vec!["G"]);
        p.run(0, 1 << 20).unwrap();
        assert_eq!(
            events_of(&events),
            vec![
                "propagate G",
                "propagate H",
                "propagate S",
                "begin G",
                "begin H",
                "begin S",
                "go G",
                "end G",
                "end H",
                "end S",
            ]
        );
    }

    #[test]
    fn dependent_phase_runs_second() {
        init_logging();
        let events = Events::default();
        let mut arena = RegistryArena::new();
        let g2 = mock(&mut arena, &events, "G2", Capabilities::INITIATOR);
        let s2 = mock(&mut arena, &events, "S2", Capabilities::PUSH);
        let g1 = mock(&mut arena, &events, "G1", Capabilities::INITIATOR);
        let s1 = mock(&mut arena, &events, "S1", Capabilities::PUSH);
        arena.connect(g1, s1, Relation::Pushes).unwrap();
        arena.connect(g2, s2, Relation::Pushes).unwrap();
        let root = arena.connect(s2, g1, Relation::Depends).unwrap();

        let mut p = Pipeline::from_registry(arena, root);
        assert_eq!(p.phases().unwrap(), vec!["G1", "G2"]);
        p.run(0, 1 << 20).unwrap();
        let events = events_of(&events);
        let go: Vec<_> = events.iter().filter(|e| e.starts_with("go")).collect();
        assert_eq!(go, vec!["go G1", "go G2"]);
        let last_of_first = events.iter().position(|e| e == "end S1").unwrap();
        let first_of_second = events.iter().position(|e| e == "propagate G2").unwrap();
        assert!(last_of_first < first_of_second);
    }

    #[test]
    fn malformed_phase_fails_before_any_work() {
        let events = Events::default();
        let mut arena = RegistryArena::new();
        let g1 = mock(&mut arena, &events, "G1", Capabilities::INITIATOR);
        let g2 = mock(&mut arena, &events, "G2", Capabilities::INITIATOR);
        let s = mock(&mut arena, &events, "S", Capabilities::PUSH);
        let other = mock(&mut arena, &events, "G3", Capabilities::INITIATOR);
        arena.connect(g1, s, Relation::Pushes).unwrap();
        arena.connect(g2, s, Relation::Pushes).unwrap();
        let root = arena.connect(other, g1, Relation::Depends).unwrap();

        let mut p = Pipeline::from_registry(arena, root);
        let err = p.run(0, 1 << 20).unwrap_err();
        assert_eq!(
            err.downcast_ref::<PipelineError>(),
            Some(&PipelineError::MalformedPhase {
                phase: 0,
                initiators: vec!["G1".to_owned(), "G2".to_owned()],
            })
        );
        assert!(events.borrow().is_empty());
    }

    #[test]
    fn passive_initiator_is_rejected() {
        let events = Events::default();
        let mut arena = RegistryArena::new();
        let a = mock(&mut arena, &events, "A", Capabilities::PUSH);
        let b = mock(&mut arena, &events, "B", Capabilities::PUSH);
        let root = arena.connect(a, b, Relation::Pushes).unwrap();

        let mut p = Pipeline::from_registry(arena, root);
        let err = p.run(0, 1 << 20).unwrap_err();
        assert_eq!(
            err.downcast_ref::<PipelineError>(),
            Some(&PipelineError::NotInitiator("A".to_owned()))
        );
        assert!(events.borrow().is_empty());
    }

    #[test]
    fn memory_is_split_by_fraction() {
        let events = Events::default();
        let mut arena = RegistryArena::new();
        let (_, g) = register(
            &mut arena,
            MockNode::new("G", Capabilities::INITIATOR, events.clone()).with_memory(10, 1.0),
        )
        .unwrap();
        let (_, s) = register(
            &mut arena,
            MockNode::new("S", Capabilities::PUSH, events.clone()).with_memory(10, 3.0),
        )
        .unwrap();
        let root = arena.connect(g, s, Relation::Pushes).unwrap();

        let mut p = Pipeline::from_registry(arena, root).with_config(no_overhead());
        p.run_with_budget(0, &FixedBudget(100)).unwrap();
        assert_eq!(
            p.memory_report().unwrap(),
            "phase 0 G: minimum 10, fraction 1, assigned 30\n\
             phase 0 S: minimum 10, fraction 3, assigned 70\n"
        );
    }

    #[test]
    fn overhead_larger_than_budget() {
        init_logging();
        let events = Events::default();
        let mut arena = RegistryArena::new();
        let (_, g) = register(
            &mut arena,
            MockNode::new("G", Capabilities::INITIATOR, events.clone()).with_memory(5, 1.0),
        )
        .unwrap();

        let mut p = Pipeline::from_registry(arena, g.registry);
        // One phase costs 1024 bytes by default.
        p.run(0, 1000).unwrap();
        assert_eq!(
            p.memory_report().unwrap(),
            "phase 0 G: minimum 5, fraction 1, assigned 5\n"
        );
    }

    #[test]
    fn runs_once() {
        let out = Rc::new(RefCell::new(Vec::new()));
        let mut p: Box<dyn Runnable> = Box::new(input_vec(vec![1, 2]) | output_vec(out.clone()));
        p.run(2, 1 << 20).unwrap();
        let err = p.run(2, 1 << 20).unwrap_err();
        assert_eq!(
            err.downcast_ref::<PipelineError>(),
            Some(&PipelineError::PipelineConsumed)
        );
        assert_eq!(*out.borrow(), vec![1, 2]);
    }

    #[test]
    fn empty_registry() {
        let mut arena = RegistryArena::new();
        let root = arena.create();
        let mut p = Pipeline::from_registry(arena, root);
        let err = p.run(0, 1 << 20).unwrap_err();
        assert_eq!(
            err.downcast_ref::<PipelineError>(),
            Some(&PipelineError::EmptyPipeline)
        );
    }

    #[test]
    fn run_default_uses_configured_memory() {
        let out = Rc::new(RefCell::new(Vec::new()));
        let mut p =
            input_vec(vec!["a", "b"]) | map(|s: &'static str| s.len()) | output_vec(out.clone());
        assert_eq!(p.config().default_memory, 64 * 1024 * 1024);
        p.run_default(2).unwrap();
        assert_eq!(*out.borrow(), vec![1, 1]);
    }

    #[test]
    fn dump_and_plot() {
        let out = Rc::new(RefCell::new(Vec::<i32>::new()));
        let mut p = input_vec(vec![1]) | map(|x: i32| x + 1) | output_vec(out);
        assert_eq!(
            p.dump().unwrap(),
            "output_vec (0)\n\
             map (1) -> output_vec (0) [pushes]\n\
             input_vec (2) -> map (1) [pushes]\n"
        );
        assert_eq!(
            p.plot().unwrap(),
            "digraph {\n  \
               subgraph cluster_0 {\n    \
                 label=\"phase 0\";\n    \
                 n2 [label=\"input_vec\"];\n    \
                 n1 [label=\"map\"];\n    \
                 n0 [label=\"output_vec\"];\n  \
               }\n  \
               n1 -> n0;\n  \
               n2 -> n1;\n\
             }\n"
        );
    }

    struct Recorder {
        base: NodeBase,
        seen: Rc<RefCell<Vec<(usize, Option<u64>, Option<u64>)>>>,
        forward: Option<u64>,
    }

    impl Node for Recorder {
        fn base(&self) -> &NodeBase {
            &self.base
        }

        fn base_mut(&mut self) -> &mut NodeBase {
            &mut self.base
        }

        fn propagate(&mut self, ctx: &mut PhaseContext) -> anyhow::Result<()> {
            self.seen.borrow_mut().push((
                ctx.phase(),
                ctx.fetch::<u64>("items").copied(),
                ctx.fetch::<u64>("runs").copied(),
            ));
            if let Some(runs) = self.forward {
                ctx.forward("runs", runs);
            }
            Ok(())
        }

        fn go(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn forwarded_values_reach_later_phases() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut arena = RegistryArena::new();
        let recorder = |name: &str, forward| Recorder {
            base: NodeBase::new(name, Capabilities::INITIATOR),
            seen: seen.clone(),
            forward,
        };
        let (_, second) = register(&mut arena, recorder("second", None)).unwrap();
        let (_, first) = register(&mut arena, recorder("first", Some(7))).unwrap();
        let root = arena.connect(second, first, Relation::Depends).unwrap();

        let mut p = Pipeline::from_registry(arena, root);
        p.run(42, 1 << 20).unwrap();
        assert_eq!(
            *seen.borrow(),
            vec![(0, Some(42), None), (1, Some(42), Some(7))]
        );
    }
}
