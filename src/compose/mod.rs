//! Building pipelines out of node factories.
//!
//! A factory describes a node (or a few) without creating it. Factories are
//! joined with `|`; nothing is materialised until the resulting `Pipeline`
//! is first inspected or run. Push chains are built back to front: each node
//! is created knowing the node it pushes into. Pull chains are built front
//! to back: each node is created knowing the node it pulls from. Every node
//! starts out in a registry of its own and attaching a neighbour unites the
//! two registries.

use std::{cell::RefCell, ops::BitOr, rc::Rc};

use crate::{
    node::{Node, PullSource, PushDest, Relation},
    pipeline::Pipeline,
    registry::{NodeToken, RegistryArena},
};

/// A materialised node that accepts pushed items.
pub struct PushHandle<T> {
    pub token: NodeToken,
    pub node: Rc<RefCell<dyn PushDest<T>>>,
}

impl<T> Clone for PushHandle<T> {
    fn clone(&self) -> Self {
        PushHandle {
            token: self.token,
            node: self.node.clone(),
        }
    }
}

impl<T: 'static> PushHandle<T> {
    pub fn new<N: PushDest<T> + 'static>(token: NodeToken, node: Rc<RefCell<N>>) -> Self {
        PushHandle { token, node }
    }

    pub fn push(&self, item: T) -> anyhow::Result<()> {
        self.node.borrow_mut().push(item)
    }
}

/// A materialised node items can be pulled from.
pub struct PullHandle<T> {
    pub token: NodeToken,
    pub node: Rc<RefCell<dyn PullSource<T>>>,
}

impl<T> Clone for PullHandle<T> {
    fn clone(&self) -> Self {
        PullHandle {
            token: self.token,
            node: self.node.clone(),
        }
    }
}

impl<T: 'static> PullHandle<T> {
    pub fn new<N: PullSource<T> + 'static>(token: NodeToken, node: Rc<RefCell<N>>) -> Self {
        PullHandle { token, node }
    }

    pub fn can_pull(&self) -> bool {
        self.node.borrow_mut().can_pull()
    }

    pub fn pull(&self) -> anyhow::Result<T> {
        self.node.borrow_mut().pull()
    }
}

/// Puts `node` into a fresh registry of its own.
pub fn register<N: Node + 'static>(
    arena: &mut RegistryArena,
    node: N,
) -> anyhow::Result<(Rc<RefCell<N>>, NodeToken)> {
    let node = Rc::new(RefCell::new(node));
    let registry = arena.create();
    let token = arena.add_node(registry, node.clone())?;
    Ok((node, token))
}

/// Records that `from` pushes into `dest`.
pub fn push_edge<T>(
    arena: &mut RegistryArena,
    from: NodeToken,
    dest: &PushHandle<T>,
) -> anyhow::Result<()> {
    arena.connect(from, dest.token, Relation::Pushes)?;
    Ok(())
}

/// Records that `puller` pulls from `source`.
pub fn pull_edge<T>(
    arena: &mut RegistryArena,
    puller: NodeToken,
    source: &PullHandle<T>,
) -> anyhow::Result<()> {
    arena.connect(puller, source.token, Relation::Pulls)?;
    Ok(())
}

type PushBeginFn<T> =
    Box<dyn FnOnce(&mut RegistryArena, PushHandle<T>) -> anyhow::Result<NodeToken>>;
type PushMiddleFn<I, O> =
    Box<dyn FnOnce(&mut RegistryArena, PushHandle<O>) -> anyhow::Result<PushHandle<I>>>;
type PushEndFn<T> = Box<dyn FnOnce(&mut RegistryArena) -> anyhow::Result<PushHandle<T>>>;

/// Start of a push chain: an initiator producing `T`s.
pub struct PipeBegin<T> {
    build: PushBeginFn<T>,
}

/// Inner link of a push chain: accepts `I`s and pushes `O`s.
pub struct PipeMiddle<I, O> {
    build: PushMiddleFn<I, O>,
}

/// End of a push chain: accepts `T`s.
pub struct PipeEnd<T> {
    build: PushEndFn<T>,
}

impl<T: 'static> PipeBegin<T> {
    pub fn new<F>(build: F) -> Self
    where
        F: FnOnce(&mut RegistryArena, PushHandle<T>) -> anyhow::Result<NodeToken> + 'static,
    {
        PipeBegin {
            build: Box::new(build),
        }
    }
}

impl<I: 'static, O: 'static> PipeMiddle<I, O> {
    pub fn new<F>(build: F) -> Self
    where
        F: FnOnce(&mut RegistryArena, PushHandle<O>) -> anyhow::Result<PushHandle<I>> + 'static,
    {
        PipeMiddle {
            build: Box::new(build),
        }
    }
}

impl<I: 'static, O: 'static> PipeMiddle<I, O> {
    /// Materialises the chain in front of `dest`, returning its head.
    pub(crate) fn attach(
        self,
        arena: &mut RegistryArena,
        dest: PushHandle<O>,
    ) -> anyhow::Result<PushHandle<I>> {
        (self.build)(arena, dest)
    }
}

impl<T: 'static> PipeEnd<T> {
    pub fn new<F>(build: F) -> Self
    where
        F: FnOnce(&mut RegistryArena) -> anyhow::Result<PushHandle<T>> + 'static,
    {
        PipeEnd {
            build: Box::new(build),
        }
    }

    pub(crate) fn attach(self, arena: &mut RegistryArena) -> anyhow::Result<PushHandle<T>> {
        (self.build)(arena)
    }
}

/// Turns a push chain into a pull chain: accepts pushed `T`s and lets them
/// be pulled again, usually in a later phase.
pub struct PipeToPull<T> {
    build: PipeToPullFn<T>,
}

type PipeToPullFn<T> =
    Box<dyn FnOnce(&mut RegistryArena) -> anyhow::Result<(PushHandle<T>, PullHandle<T>)>>;

impl<T: 'static> PipeToPull<T> {
    pub fn new<F>(build: F) -> Self
    where
        F: FnOnce(&mut RegistryArena) -> anyhow::Result<(PushHandle<T>, PullHandle<T>)> + 'static,
    {
        PipeToPull {
            build: Box::new(build),
        }
    }
}

impl<T: 'static> BitOr<PipeToPull<T>> for PipeBegin<T> {
    type Output = PullBegin<T>;

    fn bitor(self, rhs: PipeToPull<T>) -> PullBegin<T> {
        PullBegin::new(move |arena| {
            let (input, output) = (rhs.build)(arena)?;
            (self.build)(arena, input)?;
            Ok(output)
        })
    }
}

impl<T: 'static, U: 'static> BitOr<PipeMiddle<T, U>> for PipeBegin<T> {
    type Output = PipeBegin<U>;

    fn bitor(self, rhs: PipeMiddle<T, U>) -> PipeBegin<U> {
        PipeBegin::new(move |arena, dest| {
            let middle = (rhs.build)(arena, dest)?;
            (self.build)(arena, middle)
        })
    }
}

impl<A: 'static, B: 'static, C: 'static> BitOr<PipeMiddle<B, C>> for PipeMiddle<A, B> {
    type Output = PipeMiddle<A, C>;

    fn bitor(self, rhs: PipeMiddle<B, C>) -> PipeMiddle<A, C> {
        PipeMiddle::new(move |arena, dest| {
            let inner = (rhs.build)(arena, dest)?;
            (self.build)(arena, inner)
        })
    }
}

impl<A: 'static, B: 'static> BitOr<PipeEnd<B>> for PipeMiddle<A, B> {
    type Output = PipeEnd<A>;

    fn bitor(self, rhs: PipeEnd<B>) -> PipeEnd<A> {
        PipeEnd::new(move |arena| {
            let end = (rhs.build)(arena)?;
            (self.build)(arena, end)
        })
    }
}

impl<T: 'static> BitOr<PipeEnd<T>> for PipeBegin<T> {
    type Output = Pipeline;

    fn bitor(self, rhs: PipeEnd<T>) -> Pipeline {
        Pipeline::from_factory(Box::new(move |arena| {
            let end = (rhs.build)(arena)?;
            (self.build)(arena, end)
        }))
    }
}

type PullBeginFn<T> = Box<dyn FnOnce(&mut RegistryArena) -> anyhow::Result<PullHandle<T>>>;
type PullMiddleFn<I, O> =
    Box<dyn FnOnce(&mut RegistryArena, PullHandle<I>) -> anyhow::Result<PullHandle<O>>>;
type PullEndFn<T> = Box<dyn FnOnce(&mut RegistryArena, PullHandle<T>) -> anyhow::Result<NodeToken>>;

/// Start of a pull chain: a node `T`s can be pulled from.
pub struct PullBegin<T> {
    build: PullBeginFn<T>,
}

/// Inner link of a pull chain: pulls `I`s and can be pulled for `O`s.
pub struct PullMiddle<I, O> {
    build: PullMiddleFn<I, O>,
}

/// End of a pull chain: the initiator that pulls `T`s.
pub struct PullEnd<T> {
    build: PullEndFn<T>,
}

impl<T: 'static> PullBegin<T> {
    pub fn new<F>(build: F) -> Self
    where
        F: FnOnce(&mut RegistryArena) -> anyhow::Result<PullHandle<T>> + 'static,
    {
        PullBegin {
            build: Box::new(build),
        }
    }
}

impl<I: 'static, O: 'static> PullMiddle<I, O> {
    pub fn new<F>(build: F) -> Self
    where
        F: FnOnce(&mut RegistryArena, PullHandle<I>) -> anyhow::Result<PullHandle<O>> + 'static,
    {
        PullMiddle {
            build: Box::new(build),
        }
    }
}

impl<I: 'static, O: 'static> PullMiddle<I, O> {
    /// Materialises the chain behind `source`, returning its tail.
    pub(crate) fn attach(
        self,
        arena: &mut RegistryArena,
        source: PullHandle<I>,
    ) -> anyhow::Result<PullHandle<O>> {
        (self.build)(arena, source)
    }
}

impl<T: 'static> PullEnd<T> {
    pub fn new<F>(build: F) -> Self
    where
        F: FnOnce(&mut RegistryArena, PullHandle<T>) -> anyhow::Result<NodeToken> + 'static,
    {
        PullEnd {
            build: Box::new(build),
        }
    }
}

impl<T: 'static, U: 'static> BitOr<PullMiddle<T, U>> for PullBegin<T> {
    type Output = PullBegin<U>;

    fn bitor(self, rhs: PullMiddle<T, U>) -> PullBegin<U> {
        PullBegin::new(move |arena| {
            let source = (self.build)(arena)?;
            (rhs.build)(arena, source)
        })
    }
}

impl<A: 'static, B: 'static, C: 'static> BitOr<PullMiddle<B, C>> for PullMiddle<A, B> {
    type Output = PullMiddle<A, C>;

    fn bitor(self, rhs: PullMiddle<B, C>) -> PullMiddle<A, C> {
        PullMiddle::new(move |arena, source| {
            let inner = (self.build)(arena, source)?;
            (rhs.build)(arena, inner)
        })
    }
}

impl<A: 'static, B: 'static> BitOr<PullEnd<B>> for PullMiddle<A, B> {
    type Output = PullEnd<A>;

    fn bitor(self, rhs: PullEnd<B>) -> PullEnd<A> {
        PullEnd::new(move |arena, source| {
            let inner = (self.build)(arena, source)?;
            (rhs.build)(arena, inner)
        })
    }
}

impl<T: 'static> BitOr<PullEnd<T>> for PullBegin<T> {
    type Output = Pipeline;

    fn bitor(self, rhs: PullEnd<T>) -> Pipeline {
        Pipeline::from_factory(Box::new(move |arena| {
            let source = (self.build)(arena)?;
            (rhs.build)(arena, source)
        }))
    }
}
