use std::{cell::RefCell, mem, rc::Rc};

use tracing::trace;

use crate::{
    compose::{push_edge, register, PipeBegin, PipeEnd, PipeMiddle, PushHandle},
    node::{Capabilities, Node, NodeBase, PhaseContext, PushDest},
};

struct InputVec<T> {
    base: NodeBase,
    items: Vec<T>,
    dest: PushHandle<T>,
}

impl<T: 'static> Node for InputVec<T> {
    node_base!();

    fn propagate(&mut self, ctx: &mut PhaseContext) -> anyhow::Result<()> {
        ctx.forward("items", self.items.len() as u64);
        Ok(())
    }

    fn go(&mut self) -> anyhow::Result<()> {
        for item in mem::take(&mut self.items) {
            self.dest.push(item)?;
        }
        Ok(())
    }
}

/// Pushes every element of `items` downstream.
pub fn input_vec<T: 'static>(items: Vec<T>) -> PipeBegin<T> {
    PipeBegin::new(move |arena, dest| {
        let node = InputVec {
            base: NodeBase::new("input_vec", Capabilities::INITIATOR),
            items,
            dest: dest.clone(),
        };
        let (_, token) = register(arena, node)?;
        push_edge(arena, token, &dest)?;
        Ok(token)
    })
}

struct Map<I, O, F> {
    base: NodeBase,
    f: F,
    dest: PushHandle<O>,
    _in: std::marker::PhantomData<fn(I)>,
}

impl<I: 'static, O: 'static, F: FnMut(I) -> O + 'static> Node for Map<I, O, F> {
    node_base!();
}

impl<I: 'static, O: 'static, F: FnMut(I) -> O + 'static> PushDest<I> for Map<I, O, F> {
    fn push(&mut self, item: I) -> anyhow::Result<()> {
        self.dest.push((self.f)(item))
    }
}

pub fn map<I, O, F>(f: F) -> PipeMiddle<I, O>
where
    I: 'static,
    O: 'static,
    F: FnMut(I) -> O + 'static,
{
    PipeMiddle::new(move |arena, dest| {
        let node = Map {
            base: NodeBase::new("map", Capabilities::PUSH),
            f,
            dest: dest.clone(),
            _in: std::marker::PhantomData,
        };
        let (node, token) = register(arena, node)?;
        push_edge(arena, token, &dest)?;
        Ok(PushHandle::new(token, node))
    })
}

struct Filter<T, F> {
    base: NodeBase,
    keep: F,
    dest: PushHandle<T>,
}

impl<T: 'static, F: FnMut(&T) -> bool + 'static> Node for Filter<T, F> {
    node_base!();
}

impl<T: 'static, F: FnMut(&T) -> bool + 'static> PushDest<T> for Filter<T, F> {
    fn push(&mut self, item: T) -> anyhow::Result<()> {
        if (self.keep)(&item) {
            self.dest.push(item)?;
        }
        Ok(())
    }
}

/// Passes on the items `keep` returns true for.
pub fn filter<T, F>(keep: F) -> PipeMiddle<T, T>
where
    T: 'static,
    F: FnMut(&T) -> bool + 'static,
{
    PipeMiddle::new(move |arena, dest| {
        let node = Filter {
            base: NodeBase::new("filter", Capabilities::PUSH),
            keep,
            dest: dest.clone(),
        };
        let (node, token) = register(arena, node)?;
        push_edge(arena, token, &dest)?;
        Ok(PushHandle::new(token, node))
    })
}

struct Unique<T> {
    base: NodeBase,
    last: Option<T>,
    dest: PushHandle<T>,
}

impl<T: PartialEq + Clone + 'static> Node for Unique<T> {
    node_base!();

    fn begin(&mut self) -> anyhow::Result<()> {
        self.last = None;
        Ok(())
    }
}

impl<T: PartialEq + Clone + 'static> PushDest<T> for Unique<T> {
    fn push(&mut self, item: T) -> anyhow::Result<()> {
        if self.last.as_ref() == Some(&item) {
            return Ok(());
        }
        self.last = Some(item.clone());
        self.dest.push(item)
    }
}

/// Drops items equal to the one just before them.
pub fn unique<T: PartialEq + Clone + 'static>() -> PipeMiddle<T, T> {
    PipeMiddle::new(move |arena, dest| {
        let node = Unique {
            base: NodeBase::new("unique", Capabilities::PUSH),
            last: None,
            dest: dest.clone(),
        };
        let (node, token) = register(arena, node)?;
        push_edge(arena, token, &dest)?;
        Ok(PushHandle::new(token, node))
    })
}

struct ForEach<T, F> {
    base: NodeBase,
    f: F,
    _in: std::marker::PhantomData<fn(T)>,
}

impl<T: 'static, F: FnMut(T) -> anyhow::Result<()> + 'static> Node for ForEach<T, F> {
    node_base!();
}

impl<T: 'static, F: FnMut(T) -> anyhow::Result<()> + 'static> PushDest<T> for ForEach<T, F> {
    fn push(&mut self, item: T) -> anyhow::Result<()> {
        (self.f)(item)
    }
}

/// Hands every item to `f`. An error from `f` aborts the run.
pub fn for_each<T, F>(f: F) -> PipeEnd<T>
where
    T: 'static,
    F: FnMut(T) -> anyhow::Result<()> + 'static,
{
    PipeEnd::new(move |arena| {
        let node = ForEach {
            base: NodeBase::new("for_each", Capabilities::PUSH),
            f,
            _in: std::marker::PhantomData,
        };
        let (node, token) = register(arena, node)?;
        Ok(PushHandle::new(token, node))
    })
}

struct Fork<T> {
    base: NodeBase,
    dest: PushHandle<T>,
    other: PushHandle<T>,
}

impl<T: Clone + 'static> Node for Fork<T> {
    node_base!();
}

impl<T: Clone + 'static> PushDest<T> for Fork<T> {
    fn push(&mut self, item: T) -> anyhow::Result<()> {
        self.other.push(item.clone())?;
        self.dest.push(item)
    }
}

/// Sends a copy of every item into `other` as well as downstream.
pub fn fork<T: Clone + 'static>(other: PipeEnd<T>) -> PipeMiddle<T, T> {
    PipeMiddle::new(move |arena, dest| {
        let other = other.attach(arena)?;
        let node = Fork {
            base: NodeBase::new("fork", Capabilities::PUSH),
            dest: dest.clone(),
            other: other.clone(),
        };
        let (node, token) = register(arena, node)?;
        push_edge(arena, token, &dest)?;
        push_edge(arena, token, &other)?;
        Ok(PushHandle::new(token, node))
    })
}

struct Identity<T> {
    base: NodeBase,
    dest: PushHandle<T>,
}

impl<T: 'static> Node for Identity<T> {
    node_base!();
}

impl<T: 'static> PushDest<T> for Identity<T> {
    fn push(&mut self, item: T) -> anyhow::Result<()> {
        self.dest.push(item)
    }
}

pub fn identity<T: 'static>() -> PipeMiddle<T, T> {
    PipeMiddle::new(move |arena, dest| {
        let node = Identity {
            base: NodeBase::new("identity", Capabilities::PUSH),
            dest: dest.clone(),
        };
        let (node, token) = register(arena, node)?;
        push_edge(arena, token, &dest)?;
        Ok(PushHandle::new(token, node))
    })
}

struct Bitbucket<T> {
    base: NodeBase,
    dropped: u64,
    _in: std::marker::PhantomData<fn(T)>,
}

impl<T: 'static> Node for Bitbucket<T> {
    node_base!();

    fn end(&mut self) -> anyhow::Result<()> {
        trace!(dropped = self.dropped, "bitbucket");
        Ok(())
    }
}

impl<T: 'static> PushDest<T> for Bitbucket<T> {
    fn push(&mut self, _item: T) -> anyhow::Result<()> {
        self.dropped += 1;
        Ok(())
    }
}

/// Discards everything pushed into it.
pub fn bitbucket<T: 'static>() -> PipeEnd<T> {
    PipeEnd::new(move |arena| {
        let node = Bitbucket {
            base: NodeBase::new("bitbucket", Capabilities::PUSH),
            dropped: 0,
            _in: std::marker::PhantomData,
        };
        let (node, token) = register(arena, node)?;
        Ok(PushHandle::new(token, node))
    })
}

struct OutputVec<T> {
    base: NodeBase,
    out: Rc<RefCell<Vec<T>>>,
}

impl<T: 'static> Node for OutputVec<T> {
    node_base!();
}

impl<T: 'static> PushDest<T> for OutputVec<T> {
    fn push(&mut self, item: T) -> anyhow::Result<()> {
        self.out.borrow_mut().push(item);
        Ok(())
    }
}

/// Appends every item to `out`.
pub fn output_vec<T: 'static>(out: Rc<RefCell<Vec<T>>>) -> PipeEnd<T> {
    PipeEnd::new(move |arena| {
        let node = OutputVec {
            base: NodeBase::new("output_vec", Capabilities::PUSH),
            out,
        };
        let (node, token) = register(arena, node)?;
        Ok(PushHandle::new(token, node))
    })
}
