use std::{cell::RefCell, marker::PhantomData, rc::Rc};

use anyhow::bail;

use crate::{
    compose::{pull_edge, register, PullBegin, PullEnd, PullHandle, PullMiddle},
    error::PipelineError,
    node::{Capabilities, Node, NodeBase, PhaseContext, PullSource},
};

struct PullInputVec<T> {
    base: NodeBase,
    items: std::vec::IntoIter<T>,
}

impl<T: 'static> Node for PullInputVec<T> {
    node_base!();

    fn propagate(&mut self, ctx: &mut PhaseContext) -> anyhow::Result<()> {
        ctx.forward("items", self.items.len() as u64);
        Ok(())
    }
}

impl<T: 'static> PullSource<T> for PullInputVec<T> {
    fn can_pull(&mut self) -> bool {
        !self.items.as_slice().is_empty()
    }

    fn pull(&mut self) -> anyhow::Result<T> {
        match self.items.next() {
            Some(item) => Ok(item),
            None => bail!(PipelineError::PullWhileEmpty),
        }
    }
}

/// Lets the elements of `items` be pulled, in order.
pub fn pull_input_vec<T: 'static>(items: Vec<T>) -> PullBegin<T> {
    PullBegin::new(move |arena| {
        let node = PullInputVec {
            base: NodeBase::new("pull_input_vec", Capabilities::PULL),
            items: items.into_iter(),
        };
        let (node, token) = register(arena, node)?;
        Ok(PullHandle::new(token, node))
    })
}

struct PullMap<I, O, F> {
    base: NodeBase,
    f: F,
    source: PullHandle<I>,
    _out: PhantomData<fn() -> O>,
}

impl<I: 'static, O: 'static, F: FnMut(I) -> O + 'static> Node for PullMap<I, O, F> {
    node_base!();
}

impl<I: 'static, O: 'static, F: FnMut(I) -> O + 'static> PullSource<O> for PullMap<I, O, F> {
    fn can_pull(&mut self) -> bool {
        self.source.can_pull()
    }

    fn pull(&mut self) -> anyhow::Result<O> {
        let item = self.source.pull()?;
        Ok((self.f)(item))
    }
}

pub fn pull_map<I, O, F>(f: F) -> PullMiddle<I, O>
where
    I: 'static,
    O: 'static,
    F: FnMut(I) -> O + 'static,
{
    PullMiddle::new(move |arena, source| {
        let node = PullMap {
            base: NodeBase::new("pull_map", Capabilities::PULL),
            f,
            source: source.clone(),
            _out: PhantomData,
        };
        let (node, token) = register(arena, node)?;
        pull_edge(arena, token, &source)?;
        Ok(PullHandle::new(token, node))
    })
}

struct PullOutputVec<T> {
    base: NodeBase,
    source: PullHandle<T>,
    out: Rc<RefCell<Vec<T>>>,
}

impl<T: 'static> Node for PullOutputVec<T> {
    node_base!();

    fn go(&mut self) -> anyhow::Result<()> {
        while self.source.can_pull() {
            let item = self.source.pull()?;
            self.out.borrow_mut().push(item);
        }
        Ok(())
    }
}

/// Drives a pull chain, appending everything it pulls to `out`.
pub fn pull_output_vec<T: 'static>(out: Rc<RefCell<Vec<T>>>) -> PullEnd<T> {
    PullEnd::new(move |arena, source| {
        let node = PullOutputVec {
            base: NodeBase::new("pull_output_vec", Capabilities::INITIATOR),
            source: source.clone(),
            out,
        };
        let (_, token) = register(arena, node)?;
        pull_edge(arena, token, &source)?;
        Ok(token)
    })
}
