/// A sorted input being merged.
pub trait Run<T> {
    fn has_more(&mut self) -> bool;
    fn read_next(&mut self) -> anyhow::Result<T>;
}

impl<T, R> Run<T> for Box<R>
where
    R: Run<T> + ?Sized,
{
    fn has_more(&mut self) -> bool {
        (**self).has_more()
    }

    fn read_next(&mut self) -> anyhow::Result<T> {
        (**self).read_next()
    }
}

/// A run held in memory.
#[derive(Debug)]
pub struct VecRun<T> {
    items: std::vec::IntoIter<T>,
}

impl<T> VecRun<T> {
    pub fn new(items: Vec<T>) -> Self {
        VecRun {
            items: items.into_iter(),
        }
    }
}

impl<T> Run<T> for VecRun<T> {
    fn has_more(&mut self) -> bool {
        !self.items.as_slice().is_empty()
    }

    fn read_next(&mut self) -> anyhow::Result<T> {
        self.items
            .next()
            .ok_or_else(|| anyhow::anyhow!("read past the end of a run"))
    }
}
