use std::cmp::Ordering;

/// Binary min-heap ordered by a comparator handed to each call, so the heap
/// does not have to own it.
#[derive(Debug)]
pub struct PriorityQueue<T> {
    heap: Vec<T>,
}

impl<T> PriorityQueue<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        PriorityQueue {
            heap: Vec::with_capacity(capacity),
        }
    }

    /// Bytes used by a queue holding at most `capacity` items.
    pub fn memory_usage(capacity: usize) -> usize {
        std::mem::size_of::<Self>() + capacity * std::mem::size_of::<T>()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn peek(&self) -> Option<&T> {
        self.heap.first()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }

    pub fn push<F>(&mut self, item: T, cmp: &F)
    where
        F: Fn(&T, &T) -> Ordering,
    {
        self.heap.push(item);
        self.sift_up(self.heap.len() - 1, cmp);
    }

    pub fn pop<F>(&mut self, cmp: &F) -> Option<T>
    where
        F: Fn(&T, &T) -> Ordering,
    {
        if self.heap.is_empty() {
            return None;
        }
        let last = self.heap.len() - 1;
        self.heap.swap(0, last);
        let top = self.heap.pop();
        self.sift_down(0, cmp);
        top
    }

    /// Replaces the minimum with `item` and returns the old minimum. Cheaper
    /// than a pop followed by a push.
    pub fn pop_and_push<F>(&mut self, item: T, cmp: &F) -> Option<T>
    where
        F: Fn(&T, &T) -> Ordering,
    {
        if self.heap.is_empty() {
            self.heap.push(item);
            return None;
        }
        let top = std::mem::replace(&mut self.heap[0], item);
        self.sift_down(0, cmp);
        Some(top)
    }

    fn sift_up<F>(&mut self, mut i: usize, cmp: &F)
    where
        F: Fn(&T, &T) -> Ordering,
    {
        while i > 0 {
            let parent = (i - 1) / 2;
            if cmp(&self.heap[i], &self.heap[parent]) != Ordering::Less {
                break;
            }
            self.heap.swap(i, parent);
            i = parent;
        }
    }

    fn sift_down<F>(&mut self, mut i: usize, cmp: &F)
    where
        F: Fn(&T, &T) -> Ordering,
    {
        let n = self.heap.len();
        loop {
            let left = 2 * i + 1;
            let right = left + 1;
            let mut smallest = i;
            if left < n && cmp(&self.heap[left], &self.heap[smallest]) == Ordering::Less {
                smallest = left;
            }
            if right < n && cmp(&self.heap[right], &self.heap[smallest]) == Ordering::Less {
                smallest = right;
            }
            if smallest == i {
                return;
            }
            self.heap.swap(i, smallest);
            i = smallest;
        }
    }
}
