/// Union-find over dense indices `0..n`, with union by rank and path
/// compression.
#[derive(Debug, Clone)]
pub struct DisjointSets {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSets {
    pub fn new(n: usize) -> Self {
        DisjointSets {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    pub fn find_set(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut cur = x;
        while self.parent[cur] != root {
            let next = self.parent[cur];
            self.parent[cur] = root;
            cur = next;
        }
        root
    }

    pub fn union_set(&mut self, a: usize, b: usize) -> usize {
        let a = self.find_set(a);
        let b = self.find_set(b);
        if a == b {
            return a;
        }
        match self.rank[a].cmp(&self.rank[b]) {
            std::cmp::Ordering::Less => {
                self.parent[a] = b;
                b
            }
            std::cmp::Ordering::Greater => {
                self.parent[b] = a;
                a
            }
            std::cmp::Ordering::Equal => {
                self.parent[b] = a;
                self.rank[a] += 1;
                a
            }
        }
    }
}
