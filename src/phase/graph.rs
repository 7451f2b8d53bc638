use anyhow::bail;

use crate::error::PipelineError;

/// The condensed graph: one vertex per phase representative, an edge from
/// a dependent phase to the phase it depends on.
#[derive(Debug)]
pub struct PhaseGraph {
    edges: Vec<Vec<usize>>,
    times: Vec<usize>,
    on_stack: Vec<bool>,
}

impl PhaseGraph {
    pub fn new(n: usize) -> Self {
        PhaseGraph {
            edges: vec![Vec::new(); n],
            times: vec![0; n],
            on_stack: vec![false; n],
        }
    }

    pub fn depends(&mut self, dependent: usize, dependency: usize) {
        self.edges[dependent].push(dependency);
    }

    /// Orders `vertices` so that every vertex comes after everything it
    /// depends on. Uses DFS finish times: a dependency always finishes before
    /// its dependents, so ascending finish time is a valid execution order.
    /// Vertices no edge touches keep their relative input order.
    pub fn execution_order(&mut self, vertices: &[usize]) -> anyhow::Result<Vec<usize>> {
        self.times.iter_mut().for_each(|t| *t = 0);
        self.on_stack.iter_mut().for_each(|s| *s = false);
        let mut time = 1;
        for &v in vertices {
            if self.times[v] != 0 {
                continue;
            }
            time = self.dfs_from(v, time)?;
        }

        let mut order = vertices.to_vec();
        order.sort_by_key(|v| self.times[*v]);
        Ok(order)
    }

    fn dfs_from(&mut self, start: usize, mut time: usize) -> anyhow::Result<usize> {
        // Discovery time.
        self.times[start] = time;
        time += 1;
        self.on_stack[start] = true;
        for i in 0..self.edges[start].len() {
            let next = self.edges[start][i];
            if self.on_stack[next] {
                bail!(PipelineError::DependencyCycle);
            }
            if self.times[next] != 0 {
                continue;
            }
            time = self.dfs_from(next, time)?;
        }
        self.on_stack[start] = false;
        // Finish time.
        self.times[start] = time;
        Ok(time + 1)
    }
}
